//! Markdown rendering of conversation transcripts.
//!
//! The rendered form is what gets persisted next to the raw conversation and
//! shown to operators; it must survive without the originating process, so
//! everything (tool calls, results, errors) is spelled out.

use crate::llm::conversation::{ContentPart, Conversation, Role};

/// Render a conversation as a markdown transcript.
pub fn conversation_to_markdown(conversation: &Conversation) -> String {
    let mut out = String::new();

    for message in conversation.messages() {
        match message.role {
            Role::User => out.push_str("## User\n\n"),
            Role::Assistant => out.push_str("## Assistant\n\n"),
            Role::Tool => {}
        }

        for part in &message.parts {
            match part {
                ContentPart::Text { text } => {
                    out.push_str(text);
                    out.push_str("\n\n");
                }
                ContentPart::ToolCall(call) => {
                    out.push_str(&format!("**Tool call: {} (`{}`)**\n\n", call.name, call.id));
                    out.push_str("```json\n");
                    out.push_str(&pretty_json(&call.arguments));
                    out.push_str("\n```\n\n");
                }
                ContentPart::ToolResult(result) => {
                    if result.is_error {
                        out.push_str(&format!("## Tool result (`{}`, error)\n\n", result.call_id));
                    } else {
                        out.push_str(&format!("## Tool result (`{}`)\n\n", result.call_id));
                    }
                    out.push_str("```\n");
                    out.push_str(&result.content);
                    out.push_str("\n```\n\n");
                }
            }
        }
    }

    out.trim_end().to_string()
}

fn pretty_json(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
