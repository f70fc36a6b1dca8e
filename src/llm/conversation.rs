//! Append-only conversation model for model/tool exchanges.
//!
//! A conversation grows strictly by appending messages; history is never
//! edited, so a stored conversation replays exactly what the model saw.
//! Tool results are paired to the call that produced them and the pairing
//! is checked at append time.

use serde::{Deserialize, Serialize};

use crate::ClinicError;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Operator or orchestration prompt.
    User,
    /// Model output (text and/or tool calls).
    Assistant,
    /// Executed tool output fed back to the model.
    Tool,
}

/// A structured tool invocation emitted by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Transport-assigned id; the paired result references it.
    pub id: String,
    /// Registered tool name.
    pub name: String,
    /// Parsed JSON input object.
    pub arguments: serde_json::Value,
}

/// Output of one executed tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Id of the call this result answers.
    pub call_id: String,
    /// Content handed back to the model.
    pub content: String,
    /// True when the content describes a failure the model should react to.
    pub is_error: bool,
}

/// One unit of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ToolCall(ToolCall),
    ToolResult(ToolResult),
}

/// A single conversation entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<ContentPart>,
}

impl Message {
    /// A plain user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![ContentPart::Text { text: text.into() }],
        }
    }

    /// An assistant message with only text content.
    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            parts: vec![ContentPart::Text { text: text.into() }],
        }
    }

    /// An assistant message from raw parts (text and tool calls).
    pub fn assistant(parts: Vec<ContentPart>) -> Self {
        Self {
            role: Role::Assistant,
            parts,
        }
    }

    /// A tool message carrying exactly one result.
    pub fn tool_result(result: ToolResult) -> Self {
        Self {
            role: Role::Tool,
            parts: vec![ContentPart::ToolResult(result)],
        }
    }

    /// Concatenated text parts of this message, if any.
    pub fn text(&self) -> Option<String> {
        let texts: Vec<&str> = self
            .parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        if texts.is_empty() {
            None
        } else {
            Some(texts.join("\n"))
        }
    }

    /// Tool calls carried by this message.
    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::ToolCall(call) => Some(call),
                _ => None,
            })
            .collect()
    }

    /// The tool result carried by this message, for `Role::Tool` entries.
    pub fn result(&self) -> Option<&ToolResult> {
        self.parts.iter().find_map(|part| match part {
            ContentPart::ToolResult(result) => Some(result),
            _ => None,
        })
    }
}

/// Ordered, append-only message history.
///
/// The message list is private: the only way in is [`Conversation::push`],
/// which validates message shape and tool-result pairing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a conversation from a single user prompt.
    pub fn from_user_prompt(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(prompt)],
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Append a message, enforcing shape and pairing invariants.
    pub fn push(&mut self, message: Message) -> Result<(), ClinicError> {
        validate_message_shape(&message)?;
        if let Some(result) = message.result() {
            validate_result_pairing(&self.messages, result)?;
        }
        self.messages.push(message);
        Ok(())
    }

    /// Builder form of [`push`](Self::push), used for follow-up prompts.
    pub fn with_message(mut self, message: Message) -> Result<Self, ClinicError> {
        self.push(message)?;
        Ok(self)
    }

    /// Text of the most recent assistant message, if any.
    pub fn last_text(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .and_then(|m| m.text())
    }
}

/// Reject messages whose parts do not fit their role.
fn validate_message_shape(message: &Message) -> Result<(), ClinicError> {
    if message.parts.is_empty() {
        return Err(ClinicError::Conversation(
            "message has no content".to_string(),
        ));
    }

    let ok = match message.role {
        Role::User => message
            .parts
            .iter()
            .all(|p| matches!(p, ContentPart::Text { .. })),
        Role::Assistant => message
            .parts
            .iter()
            .all(|p| matches!(p, ContentPart::Text { .. } | ContentPart::ToolCall(_))),
        Role::Tool => {
            message.parts.len() == 1 && matches!(message.parts[0], ContentPart::ToolResult(_))
        }
    };

    if ok {
        Ok(())
    } else {
        Err(ClinicError::Conversation(format!(
            "content parts not valid for role {:?}",
            message.role
        )))
    }
}

/// Enforce the pairing invariant for a tool result about to be appended.
///
/// Walking back over any sibling tool results, the nearest non-tool message
/// must be an assistant message containing the referenced call, and the call
/// must not have been answered already.
fn validate_result_pairing(messages: &[Message], result: &ToolResult) -> Result<(), ClinicError> {
    let mut answered = Vec::new();
    let mut iter = messages.iter().rev();

    let assistant = loop {
        match iter.next() {
            Some(m) if m.role == Role::Tool => {
                if let Some(prior) = m.result() {
                    answered.push(prior.call_id.as_str());
                }
            }
            Some(m) if m.role == Role::Assistant => break m,
            _ => {
                return Err(ClinicError::Conversation(format!(
                    "tool result '{}' has no preceding assistant tool call",
                    result.call_id
                )));
            }
        }
    };

    let call_ids: Vec<&str> = assistant
        .tool_calls()
        .iter()
        .map(|c| c.id.as_str())
        .collect();

    if !call_ids.contains(&result.call_id.as_str()) {
        return Err(ClinicError::Conversation(format!(
            "tool result '{}' does not match any call in the preceding assistant message",
            result.call_id
        )));
    }

    if answered.contains(&result.call_id.as_str()) {
        return Err(ClinicError::Conversation(format!(
            "tool call '{}' already has a result",
            result.call_id
        )));
    }

    Ok(())
}
