//! The tool-calling conversation loop.

use std::sync::Arc;

use crate::llm::conversation::{Conversation, Message};
use crate::llm::transport::{ChatClient, ChatRequest, ModelParams};
use crate::tools::ToolSet;
use crate::ClinicError;

/// Drives a conversation against the model until a turn carries no tool
/// calls.
///
/// No round cap is imposed here: a runaway model is bounded by the
/// transport's token and timeout settings, not by the loop.
#[derive(Clone)]
pub struct ConversationEngine {
    client: Arc<dyn ChatClient>,
}

impl ConversationEngine {
    pub fn new(client: Arc<dyn ChatClient>) -> Self {
        Self { client }
    }

    /// Run the loop to completion and return the full conversation.
    ///
    /// Tool failures (unknown name, invalid input, handler error) are folded
    /// into error-flagged tool results and the loop continues; transport
    /// failures abort with the error.
    pub async fn run(
        &self,
        mut conversation: Conversation,
        tools: &ToolSet,
        params: &ModelParams,
    ) -> Result<Conversation, ClinicError> {
        let mut round = 0usize;
        loop {
            round += 1;
            let turn = self
                .client
                .complete(ChatRequest {
                    messages: conversation.messages(),
                    tools: tools.schemas(),
                    params,
                })
                .await?;

            let calls: Vec<_> = turn.message.tool_calls().into_iter().cloned().collect();
            conversation.push(turn.message)?;

            if calls.is_empty() {
                tracing::debug!(round, "conversation complete");
                return Ok(conversation);
            }

            tracing::debug!(round, tool_calls = calls.len(), "executing tool calls");
            for call in &calls {
                let result = tools.dispatch(call).await;
                conversation.push(Message::tool_result(result))?;
            }
        }
    }
}
