pub mod conversation;
pub mod engine;
pub mod markdown;
pub mod transport;

pub use conversation::{ContentPart, Conversation, Message, Role, ToolCall, ToolResult};
pub use engine::ConversationEngine;
pub use markdown::conversation_to_markdown;
pub use transport::{
    ChatClient, ChatRequest, LlmConfig, ModelParams, ModelTurn, OpenAiChatClient, RecordedRequest,
    ScriptedChatClient, TokenUsage, ToolSchema,
};
