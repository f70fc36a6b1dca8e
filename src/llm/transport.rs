//! Model transport: the "send conversation + tools + params" primitive.
//!
//! [`ChatClient`] is the seam the engine drives. [`OpenAiChatClient`] speaks
//! the OpenAI-compatible `/chat/completions` wire shape over reqwest with
//! exponential-backoff retries; [`ScriptedChatClient`] plays canned turns for
//! tests and dry runs.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};

use crate::llm::conversation::{ContentPart, Message, Role, ToolCall};
use crate::ClinicError;

/// Model invocation parameters for one conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelParams {
    /// Model identifier as the endpoint expects it.
    pub model: String,
    pub temperature: f32,
    /// Maximum output tokens for one completion.
    pub max_tokens: u32,
}

/// Token accounting reported by the transport.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One completed model turn.
#[derive(Debug, Clone)]
pub struct ModelTurn {
    /// The assistant message (text and/or tool calls).
    pub message: Message,
    pub usage: TokenUsage,
}

/// Declared tool surface sent with each request.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A single completion request as the engine sees it.
pub struct ChatRequest<'a> {
    pub messages: &'a [Message],
    pub tools: &'a [ToolSchema],
    pub params: &'a ModelParams,
}

/// Chat transport trait: one conversation round-trip per call.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Send the conversation and declared tools, get the next model turn.
    ///
    /// Implementations own retries and token/cost limits; an error here is
    /// fatal to the conversation being driven.
    async fn complete(&self, request: ChatRequest<'_>) -> Result<ModelTurn, ClinicError>;
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_selection_model() -> String {
    "gpt-5-nano-2025-08-07".to_string()
}

fn default_analysis_model() -> String {
    "gpt-4.1-2025-04-14".to_string()
}

/// Transport configuration.
/// Loaded from `LLM_*` env vars with defaults suitable for OpenAI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Endpoint root, e.g. `https://api.openai.com/v1` or a local
    /// OpenAI-compatible server.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bearer token; empty for servers that do not authenticate.
    #[serde(default)]
    pub api_key: String,
    /// Model used for the candidate-selection phase.
    #[serde(default = "default_selection_model")]
    pub selection_model: String,
    /// Model used for per-query analysis.
    #[serde(default = "default_analysis_model")]
    pub analysis_model: String,
    /// Per-request timeout in seconds.
    #[serde(default = "LlmConfig::default_timeout_secs")]
    pub timeout_secs: u64,
    /// Maximum retry attempts for transient failures.
    #[serde(default = "LlmConfig::default_max_retries")]
    pub max_retries: u32,
}

impl LlmConfig {
    fn default_timeout_secs() -> u64 {
        300
    }

    fn default_max_retries() -> u32 {
        3
    }

    /// Load config from environment with defaulted fallbacks:
    /// `LLM_BASE_URL`, `LLM_API_KEY`, `LLM_SELECTION_MODEL`,
    /// `LLM_ANALYSIS_MODEL`, `LLM_TIMEOUT_SECS`, `LLM_MAX_RETRIES`.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("LLM_BASE_URL").unwrap_or_else(|_| default_base_url()),
            api_key: std::env::var("LLM_API_KEY").unwrap_or_default(),
            selection_model: std::env::var("LLM_SELECTION_MODEL")
                .unwrap_or_else(|_| default_selection_model()),
            analysis_model: std::env::var("LLM_ANALYSIS_MODEL")
                .unwrap_or_else(|_| default_analysis_model()),
            timeout_secs: env_parse("LLM_TIMEOUT_SECS", Self::default_timeout_secs()),
            max_retries: env_parse("LLM_MAX_RETRIES", Self::default_max_retries()),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            selection_model: default_selection_model(),
            analysis_model: default_analysis_model(),
            timeout_secs: Self::default_timeout_secs(),
            max_retries: Self::default_max_retries(),
        }
    }
}

fn env_parse<T: std::str::FromStr + std::fmt::Display>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!("Invalid {} value '{}'. Using default {}.", name, raw, default);
                default
            }
        },
        Err(_) => default,
    }
}

// -- OpenAI-compatible wire types --

#[derive(Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
}

#[derive(Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireToolFunction,
}

#[derive(Serialize)]
struct WireToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default)]
    kind: String,
    function: WireCallFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireCallFunction {
    name: String,
    /// JSON-encoded argument object, as the wire format demands.
    arguments: String,
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Map a conversation message to the wire shape.
fn message_to_wire(message: &Message) -> WireMessage {
    match message.role {
        Role::User => WireMessage {
            role: "user".to_string(),
            content: message.text(),
            tool_calls: None,
            tool_call_id: None,
        },
        Role::Assistant => {
            let calls: Vec<WireToolCall> = message
                .tool_calls()
                .iter()
                .map(|call| WireToolCall {
                    id: call.id.clone(),
                    kind: "function".to_string(),
                    function: WireCallFunction {
                        name: call.name.clone(),
                        arguments: call.arguments.to_string(),
                    },
                })
                .collect();
            WireMessage {
                role: "assistant".to_string(),
                content: message.text(),
                tool_calls: if calls.is_empty() { None } else { Some(calls) },
                tool_call_id: None,
            }
        }
        Role::Tool => {
            let result = message.result();
            WireMessage {
                role: "tool".to_string(),
                content: result.map(|r| r.content.clone()),
                tool_calls: None,
                tool_call_id: result.map(|r| r.call_id.clone()),
            }
        }
    }
}

/// Rebuild an assistant [`Message`] from the wire shape.
fn assistant_from_wire(wire: WireMessage) -> Result<Message, ClinicError> {
    let mut parts = Vec::new();

    if let Some(text) = wire.content {
        if !text.is_empty() {
            parts.push(ContentPart::Text { text });
        }
    }

    for call in wire.tool_calls.unwrap_or_default() {
        let raw = call.function.arguments.trim();
        let arguments: serde_json::Value = if raw.is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(raw).map_err(|e| {
                ClinicError::MalformedResponse(format!(
                    "tool call '{}' carries unparseable arguments: {}",
                    call.function.name, e
                ))
            })?
        };
        parts.push(ContentPart::ToolCall(ToolCall {
            id: call.id,
            name: call.function.name,
            arguments,
        }));
    }

    if parts.is_empty() {
        return Err(ClinicError::MalformedResponse(
            "assistant message has neither content nor tool calls".to_string(),
        ));
    }

    Ok(Message::assistant(parts))
}

fn turn_from_response(response: WireResponse) -> Result<ModelTurn, ClinicError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ClinicError::MalformedResponse("response has no choices".to_string()))?;

    let usage = response
        .usage
        .map(|u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    Ok(ModelTurn {
        message: assistant_from_wire(choice.message)?,
        usage,
    })
}

/// Retryable: network-level failures and throttling/server statuses.
fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Chat client for OpenAI-compatible endpoints.
pub struct OpenAiChatClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    max_retries: u32,
}

impl OpenAiChatClient {
    pub fn new(config: &LlmConfig) -> Result<Self, ClinicError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            max_retries: config.max_retries,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(500))
            .with_max_interval(Duration::from_secs(30))
            .with_max_elapsed_time(None)
            .build()
    }

    /// One HTTP attempt. The bool marks whether a failure may be retried.
    async fn execute(&self, body: &WireRequest) -> Result<ModelTurn, (ClinicError, bool)> {
        let mut request = self.http.post(self.endpoint()).json(body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| (ClinicError::from(e), true))?;

        let status = response.status();
        if !status.is_success() {
            let retryable = is_retryable_status(status);
            let body_text = response.text().await.unwrap_or_default();
            return Err((
                ClinicError::Transport {
                    message: format!("chat completion failed with {}: {}", status, body_text),
                    source: None,
                },
                retryable,
            ));
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| (ClinicError::from(e), false))?;

        turn_from_response(wire).map_err(|e| (e, false))
    }
}

#[async_trait]
impl ChatClient for OpenAiChatClient {
    async fn complete(&self, request: ChatRequest<'_>) -> Result<ModelTurn, ClinicError> {
        let body = WireRequest {
            model: request.params.model.clone(),
            messages: request.messages.iter().map(message_to_wire).collect(),
            temperature: request.params.temperature,
            max_tokens: request.params.max_tokens,
            tools: request
                .tools
                .iter()
                .map(|tool| WireTool {
                    kind: "function",
                    function: WireToolFunction {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: tool.input_schema.clone(),
                    },
                })
                .collect(),
        };

        let mut backoff = self.create_backoff();
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.execute(&body).await {
                Ok(turn) => {
                    tracing::debug!(
                        model = %request.params.model,
                        input_tokens = turn.usage.input_tokens,
                        output_tokens = turn.usage.output_tokens,
                        "chat completion finished"
                    );
                    return Ok(turn);
                }
                Err((error, retryable)) => {
                    if !retryable || attempt > self.max_retries {
                        return Err(error);
                    }
                    match backoff.next_backoff() {
                        Some(delay) => {
                            tracing::warn!(
                                attempt,
                                ?delay,
                                "transient chat completion failure: {}. Retrying.",
                                error
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => return Err(error),
                    }
                }
            }
        }
    }
}

/// A recorded request, kept by [`ScriptedChatClient`] for assertions.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<Message>,
    pub tool_names: Vec<String>,
    pub params: ModelParams,
}

/// Deterministic transport that pops pre-scripted assistant turns.
///
/// Exhausting the script is a transport error, which mimics a dead endpoint
/// and keeps misbehaving tests loud.
#[derive(Default)]
pub struct ScriptedChatClient {
    turns: Mutex<VecDeque<Message>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedChatClient {
    pub fn new(turns: Vec<Message>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests observed so far, in call order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChatClient for ScriptedChatClient {
    async fn complete(&self, request: ChatRequest<'_>) -> Result<ModelTurn, ClinicError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(RecordedRequest {
                messages: request.messages.to_vec(),
                tool_names: request.tools.iter().map(|t| t.name.clone()).collect(),
                params: request.params.clone(),
            });
        }

        let next = self
            .turns
            .lock()
            .ok()
            .and_then(|mut turns| turns.pop_front());

        match next {
            Some(message) => Ok(ModelTurn {
                message,
                usage: TokenUsage::default(),
            }),
            None => Err(ClinicError::Transport {
                message: "scripted turns exhausted".to_string(),
                source: None,
            }),
        }
    }
}
