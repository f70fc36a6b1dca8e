//! Tool capability contracts and name-keyed dispatch.
//!
//! Each tool declares a name, description, and JSON Schema for its input;
//! [`ToolSet`] compiles the schema at registration and validates every call
//! before the handler runs. Dispatch failures (unknown tool, invalid input,
//! handler error) become error-flagged tool results, never a crash, so the
//! model can self-correct.

pub mod sandbox;
pub mod stats;
pub mod submit;

pub use sandbox::SandboxQueryTool;
pub use stats::StatStatementsQueryTool;
pub use submit::{SelectionLog, SubmitSelectionTool};

use std::collections::BTreeMap;

use async_trait::async_trait;
use jsonschema::{Draft, JSONSchema};

use crate::llm::conversation::{ToolCall, ToolResult};
use crate::llm::transport::ToolSchema;
use crate::ClinicError;

/// A capability the model may invoke during a conversation.
#[async_trait]
pub trait ToolDefinition: Send + Sync {
    /// Registered name, as the model addresses it.
    fn name(&self) -> &str;

    /// Model-facing description of what the tool does.
    fn description(&self) -> &str;

    /// JSON Schema (draft 7) describing the input object.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute against schema-validated input and return model-facing
    /// content. Errors here are converted to tool-result error content by
    /// the dispatcher.
    async fn call(&self, input: &serde_json::Value) -> Result<String, ClinicError>;
}

struct RegisteredTool {
    tool: Box<dyn ToolDefinition>,
    compiled: JSONSchema,
}

/// The set of tools offered to the model for one conversation.
///
/// BTreeMap keeps the declared tool listing deterministic.
#[derive(Default)]
pub struct ToolSet {
    tools: BTreeMap<String, RegisteredTool>,
    declared: Vec<ToolSchema>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, compiling its input schema.
    ///
    /// A schema that fails to compile is a programming error in the tool
    /// and is reported as `ClinicError::Validation`.
    pub fn register(&mut self, tool: impl ToolDefinition + 'static) -> Result<(), ClinicError> {
        let schema_value = tool.input_schema();
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&schema_value)
            .map_err(|e| {
                ClinicError::Validation(format!(
                    "tool '{}' declares an invalid input schema: {}",
                    tool.name(),
                    e
                ))
            })?;

        let name = tool.name().to_string();
        self.declared.push(ToolSchema {
            name: name.clone(),
            description: tool.description().to_string(),
            input_schema: schema_value,
        });
        self.declared.sort_by(|a, b| a.name.cmp(&b.name));
        self.tools.insert(
            name,
            RegisteredTool {
                tool: Box::new(tool),
                compiled,
            },
        );
        Ok(())
    }

    /// Declared tool surface, in name order.
    pub fn schemas(&self) -> &[ToolSchema] {
        &self.declared
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Execute one tool call, folding every failure into error content.
    pub async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        match self.try_dispatch(call).await {
            Ok(content) => ToolResult {
                call_id: call.id.clone(),
                content,
                is_error: false,
            },
            Err(error) => {
                tracing::debug!(tool = %call.name, %error, "tool call failed");
                ToolResult {
                    call_id: call.id.clone(),
                    content: format!("Error: {}", error),
                    is_error: true,
                }
            }
        }
    }

    async fn try_dispatch(&self, call: &ToolCall) -> Result<String, ClinicError> {
        let entry = self
            .tools
            .get(&call.name)
            .ok_or_else(|| ClinicError::UnknownTool(call.name.clone()))?;

        if let Err(errors) = entry.compiled.validate(&call.arguments) {
            let message = errors
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ClinicError::ToolInput {
                tool: call.name.clone(),
                message,
            });
        }

        entry.tool.call(&call.arguments).await
    }
}
