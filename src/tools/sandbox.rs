//! Exploratory query tool offered during analysis, scoped to one schema.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::db::{QueryExecutor, MODEL_ROW_LIMIT};
use crate::tools::ToolDefinition;
use crate::ClinicError;

#[derive(Debug, Deserialize)]
struct SandboxQueryInput {
    query: String,
}

/// Lets the analysis model run arbitrary read queries against the analyzed
/// schema. The executor guarantees the read-only sandbox; this tool only
/// pins the schema scope.
pub struct SandboxQueryTool {
    executor: Arc<dyn QueryExecutor>,
    schema: String,
    use_cache: bool,
}

impl SandboxQueryTool {
    pub fn new(executor: Arc<dyn QueryExecutor>, schema: impl Into<String>, use_cache: bool) -> Self {
        Self {
            executor,
            schema: schema.into(),
            use_cache,
        }
    }
}

#[async_trait]
impl ToolDefinition for SandboxQueryTool {
    fn name(&self) -> &str {
        "database_query"
    }

    fn description(&self) -> &str {
        "Run read-only SQL query against the analyzed database and return results as \
         markdown table. Only first 250 rows are returned."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["query"],
            "properties": {
                "query": {
                    "type": "string",
                    "description": "SQL query to run against the analyzed database",
                },
            },
        })
    }

    async fn call(&self, input: &serde_json::Value) -> Result<String, ClinicError> {
        let input: SandboxQueryInput = serde_json::from_value(input.clone())?;
        self.executor
            .execute(&self.schema, &input.query, self.use_cache, MODEL_ROW_LIMIT)
            .await
    }
}
