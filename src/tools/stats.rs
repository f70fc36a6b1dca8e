//! Statistics-view query tool offered during candidate selection.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::db::{QueryExecutor, MODEL_ROW_LIMIT};
use crate::tools::ToolDefinition;
use crate::ClinicError;

#[derive(Debug, Deserialize)]
struct StatsQueryInput {
    query: String,
}

/// Lets the model query `pg_stat_statements` and read the results as a
/// markdown table. Always scoped to the `public` schema, where the
/// extension's view lives.
pub struct StatStatementsQueryTool {
    executor: Arc<dyn QueryExecutor>,
    use_cache: bool,
}

impl StatStatementsQueryTool {
    pub fn new(executor: Arc<dyn QueryExecutor>, use_cache: bool) -> Self {
        Self { executor, use_cache }
    }
}

#[async_trait]
impl ToolDefinition for StatStatementsQueryTool {
    fn name(&self) -> &str {
        "pg_stat_statements_query"
    }

    fn description(&self) -> &str {
        "Run SQL query against pg_stat_statements and return results as markdown table. \
         Only first 250 rows are returned."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["query"],
            "properties": {
                "query": {
                    "type": "string",
                    "description": "SQL query to run against pg_stat_statements",
                },
            },
        })
    }

    async fn call(&self, input: &serde_json::Value) -> Result<String, ClinicError> {
        let input: StatsQueryInput = serde_json::from_value(input.clone())?;
        self.executor
            .execute("public", &input.query, self.use_cache, MODEL_ROW_LIMIT)
            .await
    }
}
