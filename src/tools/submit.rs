//! Selection submission tool and its session-scoped accumulator.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Deserialize;

use crate::models::{CandidateQuery, CandidateQueryGroup};
use crate::tools::ToolDefinition;
use crate::ClinicError;

/// One `submit_selection` payload as the model sent it.
#[derive(Debug, Deserialize)]
struct SubmittedGroup {
    group_name: String,
    group_description: String,
    queries: Vec<SubmittedQuery>,
}

#[derive(Debug, Deserialize)]
struct SubmittedQuery {
    queryid: String,
    query_sample: String,
    schema: String,
    reason: String,
}

/// Accumulates `submit_selection` payloads across one selection session.
///
/// Cloning shares the underlying log; the selector keeps one handle and
/// gives the other to the tool.
#[derive(Clone, Default)]
pub struct SelectionLog {
    entries: Arc<Mutex<Vec<serde_json::Value>>>,
}

impl SelectionLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, input: serde_json::Value) {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).push(input);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Map every accumulated submission into a domain group, in submission
    /// order. Payload shape is guaranteed by schema validation before the
    /// handler runs, so a mismatch here means the log was fed by hand.
    pub fn groups(&self) -> Result<Vec<CandidateQueryGroup>, ClinicError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .map(|entry| {
                let group: SubmittedGroup = serde_json::from_value(entry.clone())?;
                Ok(CandidateQueryGroup {
                    name: group.group_name,
                    description: group.group_description,
                    queries: group
                        .queries
                        .into_iter()
                        .map(|q| CandidateQuery {
                            schema: q.schema,
                            query_id: q.queryid,
                            normalized_query: q.query_sample,
                            impact_description: q.reason,
                        })
                        .collect(),
                })
            })
            .collect()
    }
}

/// Records the model's candidate picks. The handler never fails: the model
/// always gets a successful acknowledgment and may submit further groups
/// in later turns.
pub struct SubmitSelectionTool {
    log: SelectionLog,
}

impl SubmitSelectionTool {
    pub fn new(log: SelectionLog) -> Self {
        Self { log }
    }
}

#[async_trait]
impl ToolDefinition for SubmitSelectionTool {
    fn name(&self) -> &str {
        "submit_selection"
    }

    fn description(&self) -> &str {
        "Submit your selection of 20 most expensive queries"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["queries", "group_name", "group_description"],
            "properties": {
                "group_name": {
                    "type": "string",
                    "description": "Group name",
                },
                "group_description": {
                    "type": "string",
                    "description": "Description of performance impact type of the group",
                },
                "queries": {
                    "type": "array",
                    "description": "Array of query queryids to optimize (min 1, max 20)",
                    "minItems": 1,
                    "maxItems": 20,
                    "items": {
                        "type": "object",
                        "required": ["queryid", "query_sample", "schema", "reason"],
                        "properties": {
                            "queryid": {
                                "type": "string",
                                "description": "The queryid from pg_stat_statements",
                            },
                            "query_sample": {
                                "type": "string",
                                "description": "The query text from pg_stat_statements",
                            },
                            "schema": {
                                "type": "string",
                                "description": "The database schema the query operates on",
                            },
                            "reason": {
                                "type": "string",
                                "description": "Explanation of why this query is worth optimizing - \
                                    formulate it in a way that it will be obvious if mentioned numbers \
                                    are about a single query or total for all queries in the group",
                            },
                        },
                    },
                },
            },
        })
    }

    async fn call(&self, input: &serde_json::Value) -> Result<String, ClinicError> {
        self.log.record(input.clone());
        Ok("Selection submitted".to_string())
    }
}
