//! Builders for conversation turns and selection payloads.
#![allow(dead_code)]

use serde_json::json;

use sqlclinic::llm::{ContentPart, Message, ToolCall};
use sqlclinic::models::CandidateQuery;

/// An assistant turn carrying a single tool call.
pub fn tool_call_turn(id: &str, name: &str, arguments: serde_json::Value) -> Message {
    Message::assistant(vec![ContentPart::ToolCall(ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    })])
}

/// A well-formed `submit_selection` payload with `count` queries.
pub fn submission_payload(group_name: &str, count: usize) -> serde_json::Value {
    let queries: Vec<serde_json::Value> = (0..count)
        .map(|i| {
            json!({
                "queryid": format!("{}", 1000 + i),
                "query_sample": "SELECT * FROM orders WHERE customer_id = $1",
                "schema": "shop",
                "reason": "dominates total execution time across the workload",
            })
        })
        .collect();
    json!({
        "group_name": group_name,
        "group_description": "queries with outsized resource cost",
        "queries": queries,
    })
}

/// Builder for candidate queries with sensible defaults.
pub struct CandidateBuilder {
    schema: String,
    query_id: String,
    normalized_query: String,
    impact_description: String,
}

impl CandidateBuilder {
    pub fn new(query_id: impl Into<String>) -> Self {
        Self {
            schema: "shop".to_string(),
            query_id: query_id.into(),
            normalized_query: "SELECT * FROM orders WHERE customer_id = $1".to_string(),
            impact_description: "high total execution time".to_string(),
        }
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn normalized_query(mut self, sql: impl Into<String>) -> Self {
        self.normalized_query = sql.into();
        self
    }

    pub fn build(self) -> CandidateQuery {
        CandidateQuery {
            schema: self.schema,
            query_id: self.query_id,
            normalized_query: self.normalized_query,
            impact_description: self.impact_description,
        }
    }
}
