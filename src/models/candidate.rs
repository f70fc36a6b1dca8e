use serde::{Deserialize, Serialize};

use crate::llm::Conversation;

/// One statistics-derived query picked by the model during selection.
///
/// `query_id` is the statement identifier as reported by the statistics
/// store, carried as an opaque string; the model echoes it back from the
/// query results it saw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateQuery {
    pub schema: String,
    pub query_id: String,
    pub normalized_query: String,
    pub impact_description: String,
}

/// A thematic cluster of candidate queries (e.g. "high IOPS"), in the
/// order the model submitted them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateQueryGroup {
    pub name: String,
    pub description: String,
    pub queries: Vec<CandidateQuery>,
}

/// Terminal output of a selection session. Built once, read-only after.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateResult {
    /// The model's final free-text message.
    pub description: String,
    pub groups: Vec<CandidateQueryGroup>,
    /// The full conversation, including every tool round.
    pub conversation: Conversation,
    pub formatted_conversation: String,
}

impl CandidateResult {
    pub fn total_queries(&self) -> usize {
        self.groups.iter().map(|g| g.queries.len()).sum()
    }
}
