use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::Conversation;

pub type RunId = i64;
pub type GroupId = i64;
pub type QueryRecordId = i64;

/// Operator-chosen knobs for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Extra guidance appended verbatim to the selection prompt.
    pub special_instructions: Option<String>,
    /// Analyze the raw recorded SQL instead of the normalized sample when
    /// available.
    pub use_real_query: bool,
    /// Let the analysis model run exploratory read queries against the
    /// analyzed schema.
    pub use_database_access: bool,
}

/// A recorded selection run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    pub special_instructions: Option<String>,
    /// Analyzed server host, `host:port` when the URL carries a port.
    pub hostname: String,
    pub description: String,
    pub use_real_query: bool,
    pub use_database_access: bool,
    pub conversation: Conversation,
    pub formatted_conversation: String,
    pub created_at: DateTime<Utc>,
}

/// One group within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub id: GroupId,
    pub run_id: RunId,
    pub name: String,
    pub description: String,
}

/// One query within a run, with whatever analysis has been attached so far.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecord {
    pub id: QueryRecordId,
    pub run_id: RunId,
    pub group_id: GroupId,
    pub query_id: String,
    pub normalized_query: String,
    /// Raw SQL resolved from statement statistics, when still present there.
    pub real_query: Option<String>,
    pub schema: String,
    pub impact_description: String,
    pub analysis: Option<AnalysisOutcome>,
}

/// Data for recording a new run.
#[derive(Debug, Clone)]
pub struct RunCreate {
    pub special_instructions: Option<String>,
    pub hostname: String,
    pub description: String,
    pub use_real_query: bool,
    pub use_database_access: bool,
    pub conversation: Conversation,
    pub formatted_conversation: String,
}

/// Data for recording a group, with its queries.
#[derive(Debug, Clone)]
pub struct GroupCreate {
    pub name: String,
    pub description: String,
    pub queries: Vec<QueryCreate>,
}

/// Data for recording a query.
#[derive(Debug, Clone)]
pub struct QueryCreate {
    pub query_id: String,
    pub normalized_query: String,
    pub real_query: Option<String>,
    pub schema: String,
    pub impact_description: String,
}

/// Terminal output of one query analysis: the full conversation plus its
/// rendered markdown form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub conversation: Conversation,
    pub formatted_conversation: String,
}

/// What a `record_run` call actually wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunRecordingReport {
    pub run_id: RunId,
    pub groups_recorded: usize,
    pub queries_recorded: usize,
    /// Queries dropped for lacking a usable schema.
    pub queries_skipped: usize,
}

/// Result of a real-SQL backfill pass over one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillReport {
    pub total_queries: usize,
    pub still_missing: usize,
}
