//! Persistence seam for runs, groups, queries, and analyses.

pub mod memory;

pub use memory::MemoryRunStore;

use async_trait::async_trait;

use crate::models::{
    AnalysisOutcome, GroupCreate, GroupRecord, QueryRecord, QueryRecordId, RunCreate, RunId,
    RunRecord,
};
use crate::ClinicError;

/// Storage for recorded runs. Durable implementations are caller-provided;
/// the crate ships [`MemoryRunStore`].
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Record a run with all its groups and queries as one atomic write.
    /// Either everything lands or nothing does.
    async fn record_run(
        &self,
        run: RunCreate,
        groups: Vec<GroupCreate>,
    ) -> Result<RunRecord, ClinicError>;

    // Reads
    async fn run(&self, id: RunId) -> Result<Option<RunRecord>, ClinicError>;
    async fn groups(&self, run_id: RunId) -> Result<Vec<GroupRecord>, ClinicError>;
    async fn queries(&self, run_id: RunId) -> Result<Vec<QueryRecord>, ClinicError>;
    async fn query(&self, id: QueryRecordId) -> Result<Option<QueryRecord>, ClinicError>;
    async fn queries_missing_real_sql(
        &self,
        run_id: RunId,
    ) -> Result<Vec<QueryRecord>, ClinicError>;
    async fn queries_count(&self, run_id: RunId) -> Result<usize, ClinicError>;

    // Updates
    /// Attach the raw SQL resolved from statement statistics to a query.
    async fn set_real_query(&self, id: QueryRecordId, sql: &str) -> Result<(), ClinicError>;

    /// Attach an analysis to a query, replacing any previous one.
    async fn save_analysis(
        &self,
        id: QueryRecordId,
        outcome: AnalysisOutcome,
    ) -> Result<(), ClinicError>;
}
