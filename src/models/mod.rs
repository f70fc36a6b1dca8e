//! Domain data model: candidate selections and recorded runs.

pub mod candidate;
pub mod run;

pub use candidate::{CandidateQuery, CandidateQueryGroup, CandidateResult};
pub use run::{
    AnalysisOutcome, BackfillReport, GroupCreate, GroupId, GroupRecord, QueryCreate,
    QueryRecord, QueryRecordId, RunCreate, RunId, RunOptions, RunRecord, RunRecordingReport,
};
