//! Workflow services: candidate selection, per-query analysis, run
//! bookkeeping, and SQL grounding helpers.

pub mod analyzer;
pub mod extraction;
pub mod recorder;
pub mod selector;

pub use analyzer::{AnalysisHandle, QueryAnalyzer};
pub use extraction::{resolve_against_catalog, LexicalTableExtractor, TableExtractor};
pub use recorder::RunRecorder;
pub use selector::CandidateSelector;
