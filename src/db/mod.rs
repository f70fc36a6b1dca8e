//! PostgreSQL access: connections, catalog introspection, statement stats,
//! and the sandboxed executor exposed to the model.

pub mod catalog;
pub mod connect;
pub mod executor;
pub mod statements;

pub use catalog::{CatalogReader, PgCatalog, PlanReader};
pub use connect::{connect, AnalyzedDbConfig};
pub use executor::{QueryExecutor, SandboxConfig, SandboxedQueryExecutor, MODEL_ROW_LIMIT};
pub use statements::{PgStatementStats, ResolvedQueryText, StatementStats};
