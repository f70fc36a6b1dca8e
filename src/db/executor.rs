//! Sandboxed execution of model-authored SQL.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use comfy_table::{presets::ASCII_MARKDOWN, Table};
use moka::future::Cache;
use sqlx::postgres::PgPool;
use sqlx::{Column, Executor, Row, Statement};

use crate::utils::sanitize::{quote_ident, validate_schema_name};
use crate::ClinicError;

/// Row cap applied to model-facing tool calls.
pub const MODEL_ROW_LIMIT: usize = 250;

/// Executes arbitrary read SQL on the model's behalf.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run `sql` scoped to `schema`, returning a rendered table capped at
    /// `row_limit` rows. Execution failures come back as `Err` and are
    /// expected to be folded into tool-result content by the caller.
    async fn execute(
        &self,
        schema: &str,
        sql: &str,
        use_cache: bool,
        row_limit: usize,
    ) -> Result<String, ClinicError>;
}

/// Result-cache tuning for [`SandboxedQueryExecutor`].
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub cache_capacity: u64,
    pub cache_ttl_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 1_000,
            cache_ttl_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct CacheKey {
    schema: String,
    sql: String,
}

/// Sandboxed executor over the live analyzed database.
///
/// Every statement runs inside a transaction that is set read-only and then
/// rolled back, so model-authored SQL cannot mutate state even when it
/// tries; the schema scope is applied with `SET LOCAL search_path`.
pub struct SandboxedQueryExecutor {
    pool: PgPool,
    cache: Cache<CacheKey, String>,
}

impl SandboxedQueryExecutor {
    pub fn new(pool: PgPool, config: SandboxConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.cache_capacity)
            .time_to_live(Duration::from_secs(config.cache_ttl_secs))
            .build();

        Self { pool, cache }
    }

    /// Create with default cache settings.
    pub fn with_defaults(pool: PgPool) -> Self {
        Self::new(pool, SandboxConfig::default())
    }

    async fn run_query(
        &self,
        schema: &str,
        sql: &str,
        row_limit: usize,
    ) -> Result<String, ClinicError> {
        let schema = validate_schema_name(schema)?;
        let statement = sql.trim().trim_end_matches(';');
        if statement.is_empty() {
            return Err(ClinicError::Validation("empty SQL statement".to_string()));
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!(
            "SET LOCAL search_path = {}, pg_catalog",
            quote_ident(schema)
        ))
        .execute(&mut *tx)
        .await?;

        // Column names and order come from preparing the statement itself;
        // the row values arrive as JSON so any column type renders.
        let prepared = (&mut *tx).prepare(statement).await?;
        let headers: Vec<String> = prepared
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let wrapped = wrap_for_fetch(statement, row_limit);
        let raw_rows = sqlx::query(&wrapped).fetch_all(&mut *tx).await?;
        tx.rollback().await?;

        let mut rows = Vec::with_capacity(raw_rows.len());
        for raw in &raw_rows {
            let json_text: String = raw.try_get(0)?;
            let object: serde_json::Value = serde_json::from_str(&json_text)?;
            // Duplicate column names collapse to the last value, same as an
            // associative fetch would.
            rows.push(
                headers
                    .iter()
                    .map(|h| render_cell(object.get(h)))
                    .collect::<Vec<String>>(),
            );
        }

        let truncated = rows.len() > row_limit;
        rows.truncate(row_limit);
        Ok(render_table(&headers, &rows, truncated, row_limit))
    }
}

#[async_trait]
impl QueryExecutor for SandboxedQueryExecutor {
    async fn execute(
        &self,
        schema: &str,
        sql: &str,
        use_cache: bool,
        row_limit: usize,
    ) -> Result<String, ClinicError> {
        let key = CacheKey {
            schema: schema.to_string(),
            sql: sql.to_string(),
        };
        cached_fetch(&self.cache, key, use_cache, || {
            self.run_query(schema, sql, row_limit)
        })
        .await
    }
}

/// Serve from the result cache when enabled, fetching on a miss. Only
/// successful fetches populate the cache; `use_cache = false` skips both
/// the lookup and the insert.
async fn cached_fetch<F, Fut>(
    cache: &Cache<CacheKey, String>,
    key: CacheKey,
    use_cache: bool,
    fetch: F,
) -> Result<String, ClinicError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<String, ClinicError>>,
{
    if !use_cache {
        return fetch().await;
    }

    if let Some(hit) = cache.get(&key).await {
        tracing::debug!(schema = %key.schema, "sandbox cache hit");
        return Ok(hit);
    }

    let rendered = fetch().await?;
    cache.insert(key, rendered.clone()).await;
    Ok(rendered)
}

/// Wrap a statement so each row arrives as one JSON text column and the
/// fetch can overshoot the cap by one row. Newlines keep a trailing line
/// comment in the statement from swallowing the closing parenthesis.
fn wrap_for_fetch(statement: &str, row_limit: usize) -> String {
    format!(
        "SELECT row_to_json(clinic_row)::text FROM (\n{}\n) AS clinic_row LIMIT {}",
        statement,
        row_limit + 1
    )
}

fn render_cell(value: Option<&serde_json::Value>) -> String {
    match value {
        None => String::new(),
        Some(serde_json::Value::Null) => "NULL".to_string(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Render rows as a markdown table, with a truncation note when the row cap
/// was hit.
fn render_table(
    headers: &[String],
    rows: &[Vec<String>],
    truncated: bool,
    row_limit: usize,
) -> String {
    let mut table = Table::new();
    table.load_preset(ASCII_MARKDOWN).set_header(headers.to_vec());

    for row in rows {
        table.add_row(row.to_vec());
    }

    let mut out = table.to_string();
    if rows.is_empty() {
        out.push_str("\n\n(no rows)");
    }
    if truncated {
        out.push_str(&format!("\n\nOnly the first {} rows are shown.", row_limit));
    }
    out
}
