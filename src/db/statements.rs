//! Lookups against `pg_stat_statements` for raw query texts.

use async_trait::async_trait;
use sqlx::postgres::PgPool;

use crate::ClinicError;

/// A raw statement text resolved from the statistics view, tagged with the
/// identifiers it was found under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedQueryText {
    pub sql: String,
    pub query_id: String,
    pub schema: String,
}

/// Access to statement statistics of the analyzed server.
#[async_trait]
pub trait StatementStats: Send + Sync {
    /// The raw SQL recorded for `query_id` in database `schema`, `None`
    /// when the entry has been evicted or never existed.
    async fn query_text(
        &self,
        query_id: &str,
        schema: &str,
    ) -> Result<Option<String>, ClinicError>;

    /// Batch lookup for several statement ids at once. Ids that do not
    /// parse as numbers or are no longer present simply yield no row.
    async fn query_texts(
        &self,
        query_ids: &[String],
    ) -> Result<Vec<ResolvedQueryText>, ClinicError>;
}

/// [`StatementStats`] backed by the `pg_stat_statements` extension.
pub struct PgStatementStats {
    pool: PgPool,
}

impl PgStatementStats {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatementStats for PgStatementStats {
    async fn query_text(
        &self,
        query_id: &str,
        schema: &str,
    ) -> Result<Option<String>, ClinicError> {
        let Ok(id) = query_id.parse::<i64>() else {
            tracing::debug!("statement id {:?} is not numeric, skipping lookup", query_id);
            return Ok(None);
        };

        let sql = sqlx::query_scalar::<_, String>(
            "SELECT s.query FROM pg_stat_statements s \
             JOIN pg_database d ON d.oid = s.dbid \
             WHERE s.queryid = $1 AND d.datname = $2 \
             LIMIT 1",
        )
        .bind(id)
        .bind(schema)
        .fetch_optional(&self.pool)
        .await?;
        Ok(sql)
    }

    async fn query_texts(
        &self,
        query_ids: &[String],
    ) -> Result<Vec<ResolvedQueryText>, ClinicError> {
        let ids: Vec<i64> = query_ids
            .iter()
            .filter_map(|raw| match raw.parse::<i64>() {
                Ok(id) => Some(id),
                Err(_) => {
                    tracing::debug!("statement id {:?} is not numeric, skipping lookup", raw);
                    None
                }
            })
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, (String, String, String)>(
            "SELECT s.query, s.queryid::text, d.datname \
             FROM pg_stat_statements s \
             JOIN pg_database d ON d.oid = s.dbid \
             WHERE s.queryid = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(sql, query_id, schema)| ResolvedQueryText {
                sql,
                query_id,
                schema,
            })
            .collect())
    }
}
