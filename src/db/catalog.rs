//! Catalog introspection: table listings, DDL rendering, query plans.

use async_trait::async_trait;
use sqlx::postgres::PgPool;

use crate::utils::sanitize::{quote_ident, validate_schema_name};
use crate::ClinicError;

/// Catalog/DDL provider for the analyzed database.
#[async_trait]
pub trait CatalogReader: Send + Sync {
    /// All table names in `schema`.
    async fn table_names(&self, schema: &str) -> Result<Vec<String>, ClinicError>;

    /// Rendered DDL (columns + indexes) for one table, `None` when the
    /// table does not exist.
    async fn table_ddl(&self, schema: &str, table: &str)
        -> Result<Option<String>, ClinicError>;
}

/// Query-plan provider.
#[async_trait]
pub trait PlanReader: Send + Sync {
    /// `EXPLAIN (FORMAT JSON)` for `sql` scoped to `schema`; `None` when the
    /// statement cannot be planned (placeholders, syntax the planner
    /// rejects).
    async fn explain(&self, schema: &str, sql: &str) -> Result<Option<String>, ClinicError>;
}

/// One column row from `information_schema.columns`.
#[derive(Debug, Clone, sqlx::FromRow)]
struct ColumnDef {
    column_name: String,
    data_type: String,
    is_nullable: String,
    column_default: Option<String>,
}

/// Live-catalog implementation of [`CatalogReader`] and [`PlanReader`].
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogReader for PgCatalog {
    async fn table_names(&self, schema: &str) -> Result<Vec<String>, ClinicError> {
        let names = sqlx::query_scalar::<_, String>(
            "SELECT tablename FROM pg_catalog.pg_tables WHERE schemaname = $1 ORDER BY tablename",
        )
        .bind(schema)
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    async fn table_ddl(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Option<String>, ClinicError> {
        let columns = sqlx::query_as::<_, ColumnDef>(
            "SELECT column_name, data_type, is_nullable, column_default \
             FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 \
             ORDER BY ordinal_position",
        )
        .bind(schema)
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        if columns.is_empty() {
            return Ok(None);
        }

        let indexes = sqlx::query_scalar::<_, String>(
            "SELECT indexdef FROM pg_indexes \
             WHERE schemaname = $1 AND tablename = $2 \
             ORDER BY indexname",
        )
        .bind(schema)
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(render_ddl(schema, table, &columns, &indexes)))
    }
}

#[async_trait]
impl PlanReader for PgCatalog {
    async fn explain(&self, schema: &str, sql: &str) -> Result<Option<String>, ClinicError> {
        let schema = match validate_schema_name(schema) {
            Ok(s) => s,
            // A schema name that cannot be scoped cannot be planned either.
            Err(_) => return Ok(None),
        };
        let statement = sql.trim().trim_end_matches(';');
        if statement.is_empty() {
            return Ok(None);
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

        let result = sqlx::query_scalar::<_, serde_json::Value>(&format!(
            "EXPLAIN (FORMAT JSON) {}",
            statement
        ))
        .fetch_all(&mut *tx)
        .await;

        match result {
            Ok(rows) => {
                tx.rollback().await?;
                let rendered: Vec<String> = rows
                    .iter()
                    .map(|plan| {
                        serde_json::to_string_pretty(plan).unwrap_or_else(|_| plan.to_string())
                    })
                    .collect();
                Ok(Some(rendered.join("\n")))
            }
            // The statement itself could not be planned; the transaction
            // rolls back on drop.
            Err(sqlx::Error::Database(e)) => {
                tracing::debug!("EXPLAIN rejected: {}", e);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Compose a readable `CREATE TABLE` block plus index definitions.
fn render_ddl(schema: &str, table: &str, columns: &[ColumnDef], indexes: &[String]) -> String {
    let column_lines: Vec<String> = columns
        .iter()
        .map(|c| {
            let mut line = format!("    {} {}", c.column_name, c.data_type);
            if let Some(default) = &c.column_default {
                line.push_str(&format!(" DEFAULT {}", default));
            }
            if c.is_nullable == "NO" {
                line.push_str(" NOT NULL");
            }
            line
        })
        .collect();

    let mut out = format!(
        "CREATE TABLE {}.{} (\n{}\n);",
        schema,
        table,
        column_lines.join(",\n")
    );
    for index in indexes {
        out.push('\n');
        out.push_str(index);
        out.push(';');
    }
    out
}
