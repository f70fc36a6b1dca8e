//! Fake collaborators for driving workflows without a live database.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use sqlclinic::db::{
    CatalogReader, PlanReader, QueryExecutor, ResolvedQueryText, StatementStats,
};
use sqlclinic::ClinicError;

/// Install a stderr subscriber honoring `RUST_LOG`. Safe to call from every
/// test; only the first call wins.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Statement statistics backed by a `(query_id, schema) -> sql` map.
#[derive(Default)]
pub struct FakeStats {
    texts: HashMap<(String, String), String>,
}

impl FakeStats {
    pub fn new(entries: &[(&str, &str, &str)]) -> Self {
        Self {
            texts: entries
                .iter()
                .map(|(id, schema, sql)| ((id.to_string(), schema.to_string()), sql.to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl StatementStats for FakeStats {
    async fn query_text(
        &self,
        query_id: &str,
        schema: &str,
    ) -> Result<Option<String>, ClinicError> {
        Ok(self
            .texts
            .get(&(query_id.to_string(), schema.to_string()))
            .cloned())
    }

    async fn query_texts(
        &self,
        query_ids: &[String],
    ) -> Result<Vec<ResolvedQueryText>, ClinicError> {
        Ok(self
            .texts
            .iter()
            .filter(|((id, _), _)| query_ids.contains(id))
            .map(|((id, schema), sql)| ResolvedQueryText {
                sql: sql.clone(),
                query_id: id.clone(),
                schema: schema.clone(),
            })
            .collect())
    }
}

/// Catalog with a fixed table set per schema; DDL is generated per table.
#[derive(Default)]
pub struct FakeCatalog {
    tables: HashMap<String, Vec<String>>,
}

impl FakeCatalog {
    pub fn new(schema: &str, tables: &[&str]) -> Self {
        let mut map = HashMap::new();
        map.insert(
            schema.to_string(),
            tables.iter().map(|t| t.to_string()).collect(),
        );
        Self { tables: map }
    }

    pub fn ddl_for(table: &str) -> String {
        format!("CREATE TABLE {} (\n    id bigint NOT NULL\n);", table)
    }
}

#[async_trait]
impl CatalogReader for FakeCatalog {
    async fn table_names(&self, schema: &str) -> Result<Vec<String>, ClinicError> {
        Ok(self.tables.get(schema).cloned().unwrap_or_default())
    }

    async fn table_ddl(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Option<String>, ClinicError> {
        let known = self
            .tables
            .get(schema)
            .map(|tables| tables.iter().any(|t| t == table))
            .unwrap_or(false);
        Ok(known.then(|| Self::ddl_for(table)))
    }
}

/// Plan provider that either returns a fixed plan or reports every
/// statement as unplannable.
pub struct FakePlans {
    plan: Option<String>,
}

impl FakePlans {
    pub fn with_plan(plan: &str) -> Self {
        Self {
            plan: Some(plan.to_string()),
        }
    }

    pub fn unavailable() -> Self {
        Self { plan: None }
    }
}

#[async_trait]
impl PlanReader for FakePlans {
    async fn explain(&self, _schema: &str, _sql: &str) -> Result<Option<String>, ClinicError> {
        Ok(self.plan.clone())
    }
}

/// Executor that records every call and replies with canned content.
pub struct FakeExecutor {
    pub calls: Mutex<Vec<(String, String, bool, usize)>>,
    response: Result<String, String>,
}

impl FakeExecutor {
    pub fn replying(content: &str) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            response: Ok(content.to_string()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            response: Err(message.to_string()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl QueryExecutor for FakeExecutor {
    async fn execute(
        &self,
        schema: &str,
        sql: &str,
        use_cache: bool,
        row_limit: usize,
    ) -> Result<String, ClinicError> {
        self.calls.lock().unwrap().push((
            schema.to_string(),
            sql.to_string(),
            use_cache,
            row_limit,
        ));
        match &self.response {
            Ok(content) => Ok(content.clone()),
            Err(message) => Err(ClinicError::Database(message.clone())),
        }
    }
}
