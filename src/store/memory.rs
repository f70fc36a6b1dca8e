//! In-memory [`RunStore`] for tests and embedding callers.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::models::{
    AnalysisOutcome, GroupCreate, GroupRecord, QueryRecord, QueryRecordId, RunCreate, RunId,
    RunRecord,
};
use crate::store::RunStore;
use crate::ClinicError;

#[derive(Default)]
struct StoreInner {
    next_id: i64,
    runs: BTreeMap<RunId, RunRecord>,
    groups: BTreeMap<i64, GroupRecord>,
    queries: BTreeMap<QueryRecordId, QueryRecord>,
}

impl StoreInner {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory store backed by ordered maps behind one lock, so writes are
/// trivially atomic.
#[derive(Default)]
pub struct MemoryRunStore {
    inner: RwLock<StoreInner>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn record_run(
        &self,
        run: RunCreate,
        groups: Vec<GroupCreate>,
    ) -> Result<RunRecord, ClinicError> {
        let mut inner = self.inner.write().await;
        let run_id = inner.allocate_id();
        let record = RunRecord {
            id: run_id,
            special_instructions: run.special_instructions,
            hostname: run.hostname,
            description: run.description,
            use_real_query: run.use_real_query,
            use_database_access: run.use_database_access,
            conversation: run.conversation,
            formatted_conversation: run.formatted_conversation,
            created_at: Utc::now(),
        };
        inner.runs.insert(run_id, record.clone());

        for group in groups {
            let group_id = inner.allocate_id();
            inner.groups.insert(
                group_id,
                GroupRecord {
                    id: group_id,
                    run_id,
                    name: group.name,
                    description: group.description,
                },
            );
            for query in group.queries {
                let query_record_id = inner.allocate_id();
                inner.queries.insert(
                    query_record_id,
                    QueryRecord {
                        id: query_record_id,
                        run_id,
                        group_id,
                        query_id: query.query_id,
                        normalized_query: query.normalized_query,
                        real_query: query.real_query,
                        schema: query.schema,
                        impact_description: query.impact_description,
                        analysis: None,
                    },
                );
            }
        }
        Ok(record)
    }

    async fn run(&self, id: RunId) -> Result<Option<RunRecord>, ClinicError> {
        Ok(self.inner.read().await.runs.get(&id).cloned())
    }

    async fn groups(&self, run_id: RunId) -> Result<Vec<GroupRecord>, ClinicError> {
        Ok(self
            .inner
            .read()
            .await
            .groups
            .values()
            .filter(|g| g.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn queries(&self, run_id: RunId) -> Result<Vec<QueryRecord>, ClinicError> {
        Ok(self
            .inner
            .read()
            .await
            .queries
            .values()
            .filter(|q| q.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn query(&self, id: QueryRecordId) -> Result<Option<QueryRecord>, ClinicError> {
        Ok(self.inner.read().await.queries.get(&id).cloned())
    }

    async fn queries_missing_real_sql(
        &self,
        run_id: RunId,
    ) -> Result<Vec<QueryRecord>, ClinicError> {
        Ok(self
            .inner
            .read()
            .await
            .queries
            .values()
            .filter(|q| q.run_id == run_id && q.real_query.is_none())
            .cloned()
            .collect())
    }

    async fn queries_count(&self, run_id: RunId) -> Result<usize, ClinicError> {
        Ok(self
            .inner
            .read()
            .await
            .queries
            .values()
            .filter(|q| q.run_id == run_id)
            .count())
    }

    async fn set_real_query(&self, id: QueryRecordId, sql: &str) -> Result<(), ClinicError> {
        let mut inner = self.inner.write().await;
        match inner.queries.get_mut(&id) {
            Some(query) => {
                query.real_query = Some(sql.to_string());
                Ok(())
            }
            None => Err(ClinicError::Persistence(format!(
                "query record {} not found",
                id
            ))),
        }
    }

    async fn save_analysis(
        &self,
        id: QueryRecordId,
        outcome: AnalysisOutcome,
    ) -> Result<(), ClinicError> {
        let mut inner = self.inner.write().await;
        match inner.queries.get_mut(&id) {
            Some(query) => {
                query.analysis = Some(outcome);
                Ok(())
            }
            None => Err(ClinicError::Persistence(format!(
                "query record {} not found",
                id
            ))),
        }
    }
}
