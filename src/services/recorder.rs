//! Maps a finished selection into durable run records.

use std::collections::HashMap;
use std::sync::Arc;

use crate::db::StatementStats;
use crate::models::{
    BackfillReport, CandidateResult, GroupCreate, QueryCreate, RunCreate, RunId, RunOptions,
    RunRecordingReport,
};
use crate::store::RunStore;
use crate::ClinicError;

/// Bookkeeping around selection results: one atomic run write, plus a
/// later real-SQL backfill for anything statement statistics could not
/// resolve at record time.
pub struct RunRecorder {
    store: Arc<dyn RunStore>,
    stats: Arc<dyn StatementStats>,
    hostname: String,
}

impl RunRecorder {
    pub fn new(
        store: Arc<dyn RunStore>,
        stats: Arc<dyn StatementStats>,
        hostname: impl Into<String>,
    ) -> Self {
        Self {
            store,
            stats,
            hostname: hostname.into(),
        }
    }

    /// Record a selection result as one run.
    ///
    /// Queries without a usable schema are skipped with a warning and
    /// counted; their groups are still recorded. Real SQL is resolved
    /// best-effort per query before the write. Nothing is persisted until
    /// every lookup has succeeded.
    pub async fn record_run(
        &self,
        result: &CandidateResult,
        options: &RunOptions,
    ) -> Result<RunRecordingReport, ClinicError> {
        let mut groups = Vec::new();
        let mut queries_recorded = 0usize;
        let mut queries_skipped = 0usize;

        for group in &result.groups {
            let mut queries = Vec::new();
            for candidate in &group.queries {
                if !has_usable_schema(&candidate.schema) {
                    tracing::warn!(
                        statement_id = %candidate.query_id,
                        schema = %candidate.schema,
                        "skipping query without usable schema"
                    );
                    queries_skipped += 1;
                    continue;
                }

                let real_query = self
                    .stats
                    .query_text(&candidate.query_id, &candidate.schema)
                    .await?;
                queries.push(QueryCreate {
                    query_id: candidate.query_id.clone(),
                    normalized_query: candidate.normalized_query.clone(),
                    real_query,
                    schema: candidate.schema.clone(),
                    impact_description: candidate.impact_description.clone(),
                });
                queries_recorded += 1;
            }
            groups.push(GroupCreate {
                name: group.name.clone(),
                description: group.description.clone(),
                queries,
            });
        }

        let run = self
            .store
            .record_run(
                RunCreate {
                    special_instructions: options.special_instructions.clone(),
                    hostname: self.hostname.clone(),
                    description: result.description.clone(),
                    use_real_query: options.use_real_query,
                    use_database_access: options.use_database_access,
                    conversation: result.conversation.clone(),
                    formatted_conversation: result.formatted_conversation.clone(),
                },
                groups,
            )
            .await?;

        tracing::debug!(
            run_id = run.id,
            queries_recorded,
            queries_skipped,
            "run recorded"
        );
        Ok(RunRecordingReport {
            run_id: run.id,
            groups_recorded: result.groups.len(),
            queries_recorded,
            queries_skipped,
        })
    }

    /// Batch-resolve real SQL for every query in the run that still lacks
    /// one. A resolved text is applied only to records whose schema matches
    /// the one the statistics store reported for it.
    pub async fn backfill_real_sql(&self, run_id: RunId) -> Result<BackfillReport, ClinicError> {
        let total_queries = self.store.queries_count(run_id).await?;
        let missing = self.store.queries_missing_real_sql(run_id).await?;
        if missing.is_empty() {
            return Ok(BackfillReport {
                total_queries,
                still_missing: 0,
            });
        }

        let mut ids: Vec<String> = missing.iter().map(|q| q.query_id.clone()).collect();
        ids.sort();
        ids.dedup();
        let resolved = self.stats.query_texts(&ids).await?;

        let mut by_id_and_schema: HashMap<(&str, &str), &str> = HashMap::new();
        for row in &resolved {
            by_id_and_schema
                .entry((row.query_id.as_str(), row.schema.as_str()))
                .or_insert(row.sql.as_str());
        }

        let mut still_missing = 0usize;
        for query in &missing {
            match by_id_and_schema.get(&(query.query_id.as_str(), query.schema.as_str())) {
                Some(sql) => self.store.set_real_query(query.id, sql).await?,
                None => still_missing += 1,
            }
        }

        tracing::debug!(run_id, total_queries, still_missing, "backfill finished");
        Ok(BackfillReport {
            total_queries,
            still_missing,
        })
    }
}

fn has_usable_schema(schema: &str) -> bool {
    !(schema.is_empty() || schema == "NULL" || schema == "unknown")
}
