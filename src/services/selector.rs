//! Candidate selection: one model conversation over statement statistics.

use std::sync::Arc;

use crate::db::QueryExecutor;
use crate::llm::{
    conversation_to_markdown, ChatClient, Conversation, ConversationEngine, ModelParams,
};
use crate::models::CandidateResult;
use crate::tools::{SelectionLog, StatStatementsQueryTool, SubmitSelectionTool, ToolSet};
use crate::ClinicError;

const SELECTION_TEMPERATURE: f32 = 1.0;
const SELECTION_MAX_TOKENS: u32 = 120_000;

/// Drives the selection conversation: the model inspects
/// `pg_stat_statements` through the statistics tool and submits groups of
/// optimization candidates.
pub struct CandidateSelector {
    engine: ConversationEngine,
    executor: Arc<dyn QueryExecutor>,
    model: String,
    cache_statistics_results: bool,
}

impl CandidateSelector {
    pub fn new(
        client: Arc<dyn ChatClient>,
        executor: Arc<dyn QueryExecutor>,
        model: impl Into<String>,
        cache_statistics_results: bool,
    ) -> Self {
        Self {
            engine: ConversationEngine::new(client),
            executor,
            model: model.into(),
            cache_statistics_results,
        }
    }

    /// Run one selection session.
    ///
    /// A model that never calls `submit_selection` yields a result with zero
    /// groups; that is a degenerate outcome, not an error. Transport
    /// failures abort the session with nothing to hand back.
    pub async fn select_candidates(
        &self,
        special_instructions: Option<&str>,
    ) -> Result<CandidateResult, ClinicError> {
        let log = SelectionLog::new();

        let mut tools = ToolSet::new();
        tools.register(StatStatementsQueryTool::new(
            self.executor.clone(),
            self.cache_statistics_results,
        ))?;
        tools.register(SubmitSelectionTool::new(log.clone()))?;

        let params = ModelParams {
            model: self.model.clone(),
            temperature: SELECTION_TEMPERATURE,
            max_tokens: SELECTION_MAX_TOKENS,
        };
        let conversation = Conversation::from_user_prompt(selection_prompt(special_instructions));
        let conversation = self.engine.run(conversation, &tools, &params).await?;

        let groups = log.groups()?;
        tracing::debug!(
            groups = groups.len(),
            "selection conversation finished"
        );

        Ok(CandidateResult {
            description: conversation.last_text().unwrap_or_default(),
            groups,
            formatted_conversation: conversation_to_markdown(&conversation),
            conversation,
        })
    }
}

/// The fixed selection prompt, with operator instructions appended verbatim
/// when present.
fn selection_prompt(special_instructions: Option<&str>) -> String {
    let mut prompt = String::from(
        "I need help to optimize my SQL queries on a PostgreSQL 13 server. I will \
         provide a tool to query pg_stat_statements and expect specific queries to \
         optimize.\n\
         \n\
         Query optimization can be approached from different perspectives like \
         execution time, memory usage, IOPS usage, etc. You must consider multiple \
         optimization types and request query candidates with different queries to \
         the statistics view.\n\
         \n\
         Table pg_stat_statements looks like:\n\
         \n\
         CREATE TABLE public.pg_stat_statements (\n\
         datname text,\n\
         rolname text,\n\
         userid oid,\n\
         dbid oid,\n\
         queryid bigint,\n\
         query text,\n\
         plans bigint,\n\
         total_plan_time double precision,\n\
         min_plan_time double precision,\n\
         max_plan_time double precision,\n\
         mean_plan_time double precision,\n\
         stddev_plan_time double precision,\n\
         calls bigint,\n\
         total_exec_time double precision,\n\
         min_exec_time double precision,\n\
         max_exec_time double precision,\n\
         mean_exec_time double precision,\n\
         stddev_exec_time double precision,\n\
         rows bigint,\n\
         shared_blks_hit bigint,\n\
         shared_blks_read bigint,\n\
         shared_blks_dirtied bigint,\n\
         shared_blks_written bigint,\n\
         local_blks_hit bigint,\n\
         local_blks_read bigint,\n\
         local_blks_dirtied bigint,\n\
         local_blks_written bigint,\n\
         temp_blks_read bigint,\n\
         temp_blks_written bigint,\n\
         blk_read_time double precision,\n\
         blk_write_time double precision,\n\
         wal_records bigint,\n\
         wal_fpi bigint,\n\
         wal_bytes numeric\n\
         );\n\
         \n\
         For analysis use only attributes that exist in this table.\n\
         \n\
         After examining each group, you MUST submit your selection of queries for \
         this group using tool \"submit_selection\". I am expecting to get at least \
         four groups with 20 queries each. DO NOT end your response asking if you \
         should proceed. Actually submit the selections immediately.",
    );

    if let Some(instructions) = special_instructions.filter(|s| !s.is_empty()) {
        prompt.push_str("\n\n**Special instructions:**\n\n");
        prompt.push_str(instructions);
    }
    prompt
}
