//! Per-query analysis conversations, run concurrently as spawned tasks.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::db::{CatalogReader, PlanReader, QueryExecutor, StatementStats};
use crate::llm::{
    conversation_to_markdown, ChatClient, Conversation, ConversationEngine, ModelParams,
};
use crate::models::{AnalysisOutcome, CandidateQuery, QueryRecordId};
use crate::services::extraction::{resolve_against_catalog, LexicalTableExtractor, TableExtractor};
use crate::store::RunStore;
use crate::tools::{SandboxQueryTool, ToolSet};
use crate::ClinicError;

const ANALYSIS_TEMPERATURE: f32 = 1.0;
const ANALYSIS_MAX_TOKENS: u32 = 32_767;

/// A spawned analysis task. Dropping the handle detaches the task; the
/// analysis still runs to completion and persists its outcome.
pub struct AnalysisHandle {
    task: JoinHandle<Result<AnalysisOutcome, ClinicError>>,
}

impl AnalysisHandle {
    /// Await the outcome of the analysis.
    pub async fn join(self) -> Result<AnalysisOutcome, ClinicError> {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => {
                Err(ClinicError::Conversation("analysis task cancelled".to_string()))
            }
            Err(e) => Err(ClinicError::Conversation(format!(
                "analysis task failed: {}",
                e
            ))),
        }
    }

    /// Cancel the analysis. Persistence is a single store call, so an
    /// aborted task leaves either the full outcome recorded or nothing.
    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Builds one grounded prompt per candidate query and drives the analysis
/// conversation, persisting the outcome on completion.
#[derive(Clone)]
pub struct QueryAnalyzer {
    engine: ConversationEngine,
    stats: Arc<dyn StatementStats>,
    catalog: Arc<dyn CatalogReader>,
    plans: Arc<dyn PlanReader>,
    executor: Arc<dyn QueryExecutor>,
    store: Arc<dyn RunStore>,
    extractor: Arc<dyn TableExtractor>,
    model: String,
    cache_database_results: bool,
}

impl QueryAnalyzer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn ChatClient>,
        stats: Arc<dyn StatementStats>,
        catalog: Arc<dyn CatalogReader>,
        plans: Arc<dyn PlanReader>,
        executor: Arc<dyn QueryExecutor>,
        store: Arc<dyn RunStore>,
        model: impl Into<String>,
        cache_database_results: bool,
    ) -> Self {
        Self {
            engine: ConversationEngine::new(client),
            stats,
            catalog,
            plans,
            executor,
            store,
            extractor: Arc::new(LexicalTableExtractor),
            model: model.into(),
            cache_database_results,
        }
    }

    /// Swap the table extractor, e.g. for a real SQL parser.
    pub fn with_extractor(mut self, extractor: Arc<dyn TableExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Spawn the analysis of one recorded query.
    ///
    /// `raw_sql` is the already-known real SQL, if the caller has one;
    /// otherwise it is resolved from statement statistics and persisted for
    /// reuse. The task persists its conversation under `query_id` when it
    /// completes; the handle yields the same outcome.
    pub fn analyze_query(
        &self,
        query_id: QueryRecordId,
        raw_sql: Option<String>,
        candidate: &CandidateQuery,
        use_real_query: bool,
        use_database_access: bool,
    ) -> AnalysisHandle {
        let analyzer = self.clone();
        let candidate = candidate.clone();
        let task = tokio::spawn(async move {
            let result = analyzer
                .run_analysis(query_id, raw_sql, &candidate, use_real_query, use_database_access)
                .await;
            if let Err(error) = &result {
                tracing::error!(query_id, %error, "query analysis failed");
            }
            result
        });
        AnalysisHandle { task }
    }

    async fn run_analysis(
        &self,
        query_id: QueryRecordId,
        raw_sql: Option<String>,
        candidate: &CandidateQuery,
        use_real_query: bool,
        use_database_access: bool,
    ) -> Result<AnalysisOutcome, ClinicError> {
        let real_sql = match raw_sql {
            Some(sql) => Some(sql),
            None => {
                let resolved = self
                    .stats
                    .query_text(&candidate.query_id, &candidate.schema)
                    .await?;
                match &resolved {
                    Some(sql) => self.store.set_real_query(query_id, sql).await?,
                    None => tracing::debug!(
                        query_id,
                        statement_id = %candidate.query_id,
                        "no raw SQL in statement statistics"
                    ),
                }
                resolved
            }
        };

        let prompt_sql = match (&real_sql, use_real_query) {
            (Some(sql), true) => sql.as_str(),
            _ => candidate.normalized_query.as_str(),
        };

        let plan = match self.plans.explain(&candidate.schema, prompt_sql).await {
            Ok(plan) => plan,
            Err(error) => {
                tracing::warn!(query_id, %error, "EXPLAIN failed, continuing without plan");
                None
            }
        };

        let catalog_names = self.catalog.table_names(&candidate.schema).await?;
        let extracted = self.extractor.tables(prompt_sql);
        let resolved = resolve_against_catalog(&extracted, &catalog_names);
        let ddls = futures::future::try_join_all(
            resolved
                .iter()
                .map(|table| self.catalog.table_ddl(&candidate.schema, table)),
        )
        .await?;
        let tables: Vec<(String, String)> = resolved
            .into_iter()
            .zip(ddls)
            .filter_map(|(table, ddl)| ddl.map(|d| (table, d)))
            .collect();

        let prompt = analysis_prompt(&PromptContext {
            sql: prompt_sql,
            use_database_access,
            plan: plan.as_deref(),
            tables: &tables,
            schema: &candidate.schema,
            query_id: &candidate.query_id,
        });

        let conversation = self
            .send_conversation(
                Conversation::from_user_prompt(prompt),
                use_database_access,
                &candidate.schema,
            )
            .await?;

        let outcome = AnalysisOutcome {
            formatted_conversation: conversation_to_markdown(&conversation),
            conversation,
        };
        self.store.save_analysis(query_id, outcome.clone()).await?;
        Ok(outcome)
    }

    /// Append a follow-up user prompt to a finished conversation and run the
    /// loop again with the same tool wiring. The caller persists the result
    /// if desired.
    pub async fn continue_conversation(
        &self,
        conversation: Conversation,
        prompt: &str,
        use_database_access: bool,
        schema: &str,
    ) -> Result<Conversation, ClinicError> {
        let conversation = conversation.with_message(crate::llm::Message::user(prompt))?;
        self.send_conversation(conversation, use_database_access, schema)
            .await
    }

    async fn send_conversation(
        &self,
        conversation: Conversation,
        use_database_access: bool,
        schema: &str,
    ) -> Result<Conversation, ClinicError> {
        let mut tools = ToolSet::new();
        if use_database_access {
            tools.register(SandboxQueryTool::new(
                self.executor.clone(),
                schema,
                self.cache_database_results,
            ))?;
        }

        let params = ModelParams {
            model: self.model.clone(),
            temperature: ANALYSIS_TEMPERATURE,
            max_tokens: ANALYSIS_MAX_TOKENS,
        };
        self.engine.run(conversation, &tools, &params).await
    }
}

struct PromptContext<'a> {
    sql: &'a str,
    use_database_access: bool,
    plan: Option<&'a str>,
    tables: &'a [(String, String)],
    schema: &'a str,
    query_id: &'a str,
}

/// Assemble the analysis prompt from its grounded parts.
fn analysis_prompt(ctx: &PromptContext) -> String {
    let mut sections = vec![
        "I need help with optimizing a PostgreSQL 13 query. I have identified this \
         query using pg_stat_statements as consuming too many resources. I will \
         provide you with an example query and the schema of tables used in the \
         query."
            .to_string(),
        "Analyze all information and provide me with instructions to change the \
         query, update the schema or how to split it into more manageable queries."
            .to_string(),
        format!("### Query\n```\n{}\n```", ctx.sql),
    ];

    if ctx.use_database_access {
        sections.push(
            "### Additional information\n\nUse the provided tool to get more information \
             about tables or their data structure if needed. You can also use it to check \
             statistics in pg_stat_statements by the provided query id."
                .to_string(),
        );
    }

    if let Some(plan) = ctx.plan {
        sections.push(format!("### Explain result\n```\n{}\n```", plan));
    }

    let mut schema_section = String::from("### Schema of tables and their indexes");
    for (table, ddl) in ctx.tables {
        schema_section.push_str(&format!("\n\n#### {}\n```\n{}\n```", table, ddl));
    }
    sections.push(schema_section);

    sections.push(format!(
        "## General information\n\nDatabase: {}\n\nQuery id: {}",
        ctx.schema, ctx.query_id
    ));

    sections.join("\n\n")
}
