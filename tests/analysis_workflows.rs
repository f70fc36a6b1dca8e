//! Integration tests for per-query analysis workflows.
//!
//! Each analysis resolves the raw SQL, grounds the prompt with an execution
//! plan and catalog DDL, drives the conversation in a spawned task, and
//! persists the outcome under the recorded query. Tests seed a run through
//! the store first so every analysis targets a real query record.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use sqlclinic::db::PlanReader;
use sqlclinic::llm::{ChatClient, ChatRequest, Conversation, Message, ModelTurn, ScriptedChatClient};
use sqlclinic::models::{CandidateQuery, GroupCreate, QueryCreate, QueryRecord, RunCreate};
use sqlclinic::services::QueryAnalyzer;
use sqlclinic::store::{MemoryRunStore, RunStore};
use sqlclinic::ClinicError;

use common::builders::{tool_call_turn, CandidateBuilder};
use common::fakes::{FakeCatalog, FakeExecutor, FakePlans, FakeStats};
use common::init_tracing;

const ANALYSIS_MODEL: &str = "gpt-4.1-2025-04-14";

/// Transport that never answers; the conversation hangs until aborted.
struct StalledClient;

#[async_trait]
impl ChatClient for StalledClient {
    async fn complete(&self, _request: ChatRequest<'_>) -> Result<ModelTurn, ClinicError> {
        std::future::pending().await
    }
}

/// Plan source whose backend is down.
struct FailingPlans;

#[async_trait]
impl PlanReader for FailingPlans {
    async fn explain(&self, _schema: &str, _sql: &str) -> Result<Option<String>, ClinicError> {
        Err(ClinicError::Database("explain backend unreachable".to_string()))
    }
}

/// Record a run holding the given candidates as one group and return the
/// stored query records, in submission order.
async fn seed_queries(store: &MemoryRunStore, candidates: &[CandidateQuery]) -> Vec<QueryRecord> {
    let run = store
        .record_run(
            RunCreate {
                special_instructions: None,
                hostname: "db.internal:5432".to_string(),
                description: "seeded run".to_string(),
                use_real_query: true,
                use_database_access: false,
                conversation: Conversation::new(),
                formatted_conversation: String::new(),
            },
            vec![GroupCreate {
                name: "execution time".to_string(),
                description: "highest total execution time".to_string(),
                queries: candidates
                    .iter()
                    .map(|c| QueryCreate {
                        query_id: c.query_id.clone(),
                        normalized_query: c.normalized_query.clone(),
                        real_query: None,
                        schema: c.schema.clone(),
                        impact_description: c.impact_description.clone(),
                    })
                    .collect(),
            }],
        )
        .await
        .expect("Should record seed run");
    store
        .queries(run.id)
        .await
        .expect("Should list seeded queries")
}

fn analyzer_with(
    client: Arc<ScriptedChatClient>,
    stats: FakeStats,
    plans: FakePlans,
    executor: Arc<FakeExecutor>,
    store: Arc<MemoryRunStore>,
) -> QueryAnalyzer {
    QueryAnalyzer::new(
        client,
        Arc::new(stats),
        Arc::new(FakeCatalog::new("shop", &["orders", "order_items"])),
        Arc::new(plans),
        executor,
        store,
        ANALYSIS_MODEL,
        false,
    )
}

// ============================================================================
// PROMPT GROUNDING TESTS
// ============================================================================

/// Test that the resolved raw SQL is prompted and persisted when enabled.
#[tokio::test]
async fn test_real_query_is_resolved_prompted_and_persisted() {
    init_tracing();
    let store = Arc::new(MemoryRunStore::default());
    let candidate = CandidateBuilder::new("4242").build();
    let record = seed_queries(&store, std::slice::from_ref(&candidate))
        .await
        .remove(0);

    let client = Arc::new(ScriptedChatClient::new(vec![Message::assistant_text(
        "Add an index on orders(customer_id).",
    )]));
    let analyzer = analyzer_with(
        client.clone(),
        FakeStats::new(&[(
            "4242",
            "shop",
            "SELECT * FROM orders WHERE customer_id = 18",
        )]),
        FakePlans::with_plan("Seq Scan on orders  (cost=0.00..431.00 rows=21000 width=8)"),
        Arc::new(FakeExecutor::replying("| n |\n| 1 |")),
        store.clone(),
    );

    let outcome = analyzer
        .analyze_query(record.id, None, &candidate, true, false)
        .join()
        .await
        .expect("Should finish analysis");

    let requests = client.requests();
    assert_eq!(requests.len(), 1);
    let prompt = requests[0].messages[0]
        .text()
        .expect("Analysis prompt should carry text");
    assert!(prompt.contains("SELECT * FROM orders WHERE customer_id = 18"));
    assert!(prompt.contains("### Explain result"));
    assert!(prompt.contains("Seq Scan on orders"));
    assert!(prompt.contains("#### orders"));
    assert!(prompt.contains("Database: shop"));
    assert!(prompt.contains("Query id: 4242"));
    // No database access: no tools declared, no addendum in the prompt.
    assert!(requests[0].tool_names.is_empty());
    assert!(!prompt.contains("### Additional information"));
    assert_eq!(requests[0].params.model, ANALYSIS_MODEL);
    assert_eq!(requests[0].params.max_tokens, 32_767);

    // Both the resolved SQL and the outcome landed in the store.
    let stored = store
        .query(record.id)
        .await
        .expect("Should read query record")
        .expect("Query record should exist");
    assert_eq!(
        stored.real_query.as_deref(),
        Some("SELECT * FROM orders WHERE customer_id = 18")
    );
    let analysis = stored.analysis.expect("Analysis should be persisted");
    assert!(analysis
        .formatted_conversation
        .contains("Add an index on orders(customer_id)."));
    assert_eq!(outcome.conversation, analysis.conversation);
}

/// Test that the normalized sample is prompted when raw SQL is disabled,
/// while the resolved SQL is still persisted for later use.
#[tokio::test]
async fn test_normalized_query_prompted_when_real_disabled() {
    init_tracing();
    let store = Arc::new(MemoryRunStore::default());
    let candidate = CandidateBuilder::new("4242").build();
    let record = seed_queries(&store, std::slice::from_ref(&candidate))
        .await
        .remove(0);

    let client = Arc::new(ScriptedChatClient::new(vec![Message::assistant_text(
        "Looks fine as written.",
    )]));
    let analyzer = analyzer_with(
        client.clone(),
        FakeStats::new(&[(
            "4242",
            "shop",
            "SELECT * FROM orders WHERE customer_id = 18",
        )]),
        FakePlans::unavailable(),
        Arc::new(FakeExecutor::replying("| n |\n| 1 |")),
        store.clone(),
    );

    analyzer
        .analyze_query(record.id, None, &candidate, false, false)
        .join()
        .await
        .expect("Should finish analysis");

    let prompt = client.requests()[0].messages[0]
        .text()
        .expect("Analysis prompt should carry text");
    assert!(prompt.contains("SELECT * FROM orders WHERE customer_id = $1"));
    assert!(!prompt.contains("customer_id = 18"));

    let stored = store
        .query(record.id)
        .await
        .expect("Should read query record")
        .expect("Query record should exist");
    assert_eq!(
        stored.real_query.as_deref(),
        Some("SELECT * FROM orders WHERE customer_id = 18")
    );
}

/// Test that a dead EXPLAIN backend downgrades to a plan-less prompt.
#[tokio::test]
async fn test_plan_failure_downgrades_to_missing_plan() {
    init_tracing();
    let store = Arc::new(MemoryRunStore::default());
    let candidate = CandidateBuilder::new("4242").build();
    let record = seed_queries(&store, std::slice::from_ref(&candidate))
        .await
        .remove(0);

    let client = Arc::new(ScriptedChatClient::new(vec![Message::assistant_text(
        "Consider a partial index.",
    )]));
    let analyzer = QueryAnalyzer::new(
        client.clone(),
        Arc::new(FakeStats::default()),
        Arc::new(FakeCatalog::new("shop", &["orders", "order_items"])),
        Arc::new(FailingPlans),
        Arc::new(FakeExecutor::replying("| n |\n| 1 |")),
        store.clone(),
        ANALYSIS_MODEL,
        false,
    );

    analyzer
        .analyze_query(record.id, None, &candidate, false, false)
        .join()
        .await
        .expect("Plan failure should not abort the analysis");

    let prompt = client.requests()[0].messages[0]
        .text()
        .expect("Analysis prompt should carry text");
    assert!(!prompt.contains("### Explain result"));
    assert!(prompt.contains("### Schema of tables and their indexes"));

    let stored = store
        .query(record.id)
        .await
        .expect("Should read query record")
        .expect("Query record should exist");
    assert!(stored.analysis.is_some());
}

/// Test that tables absent from the catalog stay out of the schema section.
#[tokio::test]
async fn test_unknown_tables_stay_out_of_the_schema_section() {
    init_tracing();
    let store = Arc::new(MemoryRunStore::default());
    let candidate = CandidateBuilder::new("4242")
        .normalized_query(
            "SELECT o.id FROM orders o JOIN archived_orders a ON a.order_id = o.id",
        )
        .build();
    let record = seed_queries(&store, std::slice::from_ref(&candidate))
        .await
        .remove(0);

    let client = Arc::new(ScriptedChatClient::new(vec![Message::assistant_text(
        "The join has no supporting index.",
    )]));
    let analyzer = analyzer_with(
        client.clone(),
        FakeStats::default(),
        FakePlans::unavailable(),
        Arc::new(FakeExecutor::replying("| n |\n| 1 |")),
        store.clone(),
    );

    analyzer
        .analyze_query(record.id, None, &candidate, false, false)
        .join()
        .await
        .expect("Should finish analysis");

    let prompt = client.requests()[0].messages[0]
        .text()
        .expect("Analysis prompt should carry text");
    assert!(prompt.contains("#### orders"));
    assert!(!prompt.contains("#### archived_orders"));
}

// ============================================================================
// DATABASE ACCESS TESTS
// ============================================================================

/// Test that database access declares the sandbox tool, scoped to the
/// candidate's schema, and adds the prompt addendum.
#[tokio::test]
async fn test_database_access_scopes_the_sandbox_tool() {
    init_tracing();
    let store = Arc::new(MemoryRunStore::default());
    let candidate = CandidateBuilder::new("4242").build();
    let record = seed_queries(&store, std::slice::from_ref(&candidate))
        .await
        .remove(0);

    let executor = Arc::new(FakeExecutor::replying("| count |\n| 21000 |"));
    let client = Arc::new(ScriptedChatClient::new(vec![
        tool_call_turn(
            "c1",
            "database_query",
            serde_json::json!({"query": "SELECT count(*) FROM orders"}),
        ),
        Message::assistant_text("The table is large enough to warrant an index."),
    ]));
    let analyzer = analyzer_with(
        client.clone(),
        FakeStats::default(),
        FakePlans::unavailable(),
        executor.clone(),
        store.clone(),
    );

    analyzer
        .analyze_query(record.id, None, &candidate, false, true)
        .join()
        .await
        .expect("Should finish analysis");

    let requests = client.requests();
    assert_eq!(requests[0].tool_names, vec!["database_query"]);
    let prompt = requests[0].messages[0]
        .text()
        .expect("Analysis prompt should carry text");
    assert!(prompt.contains("### Additional information"));

    // The exploratory query ran against the candidate's schema.
    let calls = executor.calls.lock().expect("Should read recorded calls");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "shop");
    assert_eq!(calls[0].1, "SELECT count(*) FROM orders");
    assert_eq!(calls[0].3, 250);
}

// ============================================================================
// TASK LIFECYCLE TESTS
// ============================================================================

/// Test that concurrent analyses write their own outcomes, not each other's.
#[tokio::test]
async fn test_concurrent_analyses_stay_isolated() {
    init_tracing();
    let store = Arc::new(MemoryRunStore::default());
    let first = CandidateBuilder::new("4242").build();
    let second = CandidateBuilder::new("4243")
        .normalized_query("SELECT * FROM order_items WHERE order_id = $1")
        .build();
    let records = seed_queries(&store, &[first.clone(), second.clone()]).await;

    let client_a = Arc::new(ScriptedChatClient::new(vec![Message::assistant_text(
        "Index orders(customer_id).",
    )]));
    let client_b = Arc::new(ScriptedChatClient::new(vec![Message::assistant_text(
        "Index order_items(order_id).",
    )]));
    let analyzer_a = analyzer_with(
        client_a,
        FakeStats::default(),
        FakePlans::unavailable(),
        Arc::new(FakeExecutor::replying("| n |\n| 1 |")),
        store.clone(),
    );
    let analyzer_b = analyzer_with(
        client_b,
        FakeStats::default(),
        FakePlans::unavailable(),
        Arc::new(FakeExecutor::replying("| n |\n| 1 |")),
        store.clone(),
    );

    let handle_a = analyzer_a.analyze_query(records[0].id, None, &first, false, false);
    let handle_b = analyzer_b.analyze_query(records[1].id, None, &second, false, false);
    let (outcome_a, outcome_b) = tokio::join!(handle_a.join(), handle_b.join());
    outcome_a.expect("First analysis should finish");
    outcome_b.expect("Second analysis should finish");

    let stored_a = store
        .query(records[0].id)
        .await
        .expect("Should read first record")
        .expect("First record should exist")
        .analysis
        .expect("First analysis should be persisted");
    let stored_b = store
        .query(records[1].id)
        .await
        .expect("Should read second record")
        .expect("Second record should exist")
        .analysis
        .expect("Second analysis should be persisted");
    assert!(stored_a
        .formatted_conversation
        .contains("Index orders(customer_id)."));
    assert!(stored_b
        .formatted_conversation
        .contains("Index order_items(order_id)."));
}

/// Test that re-analyzing a query replaces the stored outcome.
#[tokio::test]
async fn test_reanalysis_overwrites_previous_outcome() {
    init_tracing();
    let store = Arc::new(MemoryRunStore::default());
    let candidate = CandidateBuilder::new("4242").build();
    let record = seed_queries(&store, std::slice::from_ref(&candidate))
        .await
        .remove(0);

    for verdict in ["First pass: add an index.", "Second pass: rewrite the join."] {
        let client = Arc::new(ScriptedChatClient::new(vec![Message::assistant_text(
            verdict,
        )]));
        let analyzer = analyzer_with(
            client,
            FakeStats::default(),
            FakePlans::unavailable(),
            Arc::new(FakeExecutor::replying("| n |\n| 1 |")),
            store.clone(),
        );
        analyzer
            .analyze_query(record.id, None, &candidate, false, false)
            .join()
            .await
            .expect("Should finish analysis");
    }

    let stored = store
        .query(record.id)
        .await
        .expect("Should read query record")
        .expect("Query record should exist")
        .analysis
        .expect("Analysis should be persisted");
    assert!(stored
        .formatted_conversation
        .contains("Second pass: rewrite the join."));
    assert!(!stored.formatted_conversation.contains("First pass"));
}

/// Test that a follow-up prompt extends the finished conversation.
#[tokio::test]
async fn test_follow_up_extends_the_conversation() {
    init_tracing();
    let store = Arc::new(MemoryRunStore::default());
    let candidate = CandidateBuilder::new("4242").build();
    let record = seed_queries(&store, std::slice::from_ref(&candidate))
        .await
        .remove(0);

    let client = Arc::new(ScriptedChatClient::new(vec![
        Message::assistant_text("Add an index on orders(customer_id)."),
        Message::assistant_text("Partitioning would not help at this row count."),
    ]));
    let analyzer = analyzer_with(
        client,
        FakeStats::default(),
        FakePlans::unavailable(),
        Arc::new(FakeExecutor::replying("| n |\n| 1 |")),
        store.clone(),
    );

    let outcome = analyzer
        .analyze_query(record.id, None, &candidate, false, false)
        .join()
        .await
        .expect("Should finish analysis");
    let before = outcome.conversation.len();

    let extended = analyzer
        .continue_conversation(
            outcome.conversation,
            "Would partitioning help here?",
            false,
            &candidate.schema,
        )
        .await
        .expect("Should run the follow-up round");

    assert_eq!(extended.len(), before + 2);
    assert_eq!(
        extended.last_text(),
        Some("Partitioning would not help at this row count.".to_string())
    );
    let follow_up = &extended.messages()[before];
    assert_eq!(
        follow_up.text().as_deref(),
        Some("Would partitioning help here?")
    );
}

/// Test that aborting an in-flight analysis surfaces as a cancelled join.
#[tokio::test]
async fn test_abort_cancels_a_stalled_analysis() {
    init_tracing();
    let store = Arc::new(MemoryRunStore::default());
    let candidate = CandidateBuilder::new("4242").build();
    let record = seed_queries(&store, std::slice::from_ref(&candidate))
        .await
        .remove(0);

    let analyzer = QueryAnalyzer::new(
        Arc::new(StalledClient),
        Arc::new(FakeStats::default()),
        Arc::new(FakeCatalog::new("shop", &["orders"])),
        Arc::new(FakePlans::unavailable()),
        Arc::new(FakeExecutor::replying("| n |\n| 1 |")),
        store.clone(),
        ANALYSIS_MODEL,
        false,
    );

    let handle = analyzer.analyze_query(record.id, None, &candidate, false, false);
    assert!(!handle.is_finished());
    handle.abort();

    let error = handle.join().await.expect_err("Join should report the abort");
    assert!(matches!(error, ClinicError::Conversation(_)));
    assert!(error.to_string().contains("cancelled"));

    // Nothing was persisted for the aborted task.
    let stored = store
        .query(record.id)
        .await
        .expect("Should read query record")
        .expect("Query record should exist");
    assert!(stored.analysis.is_none());
}

/// Test that analyzing an unknown query record fails at persistence.
#[tokio::test]
async fn test_unknown_query_record_fails_persistence() {
    init_tracing();
    let store = Arc::new(MemoryRunStore::default());
    let candidate = CandidateBuilder::new("4242").build();

    let client = Arc::new(ScriptedChatClient::new(vec![Message::assistant_text(
        "Nothing to see.",
    )]));
    let analyzer = analyzer_with(
        client,
        FakeStats::default(),
        FakePlans::unavailable(),
        Arc::new(FakeExecutor::replying("| n |\n| 1 |")),
        store,
    );

    let error = analyzer
        .analyze_query(999, None, &candidate, false, false)
        .join()
        .await
        .expect_err("Persisting under a missing record should fail");
    assert!(matches!(error, ClinicError::Persistence(_)));
    assert!(error.to_string().contains("999"));
}
