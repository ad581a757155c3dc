use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use watchtower::{
    ExecutionParams, ExecutionQuery, ExecutionTracker, MetricsStore, PricingTable, TraceClient,
    TrackerConfig,
};

fn tracker_over(store: Arc<MetricsStore>) -> ExecutionTracker {
    ExecutionTracker::new(
        store,
        Arc::new(PricingTable::with_defaults()),
        TraceClient::noop(),
    )
}

#[tokio::test]
async fn successful_scope_persists_one_record() {
    let store = Arc::new(MetricsStore::in_memory().await.unwrap());
    let tracker = tracker_over(store.clone());

    let params = ExecutionParams::new("diagnose")
        .with_description("intent detection")
        .with_ticket("TKT-9")
        .with_category("cat-1", "Printing")
        .with_input("one two three four");

    let outcome: Result<&str, String> = tracker
        .track(params, |scope| {
            Box::pin(async move {
                scope.add_tool_call("search_kb", json!({"q": "offline"}), json!({"hits": 1}));
                scope.set_output("five six");
                Ok("resolved")
            })
        })
        .await;
    assert_eq!(outcome.unwrap(), "resolved");

    let rows = store.executions(&ExecutionQuery::new()).await.unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.agent_name, "diagnose");
    assert_eq!(row.agent_description.as_deref(), Some("intent detection"));
    assert_eq!(row.ticket_id.as_deref(), Some("TKT-9"));
    assert_eq!(row.category_id.as_deref(), Some("cat-1"));
    assert!(row.success);
    assert!(row.error_message.is_none());
    assert!(row.latency_ms >= 0);
    assert_eq!(row.tool_calls.len(), 1);

    // 4 input words * 1.3 = 5, 2 output words * 1.3 = 2.
    assert_eq!(row.tokens_input, 5);
    assert_eq!(row.tokens_output, 2);
    assert_eq!(row.tokens_total, 7);
    let expected_cost = PricingTable::with_defaults().estimate("gpt-4o-mini", 5, 2);
    assert!((row.cost_usd - expected_cost).abs() < 1e-12);
}

#[tokio::test]
async fn failing_scope_still_persists_and_reraises() {
    let store = Arc::new(MetricsStore::in_memory().await.unwrap());
    let tracker = tracker_over(store.clone());

    let outcome: Result<(), String> = tracker
        .track(ExecutionParams::new("verify"), |_scope| {
            Box::pin(async move { Err("verification failed".to_string()) })
        })
        .await;
    assert_eq!(outcome.unwrap_err(), "verification failed");

    let rows = store.executions(&ExecutionQuery::new()).await.unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert!(!row.success);
    assert_eq!(row.error_message.as_deref(), Some("verification failed"));
    assert!(!row.error_message.as_deref().unwrap().is_empty());
}

#[tokio::test]
async fn raised_error_overwrites_earlier_set_error() {
    let store = Arc::new(MetricsStore::in_memory().await.unwrap());
    let tracker = tracker_over(store.clone());

    let outcome: Result<(), String> = tracker
        .track(ExecutionParams::new("act"), |scope| {
            Box::pin(async move {
                scope.set_error("transient hiccup");
                Err("fatal: device unreachable".to_string())
            })
        })
        .await;
    assert!(outcome.is_err());

    let rows = store.executions(&ExecutionQuery::new()).await.unwrap();
    assert_eq!(
        rows[0].error_message.as_deref(),
        Some("fatal: device unreachable")
    );
}

#[tokio::test]
async fn last_output_wins() {
    let store = Arc::new(MetricsStore::in_memory().await.unwrap());
    let tracker = tracker_over(store.clone());

    let outcome: Result<(), String> = tracker
        .track(ExecutionParams::new("diagnose"), |scope| {
            Box::pin(async move {
                scope.set_output("first draft");
                scope.set_output("final answer");
                Ok(())
            })
        })
        .await;
    assert!(outcome.is_ok());

    let rows = store.executions(&ExecutionQuery::new()).await.unwrap();
    assert_eq!(rows[0].output_text.as_deref(), Some("final answer"));
}

#[tokio::test]
async fn authoritative_token_counts_override_estimates() {
    let store = Arc::new(MetricsStore::in_memory().await.unwrap());
    let tracker = tracker_over(store.clone());

    let mut scope = tracker.begin(ExecutionParams::new("diagnose").with_input("ignored words"));
    scope.set_output("ignored as well");
    scope.set_token_counts(100, 200);
    let record = tracker.finish(scope).await;

    assert_eq!(record.tokens_input, 100);
    assert_eq!(record.tokens_output, 200);
    assert_eq!(record.tokens_total, 300);
    let expected_cost = PricingTable::with_defaults().estimate("gpt-4o-mini", 100, 200);
    assert!((record.cost_usd - expected_cost).abs() < 1e-12);

    let rows = store.executions(&ExecutionQuery::new()).await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn per_agent_model_config_drives_pricing() {
    let store = Arc::new(MetricsStore::in_memory().await.unwrap());
    let tracker = tracker_over(store.clone()).with_config(TrackerConfig {
        default_model: "gpt-4o-mini".to_string(),
        agent_models: HashMap::from([(
            "escalate".to_string(),
            "claude-3-haiku-20240307".to_string(),
        )]),
    });

    let mut scope = tracker.begin(ExecutionParams::new("escalate"));
    scope.set_token_counts(1_000_000, 0);
    let record = tracker.finish(scope).await;

    // claude-3-haiku input price: 0.25 per 1M tokens.
    assert!((record.cost_usd - 0.25).abs() < 1e-9);
}

#[tokio::test]
async fn supplied_trace_id_is_reused_and_span_minted() {
    let store = Arc::new(MetricsStore::in_memory().await.unwrap());
    let tracker = tracker_over(store.clone());

    let params = ExecutionParams::new("diagnose")
        .with_trace("trace-workflow-7")
        .with_parent_span("span-root");
    let scope = tracker.begin(params);
    assert_eq!(scope.trace_id(), "trace-workflow-7");
    let span_id = scope.span_id().to_string();
    assert!(!span_id.is_empty());

    let record = tracker.finish(scope).await;
    assert_eq!(record.trace_id, "trace-workflow-7");
    assert_eq!(record.span_id, span_id);
}

#[tokio::test]
async fn store_write_failure_never_masks_the_outcome() {
    let store = Arc::new(MetricsStore::in_memory().await.unwrap());
    let tracker = tracker_over(store.clone());
    store.close().await;

    let outcome: Result<&str, String> = tracker
        .track(ExecutionParams::new("diagnose"), |scope| {
            Box::pin(async move {
                scope.set_output("still fine");
                Ok("done")
            })
        })
        .await;

    // The insert failed (closed pool) but the caller sees its own result.
    assert_eq!(outcome.unwrap(), "done");
}
