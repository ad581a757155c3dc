mod common;

use chrono::{Duration, NaiveDate, Utc};
use common::{execution_at, resolution_at};
use serde_json::json;
use watchtower::{
    ExecutionQuery, MetricsStore, ResolutionQuery, ResolutionType, RollupQuery, TimeRange,
    ToolCallRecord,
};

#[tokio::test]
async fn execution_round_trips_including_tool_calls() {
    let store = MetricsStore::in_memory().await.unwrap();

    let mut record = execution_at("diagnose", true, 120, Utc::now());
    record.input_text = Some("printer offline".to_string());
    record.output_text = Some("power cycled".to_string());
    record.ticket_id = Some("TKT-1".to_string());
    record.tool_calls = vec![ToolCallRecord {
        tool_name: "search_kb".to_string(),
        input: json!({"query": "printer offline"}),
        output: json!({"results": ["kb-17"]}),
    }];

    let id = store.insert_execution(&record).await.unwrap();
    assert!(id > 0);

    let rows = store.executions(&ExecutionQuery::new()).await.unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.agent_name, "diagnose");
    assert_eq!(row.ticket_id.as_deref(), Some("TKT-1"));
    assert_eq!(row.trace_id, record.trace_id);
    assert_eq!(row.latency_ms, 120);
    assert_eq!(row.tokens_total, row.tokens_input + row.tokens_output);
    assert!(row.success);
    assert!(row.error_message.is_none());
    assert_eq!(row.tool_calls, record.tool_calls);
}

#[tokio::test]
async fn execution_without_tool_calls_reads_back_empty() {
    let store = MetricsStore::in_memory().await.unwrap();
    store
        .insert_execution(&execution_at("verify", true, 30, Utc::now()))
        .await
        .unwrap();

    let rows = store.executions(&ExecutionQuery::new()).await.unwrap();
    assert!(rows[0].tool_calls.is_empty());
}

#[tokio::test]
async fn execution_filters_are_conjunctive() {
    let store = MetricsStore::in_memory().await.unwrap();
    let now = Utc::now();

    store
        .insert_execution(&execution_at("diagnose", true, 100, now - Duration::hours(2)))
        .await
        .unwrap();
    store
        .insert_execution(&execution_at("diagnose", true, 100, now))
        .await
        .unwrap();
    store
        .insert_execution(&execution_at("verify", true, 100, now))
        .await
        .unwrap();

    let query = ExecutionQuery::new()
        .with_agent("diagnose")
        .with_range(TimeRange::trailing(now, Duration::hours(1)));
    let rows = store.executions(&query).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].agent_name, "diagnose");

    // No filters: everything comes back, newest first.
    let all = store.executions(&ExecutionQuery::new()).await.unwrap();
    assert_eq!(all.len(), 3);
    assert!(all[0].timestamp >= all[2].timestamp);
}

#[tokio::test]
async fn execution_limit_caps_rows() {
    let store = MetricsStore::in_memory().await.unwrap();
    let now = Utc::now();
    for i in 0..5 {
        store
            .insert_execution(&execution_at("diagnose", true, 100, now - Duration::minutes(i)))
            .await
            .unwrap();
    }

    let rows = store
        .executions(&ExecutionQuery::new().with_limit(2))
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn duplicate_ticket_resolution_is_rejected() {
    let store = MetricsStore::in_memory().await.unwrap();
    let now = Utc::now();

    store
        .insert_resolution(&resolution_at("TKT-1", ResolutionType::AutoResolved, Some(30), now))
        .await
        .unwrap();
    let err = store
        .insert_resolution(&resolution_at("TKT-1", ResolutionType::Escalated, None, now))
        .await;
    assert!(err.is_err());
}

#[tokio::test]
async fn resolution_range_filters_on_created_at() {
    let store = MetricsStore::in_memory().await.unwrap();
    let now = Utc::now();

    store
        .insert_resolution(&resolution_at(
            "TKT-old",
            ResolutionType::AutoResolved,
            Some(30),
            now - Duration::days(2),
        ))
        .await
        .unwrap();
    store
        .insert_resolution(&resolution_at(
            "TKT-new",
            ResolutionType::AutoResolved,
            Some(30),
            now,
        ))
        .await
        .unwrap();

    let rows = store
        .resolutions(
            &ResolutionQuery::new().with_range(TimeRange::trailing(now, Duration::days(1))),
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].ticket_id, "TKT-new");
}

#[tokio::test]
async fn handoff_resolutions_skip_none_and_window_on_handoff_time() {
    let store = MetricsStore::in_memory().await.unwrap();
    let now = Utc::now();

    let mut handed = resolution_at("TKT-1", ResolutionType::Escalated, Some(120), now);
    handed.handoff_type = Some("technical".to_string());
    handed.handoff_timestamp = Some(now);
    store.insert_resolution(&handed).await.unwrap();

    let mut no_handoff = resolution_at("TKT-2", ResolutionType::Escalated, Some(60), now);
    no_handoff.handoff_type = Some("none".to_string());
    no_handoff.handoff_timestamp = Some(now);
    store.insert_resolution(&no_handoff).await.unwrap();

    let mut old_handoff = resolution_at("TKT-3", ResolutionType::Escalated, Some(60), now);
    old_handoff.handoff_type = Some("billing".to_string());
    old_handoff.handoff_timestamp = Some(now - Duration::days(3));
    store.insert_resolution(&old_handoff).await.unwrap();

    let rows = store
        .handoff_resolutions(&TimeRange::trailing(now, Duration::days(1)))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].ticket_id, "TKT-1");
}

#[tokio::test]
async fn rollup_upsert_recomputes_from_scratch() {
    let store = MetricsStore::in_memory().await.unwrap();
    let date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
    let ts = date.and_hms_opt(10, 0, 0).unwrap().and_utc();

    for (ticket, ty, mtr) in [
        ("TKT-1", ResolutionType::AutoResolved, Some(30)),
        ("TKT-2", ResolutionType::AutoResolved, Some(40)),
        ("TKT-3", ResolutionType::AutoResolved, Some(50)),
        ("TKT-4", ResolutionType::Failed, Some(90)),
        ("TKT-5", ResolutionType::Escalated, Some(300)),
    ] {
        let mut resolution = resolution_at(ticket, ty, mtr, ts);
        resolution.category_id = Some("cat-1".to_string());
        store.insert_resolution(&resolution).await.unwrap();
    }

    for latency in [100, 200] {
        let mut record = execution_at("diagnose", true, latency, ts);
        record.category_id = Some("cat-1".to_string());
        record.cost_usd = 0.001;
        store.insert_execution(&record).await.unwrap();
    }

    let rollup = store
        .upsert_category_rollup("cat-1", "Printing", date)
        .await
        .unwrap();

    assert_eq!(rollup.category_id, "cat-1");
    assert_eq!(rollup.category_name, "Printing");
    assert_eq!(rollup.date, date);
    assert_eq!(rollup.total_tickets, 5);
    assert_eq!(rollup.successful_tickets, 3);
    assert_eq!(rollup.failed_tickets, 1);
    assert_eq!(rollup.success_rate, 60.0);
    assert_eq!(rollup.avg_latency_ms, 150);
    assert_eq!(rollup.total_tokens, 140);
    assert!((rollup.total_cost_usd - 0.002).abs() < 1e-9);
}

#[tokio::test]
async fn rollup_upsert_is_idempotent_for_data_fields() {
    let store = MetricsStore::in_memory().await.unwrap();
    let date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
    let ts = date.and_hms_opt(9, 0, 0).unwrap().and_utc();

    let mut resolution = resolution_at("TKT-1", ResolutionType::AutoResolved, Some(45), ts);
    resolution.category_id = Some("cat-1".to_string());
    store.insert_resolution(&resolution).await.unwrap();

    let first = store
        .upsert_category_rollup("cat-1", "Printing", date)
        .await
        .unwrap();
    let second = store
        .upsert_category_rollup("cat-1", "Printing", date)
        .await
        .unwrap();

    // Same key row, same data. Only the last-updated bookkeeping column
    // may differ between the calls.
    assert_eq!(first.id, second.id);
    assert_eq!(first.total_tickets, second.total_tickets);
    assert_eq!(first.successful_tickets, second.successful_tickets);
    assert_eq!(first.failed_tickets, second.failed_tickets);
    assert_eq!(first.success_rate, second.success_rate);
    assert_eq!(first.avg_latency_ms, second.avg_latency_ms);
    assert_eq!(first.total_tokens, second.total_tokens);
    assert_eq!(first.total_cost_usd, second.total_cost_usd);

    let rollups = store.rollups(&RollupQuery::new()).await.unwrap();
    assert_eq!(rollups.len(), 1);
}

#[tokio::test]
async fn rollup_queries_filter_by_category_and_date() {
    let store = MetricsStore::in_memory().await.unwrap();
    let june_first = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
    let june_second = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();

    for (ticket, category, date) in [
        ("TKT-1", "cat-1", june_first),
        ("TKT-2", "cat-1", june_second),
        ("TKT-3", "cat-2", june_second),
    ] {
        let ts = date.and_hms_opt(12, 0, 0).unwrap().and_utc();
        let mut resolution = resolution_at(ticket, ResolutionType::AutoResolved, Some(30), ts);
        resolution.category_id = Some(category.to_string());
        store.insert_resolution(&resolution).await.unwrap();
        store
            .upsert_category_rollup(category, "Category", date)
            .await
            .unwrap();
    }

    let all = store.rollups(&RollupQuery::new()).await.unwrap();
    assert_eq!(all.len(), 3);
    // Newest date first.
    assert_eq!(all[0].date, june_second);

    let cat_1 = store
        .rollups(&RollupQuery::new().with_category("cat-1"))
        .await
        .unwrap();
    assert_eq!(cat_1.len(), 2);

    let from_second = store
        .rollups(&RollupQuery::new().with_range(TimeRange::new(
            Some(june_second.and_hms_opt(0, 0, 0).unwrap().and_utc()),
            None,
        )))
        .await
        .unwrap();
    assert_eq!(from_second.len(), 2);
}

#[tokio::test]
async fn file_backed_store_persists_across_reopens() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metrics.db");

    {
        let store = MetricsStore::connect(&path).await.unwrap();
        store
            .insert_execution(&execution_at("diagnose", true, 100, Utc::now()))
            .await
            .unwrap();
        store.close().await;
    }

    let reopened = MetricsStore::connect(&path).await.unwrap();
    let rows = reopened.executions(&ExecutionQuery::new()).await.unwrap();
    assert_eq!(rows.len(), 1);
}
