//! Day-windowed retrieval against a scripted upstream.

mod common;

use chrono::NaiveDate;
use common::*;
use drover_core::FaultKind;
use drover_jobs::{
    Capability, DailyWindowCapability, DailyWindowSettings, JobError, JobSpec, JobStatus,
    JobUpdate, Router, RequestManager, DAILY_OPERATION,
};
use drover_resilience::RetryPolicy;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const NAME: &str = "xtwitter";

fn settings(months: u32) -> DailyWindowSettings {
    DailyWindowSettings {
        default_timeframe_months: months,
        pacing: NO_PACING,
    }
}

fn daily_spec(query: &str) -> JobSpec {
    JobSpec::new(NAME, DAILY_OPERATION)
        .with_param("query", query)
        .with_param("count", 10)
}

fn capability(fetch: Arc<FakeFetch>, sink: Arc<MemorySink>) -> DailyWindowCapability {
    DailyWindowCapability::new(NAME, fetch, sink, settings(3))
}

#[tokio::test]
async fn test_days_are_fetched_newest_first() {
    let (_, ledger) = memory_ledger().await;
    let record = insert(&ledger, daily_spec("#rust since:2024-01-01 until:2024-01-04")).await;
    let fetch = FakeFetch::new(2);
    let sink = MemorySink::new();

    let outcome = capability(fetch.clone(), sink.clone())
        .fetch(context(ledger.clone(), &record, CancellationToken::new()))
        .await
        .unwrap();

    assert_eq!(
        fetch.queries(),
        vec![
            "#rust since:2024-01-04 until:2024-01-05",
            "#rust since:2024-01-03 until:2024-01-04",
            "#rust since:2024-01-02 until:2024-01-03",
            "#rust since:2024-01-01 until:2024-01-02",
        ]
    );
    assert_eq!(outcome.external_call_count, 4);
    assert_eq!(outcome.records_fetched, 8);
    assert_eq!(sink.len(), 8);

    let progress = ledger.get(&record.id).await.unwrap().progress;
    assert_eq!(progress["last_processed_time"], json!("2023-12-31"));
    assert_eq!(progress["items_count"], json!(2));
}

#[tokio::test]
async fn test_resumes_from_saved_cursor() {
    let (_, ledger) = memory_ledger().await;
    let record = insert(&ledger, daily_spec("#rust since:2024-01-01 until:2024-01-04")).await;
    let mut progress = drover_jobs::ProgressCheckpoint::new();
    progress.insert("last_processed_time".to_string(), json!("2024-01-02"));
    let record = ledger
        .upsert(&record.id, JobUpdate::default().with_progress(progress))
        .await
        .unwrap();
    let fetch = FakeFetch::new(1);

    capability(fetch.clone(), MemorySink::new())
        .fetch(context(ledger.clone(), &record, CancellationToken::new()))
        .await
        .unwrap();

    assert_eq!(
        fetch.queries(),
        vec![
            "#rust since:2024-01-02 until:2024-01-03",
            "#rust since:2024-01-01 until:2024-01-02",
        ]
    );
}

#[tokio::test]
async fn test_default_window_reaches_back_configured_months() {
    let (_, ledger) = memory_ledger().await;
    let record = insert(&ledger, daily_spec("#rust lang:en")).await;
    let fetch = FakeFetch::new(0);
    let today = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();

    let outcome = DailyWindowCapability::new(NAME, fetch.clone(), MemorySink::new(), settings(1))
        .with_today(today)
        .fetch(context(ledger.clone(), &record, CancellationToken::new()))
        .await
        .unwrap();

    let queries = fetch.queries();
    assert_eq!(outcome.external_call_count, 31);
    assert_eq!(queries.first().unwrap(), "#rust lang:en since:2024-03-31 until:2024-04-01");
    assert_eq!(queries.last().unwrap(), "#rust lang:en since:2024-03-01 until:2024-03-02");
    assert_eq!(outcome.records_fetched, 0);
}

#[tokio::test]
async fn test_sink_failure_is_data_processing_fault() {
    let (_, ledger) = memory_ledger().await;
    let record = insert(&ledger, daily_spec("#rust since:2024-01-01 until:2024-01-02")).await;

    let err = capability(FakeFetch::new(3), MemorySink::failing())
        .fetch(context(ledger.clone(), &record, CancellationToken::new()))
        .await
        .unwrap_err();

    assert_eq!(err.fault_kind(), Some(FaultKind::DataProcessing));
    assert!(ledger.get(&record.id).await.unwrap().progress.is_empty());
}

#[tokio::test]
async fn test_upstream_fault_keeps_checkpoint_of_finished_days() {
    let (_, ledger) = memory_ledger().await;
    let record = insert(&ledger, daily_spec("#rust since:2024-01-01 until:2024-01-04")).await;
    let fetch = FakeFetch::new(1);
    fetch.fail_once("since:2024-01-02", FaultKind::RateLimit);

    let err = capability(fetch.clone(), MemorySink::new())
        .fetch(context(ledger.clone(), &record, CancellationToken::new()))
        .await
        .unwrap_err();

    assert_eq!(err.fault_kind(), Some(FaultKind::RateLimit));
    assert_eq!(fetch.queries().len(), 3);
    let progress = ledger.get(&record.id).await.unwrap().progress;
    assert_eq!(progress["last_processed_time"], json!("2024-01-02"));
}

#[tokio::test]
async fn test_missing_query_is_configuration_fault() {
    let (_, ledger) = memory_ledger().await;
    let record = insert(&ledger, JobSpec::new(NAME, DAILY_OPERATION).with_param("count", 10)).await;

    let err = capability(FakeFetch::new(1), MemorySink::new())
        .fetch(context(ledger.clone(), &record, CancellationToken::new()))
        .await
        .unwrap_err();

    assert_eq!(err.fault_kind(), Some(FaultKind::Configuration));
}

#[tokio::test]
async fn test_shutdown_stops_before_next_day() {
    let (_, ledger) = memory_ledger().await;
    let record = insert(&ledger, daily_spec("#rust since:2024-01-01 until:2024-01-04")).await;
    let fetch = FakeFetch::new(1);
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let err = capability(fetch.clone(), MemorySink::new())
        .fetch(context(ledger.clone(), &record, shutdown))
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::Interrupted));
    assert!(fetch.queries().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_day_is_retried_from_checkpoint() {
    let (_, ledger) = memory_ledger().await;
    let fetch = FakeFetch::new(2);
    fetch.fail_once("since:2024-01-02", FaultKind::RateLimit);
    let sink = MemorySink::new();

    let router = Arc::new(Router::new(ledger.clone()));
    router.register_instance(Arc::new(capability(fetch.clone(), sink.clone())));
    let retry = RetryPolicy::default().with_config(NAME, fast_retry(3));
    let manager = RequestManager::new(
        ledger.clone(),
        router,
        retry,
        drover_config::OrchestratorConfig::default(),
        CancellationToken::new(),
    )
    .await;

    let summary = manager
        .process_jobs(vec![daily_spec("#rust since:2024-01-01 until:2024-01-04")])
        .await
        .unwrap();

    assert_eq!(summary.completed, 1);
    assert_eq!(
        fetch.queries(),
        vec![
            "#rust since:2024-01-04 until:2024-01-05",
            "#rust since:2024-01-03 until:2024-01-04",
            "#rust since:2024-01-02 until:2024-01-03",
            "#rust since:2024-01-02 until:2024-01-03",
            "#rust since:2024-01-01 until:2024-01-02",
        ]
    );
    assert_eq!(sink.len(), 8);

    let record = ledger.all().await.pop().unwrap();
    assert_eq!(record.status, JobStatus::Completed);
    let result = record.result.unwrap();
    assert_eq!(result.last_processed_time.as_deref(), Some("2023-12-31"));
    assert_eq!(result.external_call_count, 2);
}
