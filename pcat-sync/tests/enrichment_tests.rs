//! Integration tests for the enrichment scheduler
//!
//! Drives full runs against a scripted analysis client and checks what ends
//! up in the persisted catalog snapshot.

mod helpers;

use helpers::{fast_params, init_test_logging, Behavior, CatalogFixture, ScriptedAnalysisClient};
use pcat_common::events::{CatalogEvent, EventBus, ItemStatus};
use pcat_sync::models::{Analysis, FailureReason, Record};
use pcat_sync::services::enrichment::EnrichmentScheduler;
use pcat_sync::services::CatalogStore;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const FIVE: [&str; 5] = [
    "1990-01-01.jpg",
    "1990-01-02.jpg",
    "1990-01-03.jpg",
    "1990-01-04.jpg",
    "1990-01-05.jpg",
];

fn analyzed(record: &Record) -> bool {
    matches!(record.ai_analysis, Some(Analysis::Success(_)))
}

#[tokio::test]
async fn test_all_pending_records_analyzed_and_persisted() {
    let fixture = CatalogFixture::new();
    let mut store = fixture.store_with(&FIVE);
    let client = Arc::new(ScriptedAnalysisClient::valid());

    let scheduler = EnrichmentScheduler::new(client.clone(), fast_params(3, 2));
    let stats = scheduler.run(&mut store, CancellationToken::new()).await.unwrap();

    assert_eq!(stats.candidates, 5);
    assert_eq!(stats.succeeded, 5);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.checkpoints, 2);
    assert!(!stats.cancelled);
    assert_eq!(client.call_count(), 5);

    let reloaded = fixture.reload();
    assert!(reloaded.iter().all(analyzed));
    match &reloaded.get("1990-01-03.jpg").unwrap().ai_analysis {
        Some(Analysis::Success(result)) => {
            assert_eq!(result.ocr_text, "1990-01-03.jpg");
            assert_eq!(result.keywords, vec!["sketch", "test"]);
        }
        other => panic!("expected success, got {:?}", other),
    }
}

#[tokio::test]
async fn test_finalized_records_are_never_resent() {
    let fixture = CatalogFixture::new();
    let mut store = fixture.store_with(&FIVE);

    let first = Arc::new(ScriptedAnalysisClient::valid().script("1990-01-02.jpg", vec![Behavior::Permanent]));
    EnrichmentScheduler::new(first, fast_params(2, 10))
        .run(&mut store, CancellationToken::new())
        .await
        .unwrap();

    let second = Arc::new(ScriptedAnalysisClient::valid());
    let stats = EnrichmentScheduler::new(second.clone(), fast_params(2, 10))
        .run(&mut store, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.candidates, 0);
    assert_eq!(second.call_count(), 0);
    assert_eq!(
        store.get("1990-01-02.jpg").unwrap().failure_reason(),
        Some(FailureReason::GeneralApiError)
    );
}

#[tokio::test]
async fn test_fenced_reply_is_accepted() {
    let fixture = CatalogFixture::new();
    let mut store = fixture.store_with(&["1990-02-01.jpg"]);
    let client = Arc::new(ScriptedAnalysisClient::new(Behavior::Fenced));

    let stats = EnrichmentScheduler::new(client, fast_params(1, 1))
        .run(&mut store, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.succeeded, 1);
    assert!(analyzed(fixture.reload().get("1990-02-01.jpg").unwrap()));
}

#[tokio::test]
async fn test_malformed_replies_become_failure_markers() {
    let fixture = CatalogFixture::new();
    let mut store = fixture.store_with(&["1990-03-01.jpg", "1990-03-02.jpg", "1990-03-03.jpg"]);
    let missing = r#"{"ocr_text": "", "keywords": []}"#;
    let client = Arc::new(
        ScriptedAnalysisClient::valid()
            .script("1990-03-01.jpg", vec![Behavior::Raw("I cannot help with that.".into())])
            .script("1990-03-02.jpg", vec![Behavior::Raw(missing.into())])
            .script("1990-03-03.jpg", vec![Behavior::Truncated]),
    );

    let stats = EnrichmentScheduler::new(client, fast_params(3, 10))
        .run(&mut store, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stats.failed, 3);

    let reloaded = fixture.reload();
    let marker = |name: &str| match &reloaded.get(name).unwrap().ai_analysis {
        Some(Analysis::Failure(marker)) => marker.clone(),
        other => panic!("expected failure marker for {}, got {:?}", name, other),
    };

    let decode = marker("1990-03-01.jpg");
    assert_eq!(decode.error, FailureReason::JsonDecodeError);
    assert_eq!(decode.raw_content.as_deref(), Some("I cannot help with that."));

    let keys = marker("1990-03-02.jpg");
    assert_eq!(keys.error, FailureReason::MissingKeys);
    assert_eq!(keys.raw_content.as_deref(), Some(missing));

    assert_eq!(marker("1990-03-03.jpg").error, FailureReason::NoContentFinishLength);
}

#[tokio::test]
async fn test_unreadable_asset_is_encoding_failure_without_request() {
    let fixture = CatalogFixture::new();
    let mut store = fixture.store_with(&["1990-04-01.jpg"]);
    let mut ghost = Record::new("1990-04-02.jpg", fixture.images.join("missing.jpg").to_string_lossy(), "1990");
    ghost.month = Some("04".into());
    store.upsert(ghost);
    store.upsert(Record::new("1990-04-03.jpg", "", "1990"));

    let client = Arc::new(ScriptedAnalysisClient::valid());
    let stats = EnrichmentScheduler::new(client.clone(), fast_params(2, 10))
        .run(&mut store, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.failed, 2);
    assert_eq!(client.calls(), vec!["1990-04-01.jpg".to_string()]);

    let reloaded = fixture.reload();
    for name in ["1990-04-02.jpg", "1990-04-03.jpg"] {
        assert_eq!(
            reloaded.get(name).unwrap().failure_reason(),
            Some(FailureReason::EncodingFailed)
        );
    }
}

#[tokio::test]
async fn test_transient_failure_defers_and_next_run_retries() {
    let fixture = CatalogFixture::new();
    let mut store = fixture.store_with(&FIVE[..3]);
    let (logs, _guard) = init_test_logging();

    let flaky = Arc::new(ScriptedAnalysisClient::valid().script("1990-01-02.jpg", vec![Behavior::Transient]));
    let stats = EnrichmentScheduler::new(flaky, fast_params(2, 10))
        .run(&mut store, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.succeeded, 2);
    assert_eq!(stats.deferred, 1);
    assert_eq!(
        logs.for_file("Transient failure, record left pending", "1990-01-02.jpg").len(),
        1
    );

    let deferred = fixture.reload();
    let record = deferred.get("1990-01-02.jpg").unwrap();
    assert!(record.is_pending());
    assert_eq!(record.transient_failures, 1);

    let retry = Arc::new(ScriptedAnalysisClient::valid());
    let stats = EnrichmentScheduler::new(retry.clone(), fast_params(2, 10))
        .run(&mut store, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(retry.calls(), vec!["1990-01-02.jpg".to_string()]);
    assert_eq!(stats.succeeded, 1);
    let record = fixture.reload().get("1990-01-02.jpg").cloned().unwrap();
    assert!(analyzed(&record));
    assert_eq!(record.transient_failures, 0);
}

#[tokio::test]
async fn test_transient_ceiling_finalizes_record() {
    let fixture = CatalogFixture::new();
    let mut store = fixture.store_with(&["1990-05-01.jpg"]);
    let mut params = fast_params(1, 10);
    params.max_transient_failures = 2;

    let client = Arc::new(ScriptedAnalysisClient::new(Behavior::Transient));
    let scheduler = EnrichmentScheduler::new(client.clone(), params);

    let first = scheduler.run(&mut store, CancellationToken::new()).await.unwrap();
    assert_eq!(first.deferred, 1);
    assert!(store.get("1990-05-01.jpg").unwrap().is_pending());

    let second = scheduler.run(&mut store, CancellationToken::new()).await.unwrap();
    assert_eq!(second.failed, 1);
    assert_eq!(client.call_count(), 2);

    let reloaded = fixture.reload();
    let record = reloaded.get("1990-05-01.jpg").unwrap();
    assert_eq!(record.failure_reason(), Some(FailureReason::TransientRetriesExhausted));
    match &record.ai_analysis {
        Some(Analysis::Failure(marker)) => {
            assert!(marker.details.as_deref().unwrap_or_default().contains("503"))
        }
        other => panic!("expected failure marker, got {:?}", other),
    }
}

#[tokio::test]
async fn test_timeout_counts_as_transient() {
    let fixture = CatalogFixture::new();
    let mut store = fixture.store_with(&["1990-06-01.jpg", "1990-06-02.jpg"]);
    let mut params = fast_params(2, 10);
    params.request_timeout = Duration::from_millis(50);

    let client = Arc::new(ScriptedAnalysisClient::valid().script("1990-06-01.jpg", vec![Behavior::Hang]));
    let stats = EnrichmentScheduler::new(client, params)
        .run(&mut store, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.deferred, 1);
    assert_eq!(stats.succeeded, 1);
    let reloaded = fixture.reload();
    assert!(reloaded.get("1990-06-01.jpg").unwrap().is_pending());
    assert_eq!(reloaded.get("1990-06-01.jpg").unwrap().transient_failures, 1);
}

/// An interrupted run loses at most the results since the last checkpoint
#[tokio::test]
async fn test_checkpoint_survives_interrupted_run() {
    let fixture = CatalogFixture::new();
    let mut store = fixture.store_with(&FIVE);

    let snapshot = fixture.snapshot.clone();
    let seen_on_disk: Arc<Mutex<Option<usize>>> = Arc::new(Mutex::new(None));
    let seen = seen_on_disk.clone();

    let client = Arc::new(
        ScriptedAnalysisClient::valid()
            .script("1990-01-04.jpg", vec![Behavior::Hang])
            .on_call(move |call, _| {
                if call == 4 {
                    let store = CatalogStore::load(&snapshot).unwrap();
                    *seen.lock().unwrap() = Some(store.iter().filter(|r| analyzed(r)).count());
                }
            }),
    );

    let scheduler = EnrichmentScheduler::new(client, fast_params(1, 2));
    let interrupted = tokio::time::timeout(
        Duration::from_millis(500),
        scheduler.run(&mut store, CancellationToken::new()),
    )
    .await;
    assert!(interrupted.is_err(), "run should still be waiting on the hung request");

    // Checkpoint after the 2nd item was on disk when the 4th request went out
    assert_eq!(*seen_on_disk.lock().unwrap(), Some(2));

    // Simulated restart: only the third result was lost
    let mut restarted = fixture.reload();
    assert_eq!(restarted.iter().filter(|r| analyzed(r)).count(), 2);

    let client = Arc::new(ScriptedAnalysisClient::valid());
    let stats = EnrichmentScheduler::new(client.clone(), fast_params(1, 2))
        .run(&mut restarted, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        client.calls(),
        vec!["1990-01-03.jpg", "1990-01-04.jpg", "1990-01-05.jpg"]
    );
    assert_eq!(stats.succeeded, 3);
    assert!(fixture.reload().iter().all(analyzed));
}

#[tokio::test]
async fn test_concurrency_stays_within_worker_count() {
    let fixture = CatalogFixture::new();
    let names: Vec<String> = (1..=12).map(|d| format!("1990-07-{:02}.jpg", d)).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let mut store = fixture.store_with(&refs);

    let client = Arc::new(ScriptedAnalysisClient::new(Behavior::Slow(Duration::from_millis(20))));
    let stats = EnrichmentScheduler::new(client.clone(), fast_params(3, 5))
        .run(&mut store, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.succeeded, 12);
    assert!(client.max_in_flight() <= 3, "saw {} requests in flight", client.max_in_flight());
    assert!(client.max_in_flight() >= 2);
}

#[tokio::test]
async fn test_request_spacing_per_worker() {
    let fixture = CatalogFixture::new();
    let mut store = fixture.store_with(&FIVE[..3]);
    let mut params = fast_params(1, 10);
    params.request_spacing = Duration::from_millis(40);

    let started = std::time::Instant::now();
    EnrichmentScheduler::new(Arc::new(ScriptedAnalysisClient::valid()), params)
        .run(&mut store, CancellationToken::new())
        .await
        .unwrap();

    // Three requests from one worker: two full gaps
    assert!(started.elapsed() >= Duration::from_millis(80));
}

#[tokio::test]
async fn test_cancelled_run_dispatches_nothing_and_still_saves() {
    let fixture = CatalogFixture::new();
    let mut store = fixture.store_with(&FIVE);
    std::fs::remove_file(&fixture.snapshot).unwrap();

    let cancel_token = CancellationToken::new();
    cancel_token.cancel();

    let client = Arc::new(ScriptedAnalysisClient::valid());
    let stats = EnrichmentScheduler::new(client.clone(), fast_params(2, 1))
        .run(&mut store, cancel_token)
        .await
        .unwrap();

    assert!(stats.cancelled);
    assert_eq!(stats.completed, 0);
    assert_eq!(stats.not_dispatched(), 5);
    assert_eq!(client.call_count(), 0);
    assert!(fixture.reload().iter().all(|r| r.is_pending()));
}

#[tokio::test]
async fn test_limit_caps_dispatch() {
    let fixture = CatalogFixture::new();
    let mut store = fixture.store_with(&FIVE);
    let mut params = fast_params(2, 10);
    params.limit = Some(2);

    let client = Arc::new(ScriptedAnalysisClient::valid());
    let stats = EnrichmentScheduler::new(client.clone(), params)
        .run(&mut store, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.candidates, 2);
    assert_eq!(client.call_count(), 2);
    assert_eq!(fixture.reload().iter().filter(|r| r.is_pending()).count(), 3);
}

#[tokio::test]
async fn test_progress_events() {
    let fixture = CatalogFixture::new();
    let mut store = fixture.store_with(&FIVE[..3]);
    let bus = EventBus::new(64);
    let mut rx = bus.subscribe();

    let client = Arc::new(ScriptedAnalysisClient::valid().script("1990-01-03.jpg", vec![Behavior::Transient]));
    EnrichmentScheduler::new(client, fast_params(1, 2))
        .with_event_bus(bus)
        .run(&mut store, CancellationToken::new())
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }

    assert!(matches!(events.first(), Some(CatalogEvent::EnrichmentStarted { candidates: 3, .. })));
    let statuses: Vec<ItemStatus> = events
        .iter()
        .filter_map(|e| match e {
            CatalogEvent::ItemAnalyzed { status, .. } => Some(status.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(
        statuses,
        vec![ItemStatus::Succeeded, ItemStatus::Succeeded, ItemStatus::Deferred]
    );
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, CatalogEvent::CheckpointSaved { finalized: 2, .. }))
            .count(),
        1
    );
    assert!(matches!(
        events.last(),
        Some(CatalogEvent::EnrichmentCompleted { succeeded: 2, deferred: 1, .. })
    ));
}

#[tokio::test]
async fn test_checkpoint_save_failure_aborts_run() {
    let fixture = CatalogFixture::new();
    // Parent of the snapshot is a regular file, so every save fails
    let blocker = fixture.dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let mut store = CatalogStore::empty(blocker.join("image_metadata.json"));
    for name in &FIVE[..3] {
        store.upsert(fixture.image(name));
    }

    let client = Arc::new(ScriptedAnalysisClient::valid());
    let result = EnrichmentScheduler::new(client.clone(), fast_params(1, 1))
        .run(&mut store, CancellationToken::new())
        .await;

    assert!(matches!(result, Err(pcat_common::Error::Io(_))), "got {:?}", result);
    assert_eq!(client.call_count(), 1);
    // The result applied before the failed save is still in memory
    assert!(analyzed(store.get("1990-01-01.jpg").unwrap()));
    assert!(store.get("1990-01-02.jpg").unwrap().is_pending());
}

#[tokio::test]
async fn test_final_save_failure_is_reported() {
    let fixture = CatalogFixture::new();
    let blocker = fixture.dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let mut store = CatalogStore::empty(blocker.join("image_metadata.json"));
    store.upsert(fixture.image("1990-01-01.jpg"));

    let result = EnrichmentScheduler::new(Arc::new(ScriptedAnalysisClient::valid()), fast_params(1, 10))
        .run(&mut store, CancellationToken::new())
        .await;

    assert!(result.is_err());
    assert!(analyzed(store.get("1990-01-01.jpg").unwrap()));
}
