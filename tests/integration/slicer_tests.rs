//! Dispatch, versioning and error handling tests.
//!
//! Tests verify:
//! - Accepted versions only increase, whatever order workers finish in
//! - Layers do not wait for each other
//! - Removed layers produce no late events or cache entries
//! - Source failures are isolated, reported once and recoverable
//! - Superseded jobs skip their source and trigger cancel hooks

use std::sync::Arc;
use std::time::Duration;

use slice_streamer::{
    CompletionOutcome, ErrorKind, LayerStatus, SliceEngine, SliceEvent, SlicerConfig,
};

use super::test_utils::{
    drain, drain_ready, plane, volume, wait_until, CountingSource, DelayedSource, FlakySource,
    GatedSource, Mode,
};

fn engine(workers: usize) -> SliceEngine {
    SliceEngine::new(SlicerConfig::default().with_workers(workers)).unwrap()
}

// =============================================================================
// Ordering
// =============================================================================

#[tokio::test]
async fn test_accepted_versions_are_monotonic() {
    let mut engine = engine(4);
    let mut events = engine.subscribe();

    // older requests (lower z) take longer than newer ones
    let source = DelayedSource::new(volume(10, 4), |index| {
        Duration::from_millis(3 * (10 - index.point[0] as u64))
    });
    let id = engine.add_layer(Arc::new(source)).await.unwrap();

    for z in 1..10 {
        engine.set_point(0, z).await.unwrap();
        engine.poll_ready().await;
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    engine.run_until_idle().await;

    let responses = drain_ready(&mut events);
    assert!(!responses.is_empty());
    for pair in responses.windows(2) {
        assert!(pair[0].version < pair[1].version);
    }

    let last = responses.last().unwrap();
    assert_eq!(last.layer_id, id);
    assert_eq!(last.version, 10);
    assert_eq!(last.data, plane(9, 4));
    assert_eq!(engine.layer_status(id), Some(&LayerStatus::Ready { version: 10 }));
}

#[tokio::test]
async fn test_slow_layer_does_not_block_other_layers() {
    let mut engine = engine(2);
    let mut events = engine.subscribe();

    let slow = GatedSource::new(volume(3, 4));
    let a = engine.add_layer(Arc::new(slow.clone())).await.unwrap();
    let b = engine
        .add_layer(Arc::new(CountingSource::new(volume(3, 4))))
        .await
        .unwrap();

    // layer A was requested first but B completes first
    assert_eq!(engine.process_next().await, Some(CompletionOutcome::Accepted));
    let first = drain_ready(&mut events);
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].layer_id, b);
    assert_eq!(engine.layer_status(a), Some(&LayerStatus::Pending));

    slow.open();
    assert_eq!(engine.process_next().await, Some(CompletionOutcome::Accepted));
    let second = drain_ready(&mut events);
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].layer_id, a);
}

#[tokio::test]
async fn test_cache_hit_supersedes_in_flight_request() {
    let mut engine = engine(2);
    let mut events = engine.subscribe();

    let source = GatedSource::new(volume(3, 4));
    source.open();
    engine.add_layer(Arc::new(source.clone())).await.unwrap();
    engine.run_until_idle().await;

    source.close();
    engine.set_point(0, 1).await.unwrap();
    // back to z=0 before z=1 finishes
    engine.set_point(0, 0).await.unwrap();
    source.open();
    engine.run_until_idle().await;

    let responses = drain_ready(&mut events);
    let versions: Vec<u64> = responses.iter().map(|r| r.version).collect();
    assert_eq!(versions, vec![1, 3]);
    assert!(responses[1].cache_hit);
    assert_eq!(responses[1].data, plane(0, 4));
    assert_eq!(engine.stats().stale_discarded + engine.stats().skipped, 1);
}

// =============================================================================
// Layer Removal
// =============================================================================

#[tokio::test]
async fn test_removed_layer_late_completion_is_dropped() {
    let mut engine = engine(2);
    let mut events = engine.subscribe();

    let source = GatedSource::new(volume(3, 4));
    let id = engine.add_layer(Arc::new(source.clone())).await.unwrap();
    wait_until(|| source.started() == 1).await;

    engine.remove_layer(id).await.unwrap();
    source.open();
    wait_until(|| source.finished() == 1).await;
    engine.run_until_idle().await;

    assert!(drain(&mut events).is_empty());
    assert_eq!(engine.cache_stats().await.entries, 0);
    assert_eq!(engine.stats().stale_discarded, 1);
    assert!(engine.layer_status(id).is_none());
}

#[tokio::test]
async fn test_layer_ids_are_not_reused() {
    let mut engine = engine(2);
    let first = engine
        .add_layer(Arc::new(CountingSource::new(volume(2, 4))))
        .await
        .unwrap();
    engine.remove_layer(first).await.unwrap();

    let second = engine
        .add_layer(Arc::new(CountingSource::new(volume(2, 4))))
        .await
        .unwrap();
    assert_ne!(first, second);
    engine.run_until_idle().await;
}

// =============================================================================
// Errors
// =============================================================================

#[tokio::test]
async fn test_failure_is_isolated_to_its_layer() {
    let mut engine = engine(2);
    let mut events = engine.subscribe();

    let flaky = FlakySource::new(volume(3, 4));
    flaky.set_mode(Mode::Failing);
    let bad = engine.add_layer(Arc::new(flaky.clone())).await.unwrap();
    let good = engine
        .add_layer(Arc::new(CountingSource::new(volume(3, 4))))
        .await
        .unwrap();
    engine.run_until_idle().await;

    let events_now = drain(&mut events);
    let failures: Vec<_> = events_now
        .iter()
        .filter_map(|e| match e {
            SliceEvent::Failed(f) => Some(f),
            SliceEvent::Ready(_) => None,
        })
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].layer_id, bad);
    assert_eq!(failures[0].kind, ErrorKind::SliceCompute);
    assert!(failures[0].message.contains("corrupt chunk"));
    assert!(events_now
        .iter()
        .any(|e| e.response().is_some_and(|r| r.layer_id == good)));
    assert!(matches!(
        engine.layer_status(bad),
        Some(LayerStatus::Failed { version: 1, .. })
    ));

    // the failure was not cached and the layer recovers on the next request
    assert_eq!(engine.cache_stats().await.entries, 1);
    flaky.set_mode(Mode::Healthy);
    engine.set_point(0, 1).await.unwrap();
    engine.run_until_idle().await;

    assert!(matches!(engine.layer_status(bad), Some(LayerStatus::Ready { .. })));
    assert_eq!(engine.stats().failures, 1);
}

#[tokio::test]
async fn test_superseded_failure_is_not_reported() {
    let mut engine = engine(2);
    let mut events = engine.subscribe();

    let flaky = FlakySource::new(volume(3, 4));
    flaky.set_mode(Mode::Failing);
    let id = engine.add_layer(Arc::new(flaky.clone())).await.unwrap();
    engine.set_point(0, 1).await.unwrap();
    engine.run_until_idle().await;

    let failures: Vec<_> = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, SliceEvent::Failed(_)))
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].version(), 2);
    assert!(matches!(
        engine.layer_status(id),
        Some(LayerStatus::Failed { version: 2, .. })
    ));
}

#[tokio::test]
async fn test_unavailable_source_persists_until_success() {
    let mut engine = engine(2);
    let mut events = engine.subscribe();

    let flaky = FlakySource::new(volume(3, 4));
    flaky.set_mode(Mode::Disconnected);
    let id = engine.add_layer(Arc::new(flaky.clone())).await.unwrap();
    engine.run_until_idle().await;

    match drain(&mut events).as_slice() {
        [SliceEvent::Failed(failure)] => assert_eq!(failure.kind, ErrorKind::SourceUnavailable),
        other => panic!("expected one failure, got {:?}", other),
    }
    assert!(matches!(engine.layer_status(id), Some(LayerStatus::Unavailable { .. })));

    engine.set_point(0, 1).await.unwrap();
    engine.run_until_idle().await;
    assert!(matches!(engine.layer_status(id), Some(LayerStatus::Unavailable { .. })));

    flaky.set_mode(Mode::Healthy);
    engine.set_point(0, 2).await.unwrap();
    engine.run_until_idle().await;
    assert_eq!(engine.layer_status(id), Some(&LayerStatus::Ready { version: 3 }));
    assert_eq!(flaky.slice_count(), 3);
}

#[tokio::test]
async fn test_panicking_source_is_contained() {
    let mut engine = engine(1);
    let mut events = engine.subscribe();

    let flaky = FlakySource::new(volume(3, 4));
    flaky.set_mode(Mode::Panicking);
    let id = engine.add_layer(Arc::new(flaky.clone())).await.unwrap();

    assert_eq!(
        engine.process_next().await,
        Some(CompletionOutcome::Failed(ErrorKind::SliceCompute))
    );
    assert!(matches!(drain(&mut events).as_slice(), [SliceEvent::Failed(_)]));

    // the single worker is still usable
    flaky.set_mode(Mode::Healthy);
    engine.set_point(0, 2).await.unwrap();
    assert_eq!(engine.process_next().await, Some(CompletionOutcome::Accepted));
    assert_eq!(engine.layer_status(id), Some(&LayerStatus::Ready { version: 2 }));
}

// =============================================================================
// Superseded Work
// =============================================================================

#[tokio::test]
async fn test_queued_superseded_jobs_skip_source() {
    // one worker, held by the gated layer
    let mut engine = engine(1);

    let blocker = GatedSource::new(volume(3, 4));
    engine.add_layer(Arc::new(blocker.clone())).await.unwrap();
    wait_until(|| blocker.started() == 1).await;

    let counting = CountingSource::new(volume(3, 4));
    engine.add_layer(Arc::new(counting.clone())).await.unwrap();
    engine.set_point(0, 1).await.unwrap();
    engine.set_point(0, 2).await.unwrap();

    blocker.open();
    engine.run_until_idle().await;

    assert_eq!(counting.slice_count(), 1);
    assert_eq!(counting.requests(), vec![super::test_utils::z_index(2)]);
    assert_eq!(blocker.started(), 2);

    let stats = engine.stats();
    assert_eq!(stats.skipped, 3);
    assert_eq!(stats.stale_discarded, 1);
    assert_eq!(stats.accepted, 2);
    // the overwritten requests never became jobs
    assert_eq!(stats.dispatched, 4);
}

#[tokio::test]
async fn test_thrashing_layer_runs_one_stale_call_at_most() {
    let mut engine = engine(4);
    let mut events = engine.subscribe();

    let source = GatedSource::new(volume(4, 4));
    engine.add_layer(Arc::new(source.clone())).await.unwrap();
    wait_until(|| source.started() == 1).await;

    for z in 1..=3 {
        engine.set_point(0, z).await.unwrap();
        engine.poll_ready().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    // free workers remain, yet only the first request is inside the source
    assert_eq!(source.started(), 1);
    assert_eq!(engine.slicer().outstanding(), 1);

    source.open();
    engine.run_until_idle().await;

    assert_eq!(source.started(), 2);
    let responses = drain_ready(&mut events);
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].version, 4);
    assert_eq!(responses[0].data, plane(3, 4));
}

#[tokio::test]
async fn test_cancel_hook_invoked_on_supersede() {
    let mut engine = engine(2);
    let source = CountingSource::new(volume(3, 4)).cancellable();
    engine.add_layer(Arc::new(source.clone())).await.unwrap();

    // supersedes the running request
    engine.set_point(0, 1).await.unwrap();
    // supersedes a request that is only pending
    engine.set_point(0, 2).await.unwrap();
    engine.run_until_idle().await;

    assert_eq!(source.cancel_count(), 1);
    assert_eq!(engine.stats().cancel_hooks, 1);
}

#[tokio::test]
async fn test_refresh_cancels_running_request() {
    let mut engine = engine(2);
    let source = CountingSource::new(volume(3, 4)).cancellable();
    let id = engine.add_layer(Arc::new(source.clone())).await.unwrap();

    engine.refresh(id).await.unwrap();
    engine.run_until_idle().await;

    assert_eq!(source.cancel_count(), 1);
    assert_eq!(engine.stats().cancel_hooks, 1);
    assert_eq!(engine.layer_status(id), Some(&LayerStatus::Ready { version: 2 }));
}

#[tokio::test]
async fn test_cancel_hook_respects_config_and_capability() {
    let mut disabled = SliceEngine::new(
        SlicerConfig::default()
            .with_workers(2)
            .with_cancellation(false),
    )
    .unwrap();
    let cancellable = CountingSource::new(volume(3, 4)).cancellable();
    disabled.add_layer(Arc::new(cancellable.clone())).await.unwrap();
    disabled.set_point(0, 1).await.unwrap();
    disabled.run_until_idle().await;
    assert_eq!(cancellable.cancel_count(), 0);

    let mut enabled = engine(2);
    let plain = CountingSource::new(volume(3, 4));
    enabled.add_layer(Arc::new(plain.clone())).await.unwrap();
    enabled.set_point(0, 1).await.unwrap();
    enabled.run_until_idle().await;
    assert_eq!(plain.cancel_count(), 0);
    assert_eq!(enabled.stats().cancel_hooks, 0);
}

#[tokio::test]
async fn test_unchanged_layer_is_coalesced() {
    let mut engine = engine(2);

    let volume_source = GatedSource::new(volume(3, 4));
    engine.add_layer(Arc::new(volume_source.clone())).await.unwrap();
    // a 2D layer does not depend on z
    let flat = CountingSource::new(plane(0, 4));
    engine.add_layer(Arc::new(flat.clone())).await.unwrap();

    engine.set_point(0, 1).await.unwrap();
    engine.set_point(0, 2).await.unwrap();
    volume_source.open();
    engine.run_until_idle().await;

    assert_eq!(flat.slice_count(), 1);
    assert_eq!(engine.stats().coalesced, 2);
}
