//! Timing and concurrency guarantees of the scheduler

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use uptime_engine::actors::{MonitorChange, ScheduleState};
use uptime_engine::storage::{MemoryBackend, StorageBackend};
use uptime_engine::{Engine, EngineError};

use crate::helpers::*;

async fn engine_with(probe: Arc<ScriptedProbe>, workers: usize) -> Engine {
    Engine::builder(test_config(workers), Arc::new(MemoryBackend::new()))
        .probe(probe)
        .start()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_consecutive_probes_are_spaced_by_interval() {
    let probe = Arc::new(ScriptedProbe::new(Duration::from_millis(20), Step::Up));
    let engine = engine_with(probe.clone(), 2).await;

    engine
        .create_schedule(http_monitor("spaced", "https://example.com", 100))
        .await
        .unwrap();
    assert!(eventually(Duration::from_secs(5), || probe.starts("spaced").len() >= 4).await);
    engine.shutdown().await.unwrap();

    let starts = probe.starts("spaced");
    for pair in starts.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap >= Duration::from_millis(100), "fired after {gap:?}");
        assert!(gap < Duration::from_millis(600), "drifted to {gap:?}");
    }
}

#[tokio::test]
async fn test_slow_probe_never_overlaps_itself() {
    // Probes take five times the interval
    let probe = Arc::new(ScriptedProbe::new(Duration::from_millis(100), Step::Up));
    let engine = engine_with(probe.clone(), 8).await;

    for i in 0..5 {
        engine
            .create_schedule(http_monitor(&format!("m{i}"), "https://example.com", 20))
            .await
            .unwrap();
    }
    assert!(eventually(Duration::from_secs(5), || probe.calls() >= 15).await);
    engine.shutdown().await.unwrap();

    assert_eq!(probe.overlaps(), 0);
}

#[tokio::test]
async fn test_concurrency_is_bounded_by_pool_size() {
    let probe = Arc::new(ScriptedProbe::new(Duration::from_millis(50), Step::Up));
    let engine = engine_with(probe.clone(), 3).await;

    for i in 0..12 {
        engine
            .create_schedule(http_monitor(&format!("m{i}"), "https://example.com", 20))
            .await
            .unwrap();
    }
    assert!(eventually(Duration::from_secs(5), || probe.calls() >= 24).await);

    let stats = engine.stats().await.unwrap();
    engine.shutdown().await.unwrap();

    assert!(probe.max_running() <= 3, "ran {} probes at once", probe.max_running());
    assert!(stats.saturated > 0);
    assert!(stats.dispatched >= 24);
}

#[tokio::test]
async fn test_pause_and_resume() {
    let probe = Arc::new(ScriptedProbe::new(Duration::ZERO, Step::Up));
    let engine = engine_with(probe.clone(), 2).await;

    engine
        .create_schedule(http_monitor("m1", "https://example.com", 20))
        .await
        .unwrap();
    assert!(eventually(Duration::from_secs(5), || probe.calls() >= 1).await);

    engine.pause("m1").await.unwrap();
    assert_eq!(engine.schedule_state("m1").await.unwrap(), Some(ScheduleState::Paused));
    let paused_at = probe.calls();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(probe.calls(), paused_at);

    // pausing twice is a no-op
    engine.pause("m1").await.unwrap();

    engine.resume("m1").await.unwrap();
    assert!(eventually(Duration::from_secs(5), || probe.calls() > paused_at).await);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_update_interval_applies_to_next_fire() {
    let probe = Arc::new(ScriptedProbe::new(Duration::ZERO, Step::Up));
    let engine = engine_with(probe.clone(), 2).await;

    engine
        .create_schedule(http_monitor("m1", "https://example.com", 60_000))
        .await
        .unwrap();
    assert!(eventually(Duration::from_secs(5), || probe.calls() == 1).await);

    engine.update_interval("m1", Duration::from_millis(20)).await.unwrap();
    assert!(eventually(Duration::from_secs(5), || probe.calls() >= 3).await);

    let too_short = engine.update_interval("m1", Duration::from_millis(1)).await;
    assert_matches!(too_short, Err(EngineError::Schedule(_)));

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_monitor_is_reported() {
    let probe = Arc::new(ScriptedProbe::new(Duration::ZERO, Step::Up));
    let engine = engine_with(probe, 1).await;

    assert!(engine.pause("missing").await.is_err());
    assert!(engine.remove("missing").await.is_err());
    assert_eq!(engine.schedule_state("missing").await.unwrap(), None);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reconcile_follows_storage() {
    let backend = Arc::new(MemoryBackend::new());
    let probe = Arc::new(ScriptedProbe::new(Duration::ZERO, Step::Up));
    let config = uptime_engine::config::EngineConfig {
        reconcile_interval_secs: Some(3600),
        ..test_config(2)
    };
    let engine = Engine::builder(config, backend.clone())
        .probe(probe.clone())
        .start()
        .await
        .unwrap();

    backend
        .upsert_monitor(&http_monitor("external", "https://example.com", 60_000))
        .await
        .unwrap();
    assert!(engine.reconcile_now().await.unwrap() >= 1);
    assert!(engine.schedule_state("external").await.unwrap().is_some());

    backend.delete_monitor("external").await.unwrap();
    engine.reconcile_now().await.unwrap();
    assert_eq!(engine.schedule_state("external").await.unwrap(), None);

    // push mode: storage already changed, only the coordinator converges
    let mut pushed = http_monitor("pushed", "https://example.com", 60_000);
    pushed.active = false;
    engine.apply_change(MonitorChange::Upsert(pushed)).await.unwrap();
    assert_eq!(
        engine.schedule_state("pushed").await.unwrap(),
        Some(ScheduleState::Paused)
    );

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_paused_monitor_can_be_resumed_after_restart() {
    let backend = Arc::new(MemoryBackend::new());
    let probe = Arc::new(ScriptedProbe::new(Duration::ZERO, Step::Up));
    let engine = Engine::builder(test_config(2), backend.clone())
        .probe(probe.clone())
        .start()
        .await
        .unwrap();

    engine
        .create_schedule(http_monitor("m1", "https://example.com", 20))
        .await
        .unwrap();
    assert!(eventually(Duration::from_secs(5), || probe.calls() >= 1).await);
    engine.pause("m1").await.unwrap();
    engine.shutdown().await.unwrap();

    let probe = Arc::new(ScriptedProbe::new(Duration::ZERO, Step::Up));
    let engine = Engine::builder(test_config(2), backend.clone())
        .probe(probe.clone())
        .start()
        .await
        .unwrap();

    assert_eq!(engine.schedule_state("m1").await.unwrap(), Some(ScheduleState::Paused));
    engine.update_interval("m1", Duration::from_millis(30)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(probe.calls(), 0);

    engine.resume("m1").await.unwrap();
    assert!(eventually(Duration::from_secs(5), || probe.calls() >= 2).await);

    let stored = backend.load_monitor("m1").await.unwrap().unwrap();
    assert!(stored.active);
    assert_eq!(stored.interval, Duration::from_millis(30));

    engine.shutdown().await.unwrap();
}
