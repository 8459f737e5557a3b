//! End-to-end status transitions and the notifications they produce

use std::sync::Arc;
use std::time::Duration;

use uptime_engine::notify::ChannelConfig;
use uptime_engine::status::{StatusPolicy, StatusTracker};
use uptime_engine::storage::{MemoryBackend, StorageBackend};
use uptime_engine::{Engine, FailureReason, Monitor, MonitorStatus, ProbeKind, ProbeOutcome};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

fn push_channel() -> ChannelConfig {
    ChannelConfig::Push {
        server_url: "https://push.example.com".to_string(),
        topic: "alerts".to_string(),
        priority: 4,
        auth: Default::default(),
    }
}

#[tokio::test]
async fn test_repeated_http_500_notifies_down_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let push = Arc::new(RecordingPush::new(200));
    let engine = Engine::builder(test_config(4), Arc::new(MemoryBackend::new()))
        .push_transport(push.clone())
        .start()
        .await
        .unwrap();

    let monitor = http_monitor("site", &server.uri(), 200).with_notifications(vec![push_channel()]);
    engine.create_schedule(monitor).await.unwrap();

    assert!(
        wait_for_checks(&engine, "site", 3, Duration::from_secs(5)).await,
        "expected three checks"
    );
    engine.pause("site").await.unwrap();

    let status = engine.status("site").await.unwrap();
    assert_eq!(status.status, MonitorStatus::Down);
    assert_eq!(status.last_reason, Some(FailureReason::HttpError(500)));

    let sent = push.sent();
    assert_eq!(sent.len(), 1, "only the pending -> down transition is announced");
    assert_eq!(sent[0].url, "https://push.example.com/alerts");
    assert_eq!(sent[0].header("Tags"), Some("red_circle"));
    assert_eq!(sent[0].header("Priority"), Some("4"));

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_ping_recovery_notifies_up_once() {
    let probe = Arc::new(
        ScriptedProbe::new(Duration::from_millis(5), Step::Up).script(
            "router",
            [Step::Fail(FailureReason::Timeout), Step::Up, Step::Up, Step::Up],
        ),
    );
    let push = Arc::new(RecordingPush::new(200));
    let engine = Engine::builder(test_config(2), Arc::new(MemoryBackend::new()))
        .probe(probe.clone())
        .push_transport(push.clone())
        .start()
        .await
        .unwrap();

    let monitor = Monitor::new("router", "Router", "10.0.0.1", ProbeKind::Ping, Duration::from_millis(30))
        .with_notifications(vec![push_channel()]);
    engine.create_schedule(monitor).await.unwrap();

    assert!(eventually(Duration::from_secs(5), || probe.calls() >= 4).await);
    engine.pause("router").await.unwrap();

    let sent = push.sent();
    let tags: Vec<_> = sent.iter().filter_map(|push| push.header("Tags")).collect();
    assert_eq!(tags, vec!["red_circle", "green_circle"]);

    let status = engine.status("router").await.unwrap();
    assert_eq!(status.status, MonitorStatus::Up);
    assert_eq!(status.last_reason, None);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_panicking_probe_counts_as_unknown_failure() {
    let probe = Arc::new(ScriptedProbe::new(Duration::ZERO, Step::Up).script("flaky", [Step::Panic]));
    let engine = Engine::builder(test_config(2), Arc::new(MemoryBackend::new()))
        .probe(probe.clone())
        .start()
        .await
        .unwrap();

    engine
        .create_schedule(http_monitor("flaky", "https://example.com", 50))
        .await
        .unwrap();

    assert!(wait_for_checks(&engine, "flaky", 1, Duration::from_secs(5)).await);
    engine.pause("flaky").await.unwrap();

    let checks = engine.recent_checks("flaky", 10).await.unwrap();
    let first = checks.first().unwrap();
    assert!(!first.success);
    assert_eq!(first.reason, Some(FailureReason::Unknown));

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_replayed_outcome_changes_nothing() {
    let backend = Arc::new(MemoryBackend::new());
    let tracker = StatusTracker::new(backend.clone(), StatusPolicy::default());

    let outcome = ProbeOutcome::failure("m1", FailureReason::DnsFailure, Duration::ZERO, "no such host");
    let event = tracker.record(&outcome).await.unwrap().unwrap();
    assert_eq!(event.previous, MonitorStatus::Pending);
    assert_eq!(event.current, MonitorStatus::Down);

    let before = backend.get_status("m1").await.unwrap().unwrap();
    assert_eq!(tracker.record(&outcome).await.unwrap(), None);
    let after = backend.get_status("m1").await.unwrap().unwrap();

    assert_eq!(before, after);
    assert_eq!(backend.latest_checks("m1", 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_threshold_absorbs_transient_failure() {
    let backend = Arc::new(MemoryBackend::new());
    let tracker = StatusTracker::new(
        backend,
        StatusPolicy {
            failure_threshold: 2,
            success_threshold: 1,
        },
    );

    let base = chrono::Utc::now();
    let at = |ms| base + chrono::Duration::milliseconds(ms);

    let up = ProbeOutcome::success("m1", Duration::ZERO, "ok").at(at(0));
    assert!(tracker.record(&up).await.unwrap().is_some());

    let blip = ProbeOutcome::failure("m1", FailureReason::Timeout, Duration::ZERO, "slow").at(at(1));
    assert_eq!(tracker.record(&blip).await.unwrap(), None);

    let ok = ProbeOutcome::success("m1", Duration::ZERO, "ok").at(at(2));
    assert_eq!(tracker.record(&ok).await.unwrap(), None);
    assert_eq!(tracker.current("m1").await.unwrap().status, MonitorStatus::Up);
}
