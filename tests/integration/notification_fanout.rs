//! Fan-out of transition events to independent channels

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use uptime_engine::notify::{ChannelConfig, NotificationDispatcher, NotifyError, PushAuth, ReqwestPushTransport};
use uptime_engine::storage::MemoryBackend;
use uptime_engine::{Engine, FailureReason, MonitorStatus, ProbeOutcome, TransitionEvent};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

fn push(server_url: &str, topic: &str, auth: PushAuth) -> ChannelConfig {
    ChannelConfig::Push {
        server_url: server_url.to_string(),
        topic: topic.to_string(),
        priority: 5,
        auth,
    }
}

fn down_event(monitor_id: &str) -> TransitionEvent {
    let outcome = ProbeOutcome::failure(monitor_id, FailureReason::ConnectionRefused, Duration::ZERO, "refused");
    TransitionEvent {
        monitor_id: monitor_id.to_string(),
        previous: MonitorStatus::Up,
        current: MonitorStatus::Down,
        timestamp: outcome.timestamp,
        outcome,
    }
}

fn dispatcher() -> NotificationDispatcher {
    NotificationDispatcher::new(None, Arc::new(ReqwestPushTransport::new()), Duration::from_secs(2))
}

#[tokio::test]
async fn test_failing_channel_does_not_block_others() {
    let broken = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&broken)
        .await;

    let working = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ops"))
        .and(header("Tags", "red_circle"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&working)
        .await;

    let monitor = http_monitor("api", "https://api.example.com", 60_000).with_notifications(vec![
        push(&broken.uri(), "ops", PushAuth::None),
        ChannelConfig::Email {
            address: "ops@example.com".to_string(),
        },
        push(&working.uri(), "ops", PushAuth::None),
    ]);

    let reports = dispatcher().dispatch(&down_event("api"), &monitor).await;

    assert_eq!(reports.len(), 3);
    assert_matches!(reports[0].result, Err(NotifyError::Rejected { status: 503 }));
    assert_matches!(reports[1].result, Err(NotifyError::InvalidConfiguration(_)));
    assert!(reports[2].result.is_ok());
}

#[tokio::test]
async fn test_push_sends_authorization() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/alerts"))
        .and(header("Authorization", "Bearer tk_123"))
        .and(header("Priority", "5"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let channel = push(
        &server.uri(),
        "alerts",
        PushAuth::Bearer {
            token: "tk_123".to_string(),
        },
    );
    dispatcher().test_channel(&channel).await.unwrap();
}

#[tokio::test]
async fn test_slow_channel_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let dispatcher = NotificationDispatcher::new(
        None,
        Arc::new(ReqwestPushTransport::new()),
        Duration::from_millis(200),
    );
    let result = dispatcher.test_channel(&push(&server.uri(), "alerts", PushAuth::None)).await;
    assert_matches!(result, Err(NotifyError::Timeout(_)));
}

#[tokio::test]
async fn test_malformed_channel_fails_test_and_later_deliveries_only() {
    let recorder = Arc::new(RecordingPush::new(200));
    let probe = Arc::new(ScriptedProbe::new(Duration::ZERO, Step::Fail(FailureReason::Timeout)));
    let engine = Engine::builder(test_config(2), Arc::new(MemoryBackend::new()))
        .probe(probe)
        .push_transport(recorder.clone())
        .start()
        .await
        .unwrap();

    let malformed = push(
        "not a url",
        "alerts",
        PushAuth::Bearer {
            token: "tk_123".to_string(),
        },
    );
    let result = engine.test_channel(&malformed).await;
    assert_matches!(result, Err(NotifyError::InvalidConfiguration(_)));

    let missing_token = push("https://push.example.com", "alerts", PushAuth::Bearer { token: String::new() });
    assert!(engine.test_channel(&missing_token).await.is_err());
    assert!(recorder.sent().is_empty());

    let monitor = http_monitor("api", "https://api.example.com", 50)
        .with_notifications(vec![malformed, push("https://push.example.com", "ops", PushAuth::None)]);
    engine.create_schedule(monitor).await.unwrap();

    assert!(wait_for_checks(&engine, "api", 2, Duration::from_secs(5)).await);
    engine.pause("api").await.unwrap();

    let sent = recorder.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].url, "https://push.example.com/ops");
    assert_eq!(engine.status("api").await.unwrap().status, MonitorStatus::Down);

    engine.shutdown().await.unwrap();
}
