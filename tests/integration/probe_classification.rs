//! Probe outcomes against real (mocked) network targets

use std::time::Duration;

use uptime_engine::config::{EngineConfig, StatusRange};
use uptime_engine::probe::{Probe, ProbeExecutor};
use uptime_engine::{FailureReason, ProbeKind};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

fn executor() -> ProbeExecutor {
    ProbeExecutor::new(&EngineConfig::default()).unwrap()
}

#[tokio::test]
async fn test_2xx_is_success_with_latency() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let monitor = http_monitor("m1", &format!("{}/health", server.uri()), 60_000);
    let outcome = executor().check(&monitor, Duration::from_secs(2)).await;

    assert!(outcome.success, "{outcome:?}");
    assert_eq!(outcome.status_code, Some(204));
    assert_eq!(outcome.reason, None);
    assert_eq!(outcome.monitor_id, "m1");
}

#[tokio::test]
async fn test_500_is_http_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let outcome = executor()
        .probe(&server.uri(), ProbeKind::Http, Duration::from_secs(2))
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.reason, Some(FailureReason::HttpError(500)));
    assert_eq!(outcome.status_code, Some(500));
}

#[tokio::test]
async fn test_slow_response_is_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let outcome = executor()
        .probe(&server.uri(), ProbeKind::Http, Duration::from_millis(200))
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.reason, Some(FailureReason::Timeout));
    assert!(outcome.latency < Duration::from_secs(2));
}

#[tokio::test]
async fn test_closed_port_is_connection_refused() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let outcome = executor()
        .probe(&format!("http://{addr}"), ProbeKind::Http, Duration::from_secs(2))
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.reason, Some(FailureReason::ConnectionRefused));
}

#[tokio::test]
async fn test_accepted_status_is_configurable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let config = EngineConfig {
        accepted_status: vec![StatusRange { min: 200, max: 299 }, StatusRange { min: 404, max: 404 }],
        ..EngineConfig::default()
    };
    let outcome = ProbeExecutor::new(&config)
        .unwrap()
        .probe(&server.uri(), ProbeKind::Http, Duration::from_secs(2))
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.status_code, Some(404));
}
