//! HTTP(S) availability check

use std::error::Error as _;
use std::io;
use std::time::{Duration, Instant};

use reqwest::Client;
use tracing::trace;

use crate::config::StatusRange;
use crate::model::{FailureReason, Monitor, ProbeOutcome};

#[derive(Debug, Clone)]
pub struct HttpProbe {
    /// Reused across requests for connection pooling
    client: Client,

    /// Status codes counted as success
    accepted: Vec<StatusRange>,
}

impl HttpProbe {
    pub fn new(accepted: Vec<StatusRange>) -> reqwest::Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("uptime-engine/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, accepted })
    }

    fn is_accepted(&self, code: u16) -> bool {
        self.accepted.iter().any(|range| range.contains(code))
    }

    /// Issue a GET and read the body, all within `timeout`
    pub async fn check(&self, monitor: &Monitor, timeout: Duration) -> ProbeOutcome {
        let url = monitor.probe_target();
        trace!("checking {url}");

        let start = Instant::now();
        let result = async {
            let response = self.client.get(&url).timeout(timeout).send().await?;
            let code = response.status().as_u16();
            // The check only completes once the whole body arrived.
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>((code, body.len()))
        }
        .await;
        let latency = start.elapsed();

        match result {
            Ok((code, _)) if self.is_accepted(code) => {
                ProbeOutcome::success(monitor.id.clone(), latency, format!("HTTP {code}")).with_status_code(code)
            }
            Ok((code, len)) => ProbeOutcome::failure(
                monitor.id.clone(),
                FailureReason::HttpError(code),
                latency,
                format!("unexpected status code {code} ({len} bytes)"),
            )
            .with_status_code(code),
            Err(e) => ProbeOutcome::failure(monitor.id.clone(), classify(&e), latency, error_chain(&e)),
        }
    }
}

/// Map a transport error onto a failure reason
pub(crate) fn classify(error: &reqwest::Error) -> FailureReason {
    if error.is_timeout() {
        return FailureReason::Timeout;
    }

    let mut source = error.source();
    while let Some(cause) = source {
        if let Some(io_error) = cause.downcast_ref::<io::Error>() {
            match io_error.kind() {
                io::ErrorKind::ConnectionRefused => return FailureReason::ConnectionRefused,
                io::ErrorKind::TimedOut => return FailureReason::Timeout,
                _ => {}
            }
        }
        source = cause.source();
    }

    let chain = error_chain(error).to_lowercase();
    if chain.contains("dns error") || chain.contains("failed to lookup address") {
        FailureReason::DnsFailure
    } else if chain.contains("connection refused") {
        FailureReason::ConnectionRefused
    } else {
        FailureReason::Unknown
    }
}

fn error_chain(error: &reqwest::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
