//! Network checks
//!
//! A probe turns `(monitor, timeout)` into a [`ProbeOutcome`]. It never
//! returns an error: DNS failures, refused connections, bad status codes and
//! timeouts are all data that the status tracker consumes.
//!
//! ```text
//! ProbeExecutor ──http──▶ HttpProbe (reqwest)
//!               └─ping──▶ PingProbe (surge-ping)
//! ```

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::config::EngineConfig;
use crate::model::{FailureReason, Monitor, ProbeKind, ProbeOutcome};

pub mod http;
pub mod ping;

pub use http::HttpProbe;
pub use ping::PingProbe;

/// Something that can check a monitor
///
/// The scheduler only depends on this trait, so tests can swap in scripted
/// probes.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn check(&self, monitor: &Monitor, timeout: Duration) -> ProbeOutcome;
}

/// Timeout actually applied to a monitor's probe
///
/// A probe must finish strictly before the next one is due. When the
/// configured timeout does not fit, 80% of the interval is used instead.
pub fn bounded_timeout(configured: Duration, interval: Duration) -> Duration {
    if configured < interval {
        configured
    } else {
        interval.mul_f64(0.8)
    }
}

/// Dispatches to the probe matching the monitor's kind
pub struct ProbeExecutor {
    http: HttpProbe,
    ping: PingProbe,
}

impl ProbeExecutor {
    pub fn new(config: &EngineConfig) -> reqwest::Result<Self> {
        Ok(Self {
            http: HttpProbe::new(config.accepted_status.clone())?,
            ping: PingProbe::new(config.ping_count),
        })
    }

    /// Check `target` as `kind` outside of any scheduled monitor
    pub async fn probe(&self, target: &str, kind: ProbeKind, timeout: Duration) -> ProbeOutcome {
        let monitor = Monitor::new("adhoc", target, target, kind, timeout.saturating_mul(2));
        self.check(&monitor, timeout).await
    }
}

#[async_trait]
impl Probe for ProbeExecutor {
    #[instrument(skip_all, fields(monitor = %monitor.id, kind = %monitor.kind))]
    async fn check(&self, monitor: &Monitor, timeout: Duration) -> ProbeOutcome {
        let start = Instant::now();

        let checked = match monitor.kind {
            ProbeKind::Http => tokio::time::timeout(timeout, self.http.check(monitor, timeout)).await,
            ProbeKind::Ping => tokio::time::timeout(timeout, self.ping.check(monitor, timeout)).await,
        };

        let outcome = checked.unwrap_or_else(|_| {
            ProbeOutcome::failure(
                monitor.id.clone(),
                FailureReason::Timeout,
                start.elapsed(),
                format!("no answer within {timeout:?}"),
            )
        });

        if outcome.success {
            debug!("probe succeeded in {:?}", outcome.latency);
        } else {
            debug!(
                "probe failed ({}): {}",
                outcome.reason.unwrap_or(FailureReason::Unknown),
                outcome.message
            );
        }
        outcome
    }
}
