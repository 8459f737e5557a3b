//! ICMP echo check
//!
//! Opening an ICMP socket needs either root, `CAP_NET_RAW` or an unprivileged
//! ping group. Without it every ping probe fails with `unknown`.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use rand::random;
use surge_ping::{Client, Config, ICMP, PingIdentifier, PingSequence, SurgeError};
use tracing::trace;

use crate::model::{FailureReason, Monitor, ProbeOutcome};

#[derive(Debug, Clone)]
pub struct PingProbe {
    /// Echo requests sent before giving up
    count: u16,
}

impl PingProbe {
    pub fn new(count: u16) -> Self {
        Self { count: count.max(1) }
    }

    /// Succeeds as soon as one echo reply arrives
    pub async fn check(&self, monitor: &Monitor, timeout: Duration) -> ProbeOutcome {
        let start = Instant::now();

        let addr = match resolve(monitor.target.trim()).await {
            Ok(addr) => addr,
            Err(message) => {
                return ProbeOutcome::failure(
                    monitor.id.clone(),
                    FailureReason::Unresolvable,
                    start.elapsed(),
                    message,
                );
            }
        };

        let config = match addr {
            IpAddr::V4(_) => Config::default(),
            IpAddr::V6(_) => Config::builder().kind(ICMP::V6).build(),
        };
        let client = match Client::new(&config) {
            Ok(client) => client,
            Err(e) => {
                return ProbeOutcome::failure(
                    monitor.id.clone(),
                    FailureReason::Unknown,
                    start.elapsed(),
                    format!("cannot open ICMP socket: {e}"),
                );
            }
        };

        let mut pinger = client.pinger(addr, PingIdentifier(random())).await;
        pinger.timeout(timeout / u32::from(self.count));

        let mut last_failure = (FailureReason::Timeout, String::from("no echo reply"));
        for seq in 0..self.count {
            match pinger.ping(PingSequence(seq), &[]).await {
                Ok((_reply, rtt)) => {
                    trace!("echo reply from {addr} in {rtt:?}");
                    return ProbeOutcome::success(monitor.id.clone(), rtt, format!("reply from {addr}"));
                }
                Err(SurgeError::Timeout { .. }) => {
                    last_failure = (FailureReason::Timeout, format!("no echo reply from {addr}"));
                }
                Err(e) => {
                    last_failure = (FailureReason::Unknown, e.to_string());
                }
            }
        }

        let (reason, message) = last_failure;
        ProbeOutcome::failure(monitor.id.clone(), reason, start.elapsed(), message)
    }
}

async fn resolve(host: &str) -> Result<IpAddr, String> {
    if let Ok(addr) = host.parse::<IpAddr>() {
        return Ok(addr);
    }

    let mut addrs = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| format!("failed to resolve {host}: {e}"))?;

    addrs
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| format!("{host} resolved to no addresses"))
}
