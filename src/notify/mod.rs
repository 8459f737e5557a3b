//! Transition notifications
//!
//! Every channel configured on a monitor gets its own delivery attempt with
//! its own timeout. A failing channel is logged and reported, never retried,
//! and never keeps the other channels from being notified.
//!
//! ```text
//! TransitionEvent ─▶ NotificationDispatcher ─┬─▶ EmailNotifier ─▶ EmailTransport
//!                                            └─▶ PushNotifier  ─▶ PushTransport
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::model::{Monitor, MonitorStatus, ProbeKind, ProbeOutcome, TransitionEvent};

pub mod email;
pub mod push;
pub mod templates;

pub use email::{EmailNotifier, EmailTransport, HttpMailRelay};
pub use push::{PushNotifier, PushTransport, ReqwestPushTransport};

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("invalid channel configuration: {0}")]
    InvalidConfiguration(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("delivery rejected with status {status}")]
    Rejected { status: u16 },
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),
    #[error("templating error: {0}")]
    Template(String),
}

impl From<reqwest::Error> for NotifyError {
    fn from(e: reqwest::Error) -> Self {
        NotifyError::Transport(e.to_string())
    }
}

fn default_priority() -> u8 {
    5
}

/// How a push request authenticates
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum PushAuth {
    #[default]
    None,
    Basic { username: String, password: String },
    Bearer { token: String },
}

/// A notification target attached to a monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChannelConfig {
    Email {
        address: String,
    },
    /// ntfy-style push service, published to `server_url/topic`
    Push {
        server_url: String,
        topic: String,
        /// 1 (min) to 5 (max)
        #[serde(default = "default_priority")]
        priority: u8,
        #[serde(default)]
        auth: PushAuth,
    },
}

impl ChannelConfig {
    /// Short description for logs and delivery reports
    pub fn describe(&self) -> String {
        match self {
            ChannelConfig::Email { address } => format!("email:{address}"),
            ChannelConfig::Push { topic, .. } => format!("push:{topic}"),
        }
    }

    /// Check that every field a delivery needs is present
    ///
    /// Malformed URLs are not caught here, they surface when a delivery is
    /// attempted.
    pub fn validate_credentials(&self) -> Result<(), String> {
        match self {
            ChannelConfig::Email { address } => {
                if address.trim().is_empty() || !address.contains('@') {
                    return Err(format!("'{address}' is not an email address"));
                }
            }
            ChannelConfig::Push {
                server_url,
                topic,
                priority,
                auth,
            } => {
                if server_url.trim().is_empty() {
                    return Err("push channel needs a server url".to_string());
                }
                if topic.trim().is_empty() {
                    return Err("push channel needs a topic".to_string());
                }
                if !(1..=5).contains(priority) {
                    return Err(format!("push priority {priority} is outside 1..=5"));
                }
                match auth {
                    PushAuth::None => {}
                    PushAuth::Basic { username, password } => {
                        if username.is_empty() || password.is_empty() {
                            return Err("basic auth needs a username and a password".to_string());
                        }
                    }
                    PushAuth::Bearer { token } => {
                        if token.is_empty() {
                            return Err("bearer auth needs an access token".to_string());
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Delivery capability of one configured channel
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, event: &TransitionEvent, monitor: &Monitor) -> Result<(), NotifyError>;
}

/// Outcome of one channel's delivery attempt
#[derive(Debug)]
pub struct DeliveryReport {
    pub channel: String,
    pub result: Result<(), NotifyError>,
}

/// Fans transition events out to a monitor's channels
pub struct NotificationDispatcher {
    email: Option<Arc<dyn EmailTransport>>,
    push: Arc<dyn PushTransport>,
    timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(email: Option<Arc<dyn EmailTransport>>, push: Arc<dyn PushTransport>, timeout: Duration) -> Self {
        Self { email, push, timeout }
    }

    fn notifier(&self, channel: &ChannelConfig) -> Result<Box<dyn Notifier>, NotifyError> {
        match channel {
            ChannelConfig::Email { address } => {
                let transport = self
                    .email
                    .clone()
                    .ok_or_else(|| NotifyError::InvalidConfiguration("no mail relay configured".to_string()))?;
                Ok(Box::new(EmailNotifier::new(transport, address.clone())))
            }
            ChannelConfig::Push { .. } => Ok(Box::new(PushNotifier::new(self.push.clone(), channel.clone())?)),
        }
    }

    async fn deliver_one(&self, channel: &ChannelConfig, event: &TransitionEvent, monitor: &Monitor) -> DeliveryReport {
        let result = match self.notifier(channel) {
            Ok(notifier) => tokio::time::timeout(self.timeout, notifier.deliver(event, monitor))
                .await
                .unwrap_or(Err(NotifyError::Timeout(self.timeout))),
            Err(e) => Err(e),
        };

        DeliveryReport {
            channel: channel.describe(),
            result,
        }
    }

    /// Deliver `event` to every channel of `monitor`, concurrently
    ///
    /// Never fails as a whole; per-channel results are returned.
    #[instrument(skip_all, fields(monitor = %monitor.id, current = %event.current))]
    pub async fn dispatch(&self, event: &TransitionEvent, monitor: &Monitor) -> Vec<DeliveryReport> {
        let reports = join_all(
            monitor
                .notifications
                .iter()
                .map(|channel| self.deliver_one(channel, event, monitor)),
        )
        .await;

        for report in &reports {
            match &report.result {
                Ok(()) => debug!("notified {}", report.channel),
                Err(e) => warn!("failed to notify {}: {}", report.channel, e),
            }
        }
        reports
    }

    /// Send a synthetic transition through `channel` right now
    #[instrument(skip_all, fields(channel = %channel.describe()))]
    pub async fn test_channel(&self, channel: &ChannelConfig) -> Result<(), NotifyError> {
        let monitor = Monitor::new(
            "channel-test",
            "Channel test",
            "https://example.com",
            ProbeKind::Http,
            Duration::from_secs(60),
        )
        .with_notifications(vec![channel.clone()]);

        let event = TransitionEvent {
            monitor_id: monitor.id.clone(),
            previous: MonitorStatus::Up,
            current: MonitorStatus::Down,
            timestamp: Utc::now(),
            outcome: ProbeOutcome::success(monitor.id.clone(), Duration::ZERO, "This is a test notification"),
        };

        let report = self.deliver_one(channel, &event, &monitor).await;
        if report.result.is_ok() {
            info!("test notification delivered");
        }
        report.result
    }
}
