//! Data model shared by the probe, status and scheduling layers
//!
//! ```text
//! Monitor ──probe──▶ ProbeOutcome ──record──▶ StatusRecord ──(on change)──▶ TransitionEvent
//! ```
//!
//! `Monitor` and `StatusRecord` are owned by the storage backend, `ProbeOutcome`
//! is append-only history and `TransitionEvent` only lives until the dispatcher
//! has fanned it out.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::config::ConfigError;
use crate::notify::ChannelConfig;

/// Unique identifier of a monitor
pub type MonitorId = String;

/// How a target is checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    Http,
    Ping,
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeKind::Http => write!(f, "http"),
            ProbeKind::Ping => write!(f, "ping"),
        }
    }
}

impl FromStr for ProbeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(ProbeKind::Http),
            "ping" => Ok(ProbeKind::Ping),
            other => Err(format!("unknown probe kind '{other}'")),
        }
    }
}

/// Availability of a monitor as seen by the status tracker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    /// No outcome has been recorded yet
    #[default]
    Pending,
    Up,
    Down,
}

impl fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorStatus::Pending => write!(f, "pending"),
            MonitorStatus::Up => write!(f, "up"),
            MonitorStatus::Down => write!(f, "down"),
        }
    }
}

impl FromStr for MonitorStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MonitorStatus::Pending),
            "up" => Ok(MonitorStatus::Up),
            "down" => Ok(MonitorStatus::Down),
            other => Err(format!("unknown monitor status '{other}'")),
        }
    }
}

/// A watched target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Monitor {
    pub id: MonitorId,

    /// Display name used in notifications
    pub name: String,

    /// URL for `http`, host name or IP address for `ping`
    pub target: String,

    pub kind: ProbeKind,

    /// Check interval, stored in milliseconds
    #[serde(
        rename = "interval_ms",
        with = "crate::util::duration_ms",
        default = "default_interval"
    )]
    pub interval: Duration,

    /// Paused monitors are loaded but never scheduled
    #[serde(default = "default_active")]
    pub active: bool,

    /// Ordered channel configurations, replaced wholesale on edit
    #[serde(default)]
    pub notifications: Vec<ChannelConfig>,

    #[serde(default)]
    pub status: MonitorStatus,

    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
}

fn default_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_active() -> bool {
    true
}

impl Monitor {
    pub fn new(
        id: impl Into<MonitorId>,
        name: impl Into<String>,
        target: impl Into<String>,
        kind: ProbeKind,
        interval: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            target: target.into(),
            kind,
            interval,
            active: true,
            notifications: vec![],
            status: MonitorStatus::Pending,
            last_checked: None,
        }
    }

    pub fn with_notifications(mut self, notifications: Vec<ChannelConfig>) -> Self {
        self.notifications = notifications;
        self
    }

    /// The address a probe actually contacts
    ///
    /// HTTP targets given without a scheme are checked over https.
    pub fn probe_target(&self) -> String {
        match self.kind {
            ProbeKind::Http if !self.target.contains("://") => format!("https://{}", self.target),
            _ => self.target.clone(),
        }
    }

    /// Reject definitions that must never reach the scheduling loop
    pub fn validate(&self, min_interval: Duration) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::InvalidTarget {
                monitor: self.id.clone(),
                reason: "monitor id must not be empty".to_string(),
            });
        }

        if self.interval < min_interval {
            return Err(ConfigError::IntervalTooShort {
                monitor: self.id.clone(),
                interval: self.interval,
                minimum: min_interval,
            });
        }

        match self.kind {
            ProbeKind::Http => {
                let url = url::Url::parse(&self.probe_target()).map_err(|e| {
                    ConfigError::InvalidTarget {
                        monitor: self.id.clone(),
                        reason: e.to_string(),
                    }
                })?;
                if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
                    return Err(ConfigError::InvalidTarget {
                        monitor: self.id.clone(),
                        reason: format!("'{}' is not an http(s) url", self.target),
                    });
                }
            }
            ProbeKind::Ping => {
                let host = self.target.trim();
                if host.is_empty() || host.contains("://") || host.contains(char::is_whitespace) {
                    return Err(ConfigError::InvalidTarget {
                        monitor: self.id.clone(),
                        reason: format!("'{}' is not a host name or address", self.target),
                    });
                }
            }
        }

        for channel in &self.notifications {
            channel.validate_credentials().map_err(|reason| {
                ConfigError::MissingCredentials {
                    monitor: self.id.clone(),
                    reason,
                }
            })?;
        }

        Ok(())
    }
}

/// Classified cause of a failed probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    Timeout,
    ConnectionRefused,
    DnsFailure,
    Unresolvable,
    HttpError(u16),
    Unknown,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Timeout => write!(f, "timeout"),
            FailureReason::ConnectionRefused => write!(f, "connection-refused"),
            FailureReason::DnsFailure => write!(f, "dns-failure"),
            FailureReason::Unresolvable => write!(f, "unresolvable"),
            FailureReason::HttpError(code) => write!(f, "http-error:{code}"),
            FailureReason::Unknown => write!(f, "unknown"),
        }
    }
}

impl FromStr for FailureReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timeout" => Ok(FailureReason::Timeout),
            "connection-refused" => Ok(FailureReason::ConnectionRefused),
            "dns-failure" => Ok(FailureReason::DnsFailure),
            "unresolvable" => Ok(FailureReason::Unresolvable),
            "unknown" => Ok(FailureReason::Unknown),
            other => other
                .strip_prefix("http-error:")
                .and_then(|code| code.parse().ok())
                .map(FailureReason::HttpError)
                .ok_or_else(|| format!("unknown failure reason '{other}'")),
        }
    }
}

impl Serialize for FailureReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FailureReason {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Result of one check, immutable once created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub monitor_id: MonitorId,

    /// When the probe completed
    pub timestamp: DateTime<Utc>,

    pub success: bool,

    /// End-to-end latency
    #[serde(rename = "latency_ms", with = "crate::util::duration_ms")]
    pub latency: Duration,

    /// Set exactly when `success` is false
    pub reason: Option<FailureReason>,

    /// HTTP status code, if a response was received
    pub status_code: Option<u16>,

    /// Raw diagnostic message
    pub message: String,
}

impl ProbeOutcome {
    pub fn success(monitor_id: impl Into<MonitorId>, latency: Duration, message: impl Into<String>) -> Self {
        Self {
            monitor_id: monitor_id.into(),
            timestamp: Utc::now(),
            success: true,
            latency,
            reason: None,
            status_code: None,
            message: message.into(),
        }
    }

    pub fn failure(
        monitor_id: impl Into<MonitorId>,
        reason: FailureReason,
        latency: Duration,
        message: impl Into<String>,
    ) -> Self {
        Self {
            monitor_id: monitor_id.into(),
            timestamp: Utc::now(),
            success: false,
            latency,
            reason: Some(reason),
            status_code: None,
            message: message.into(),
        }
    }

    pub fn with_status_code(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Derived availability state per monitor, single writer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub monitor_id: MonitorId,

    pub status: MonitorStatus,

    pub consecutive_failures: u32,

    pub consecutive_successes: u32,

    pub last_transition_at: Option<DateTime<Utc>>,

    /// Timestamp of the newest outcome folded into this record
    ///
    /// Outcomes not newer than this are replays and are ignored.
    pub last_outcome_at: Option<DateTime<Utc>>,

    /// Classification of the most recent failure, cleared on success
    pub last_reason: Option<FailureReason>,

    pub last_message: Option<String>,
}

impl StatusRecord {
    pub fn pending(monitor_id: impl Into<MonitorId>) -> Self {
        Self {
            monitor_id: monitor_id.into(),
            status: MonitorStatus::Pending,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_transition_at: None,
            last_outcome_at: None,
            last_reason: None,
            last_message: None,
        }
    }
}

/// Emitted when a monitor's status changes
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionEvent {
    pub monitor_id: MonitorId,
    pub previous: MonitorStatus,
    pub current: MonitorStatus,
    pub timestamp: DateTime<Utc>,
    /// The outcome that caused the transition
    pub outcome: ProbeOutcome,
}

impl TransitionEvent {
    /// Whether channels should hear about this transition
    ///
    /// The first outcome of a healthy monitor moves it from `pending` to `up`,
    /// which is not news.
    pub fn is_notifiable(&self) -> bool {
        !matches!(
            (self.previous, self.current),
            (MonitorStatus::Pending, MonitorStatus::Up)
        )
    }
}
