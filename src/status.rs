//! Status tracking with hysteresis
//!
//! Turns the stream of probe outcomes for a monitor into `up`/`down`
//! transitions. A single transient failure does not flip a monitor when
//! `failure_threshold > 1`:
//!
//! ```text
//! pending ──first outcome──▶ up | down
//! up   ──failure_threshold consecutive failures──▶ down
//! down ──success_threshold consecutive successes──▶ up
//! ```
//!
//! Counters reset on every transition. Each monitor has a single writer: the
//! scheduler never runs two probes for the same monitor at once.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use crate::config::EngineConfig;
use crate::model::{MonitorStatus, ProbeOutcome, StatusRecord, TransitionEvent};
use crate::storage::{StorageBackend, StorageResult};

/// Consecutive-count thresholds for status changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusPolicy {
    pub failure_threshold: u32,
    pub success_threshold: u32,
}

impl Default for StatusPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 1,
            success_threshold: 1,
        }
    }
}

impl From<&EngineConfig> for StatusPolicy {
    fn from(config: &EngineConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            success_threshold: config.success_threshold.max(1),
        }
    }
}

/// Result of folding one outcome into a status record
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    /// Outcome is not newer than the last one folded in
    Replay,
    /// Counters moved, status did not
    Unchanged,
    Transition {
        previous: MonitorStatus,
        current: MonitorStatus,
    },
}

/// Fold `outcome` into `record`
///
/// Pure state machine, no I/O. On `Replay` the record is left untouched.
pub fn apply(record: &mut StatusRecord, outcome: &ProbeOutcome, policy: StatusPolicy) -> Applied {
    if record
        .last_outcome_at
        .is_some_and(|last| outcome.timestamp <= last)
    {
        return Applied::Replay;
    }

    record.last_outcome_at = Some(outcome.timestamp);
    record.last_message = Some(outcome.message.clone());

    if outcome.success {
        record.consecutive_successes = record.consecutive_successes.saturating_add(1);
        record.consecutive_failures = 0;
        record.last_reason = None;
    } else {
        record.consecutive_failures = record.consecutive_failures.saturating_add(1);
        record.consecutive_successes = 0;
        record.last_reason = outcome.reason;
    }

    let previous = record.status;
    let next = match previous {
        MonitorStatus::Pending if outcome.success => MonitorStatus::Up,
        MonitorStatus::Pending => MonitorStatus::Down,
        MonitorStatus::Up if record.consecutive_failures >= policy.failure_threshold => MonitorStatus::Down,
        MonitorStatus::Down if record.consecutive_successes >= policy.success_threshold => MonitorStatus::Up,
        current => current,
    };

    if next == previous {
        return Applied::Unchanged;
    }

    record.status = next;
    record.last_transition_at = Some(outcome.timestamp);
    record.consecutive_failures = 0;
    record.consecutive_successes = 0;

    Applied::Transition {
        previous,
        current: next,
    }
}

/// Owner of every monitor's [`StatusRecord`]
///
/// Records are persisted through the storage backend and cached in memory so
/// that `current` keeps answering while storage is failing.
pub struct StatusTracker {
    backend: Arc<dyn StorageBackend>,
    policy: StatusPolicy,
    cache: RwLock<HashMap<String, StatusRecord>>,
}

impl StatusTracker {
    pub fn new(backend: Arc<dyn StorageBackend>, policy: StatusPolicy) -> Self {
        Self {
            backend,
            policy,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> StatusPolicy {
        self.policy
    }

    async fn load(&self, monitor_id: &str) -> StorageResult<StatusRecord> {
        if let Some(record) = self.cache.read().await.get(monitor_id) {
            return Ok(record.clone());
        }

        let record = self
            .backend
            .get_status(monitor_id)
            .await?
            .unwrap_or_else(|| StatusRecord::pending(monitor_id));
        Ok(record)
    }

    /// Fold an outcome into the monitor's status and persist it together with
    /// the history entry
    ///
    /// Returns the transition, if one happened. When the write fails the cached
    /// record is left as it was, so the caller can retry with the same outcome.
    #[instrument(skip_all, fields(monitor = %outcome.monitor_id))]
    pub async fn record(&self, outcome: &ProbeOutcome) -> StorageResult<Option<TransitionEvent>> {
        let mut record = self.load(&outcome.monitor_id).await?;

        let applied = apply(&mut record, outcome, self.policy);
        if applied == Applied::Replay {
            debug!("ignoring replayed outcome from {}", outcome.timestamp);
            return Ok(None);
        }

        self.backend.commit_check(&record, outcome).await?;
        self.cache
            .write()
            .await
            .insert(outcome.monitor_id.clone(), record);

        match applied {
            Applied::Transition { previous, current } => {
                info!("status changed: {previous} -> {current}");
                Ok(Some(TransitionEvent {
                    monitor_id: outcome.monitor_id.clone(),
                    previous,
                    current,
                    timestamp: outcome.timestamp,
                    outcome: outcome.clone(),
                }))
            }
            _ => Ok(None),
        }
    }

    /// Latest known record, served from cache when storage is unavailable
    pub async fn current(&self, monitor_id: &str) -> Option<StatusRecord> {
        match self.backend.get_status(monitor_id).await {
            Ok(Some(record)) => Some(record),
            Ok(None) => self.cache.read().await.get(monitor_id).cloned(),
            Err(e) => {
                debug!("serving cached status for {monitor_id}: {e}");
                self.cache.read().await.get(monitor_id).cloned()
            }
        }
    }

    /// Drop the cached record of a removed monitor
    pub async fn forget(&self, monitor_id: &str) {
        self.cache.write().await.remove(monitor_id);
    }
}
