//! One scheduled run: probe, record, notify
//!
//! ```text
//! probe (own task) ─▶ still live? ─▶ record (retried) ─▶ scheduling meta ─▶ notify
//!                         └─ no ─▶ discard
//! ```
//!
//! Nothing in a cycle can fail the scheduler: probe panics become `unknown`
//! outcomes and storage errors are retried, then logged.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::config::RetryConfig;
use crate::model::{FailureReason, Monitor, ProbeOutcome, TransitionEvent};
use crate::notify::NotificationDispatcher;
use crate::probe::{Probe, bounded_timeout};
use crate::retry::with_backoff;
use crate::status::StatusTracker;
use crate::storage::{StorageBackend, StorageError};

/// What happened to a run's outcome
#[derive(Debug)]
pub enum CycleResult {
    Recorded(Option<TransitionEvent>),
    /// Monitor was paused or removed while the probe was in flight
    Discarded,
    /// Retry budget exhausted, outcome lost for this cycle
    RecordFailed,
}

#[derive(Debug)]
pub struct CycleReport {
    pub probe_finished_at: Instant,
    pub result: CycleResult,
}

/// Collaborators shared by every pool worker
pub struct Worker {
    probe: Arc<dyn Probe>,
    tracker: Arc<StatusTracker>,
    dispatcher: Arc<NotificationDispatcher>,
    backend: Arc<dyn StorageBackend>,
    probe_timeout: Duration,
    retry: RetryConfig,
}

impl Worker {
    pub fn new(
        probe: Arc<dyn Probe>,
        tracker: Arc<StatusTracker>,
        dispatcher: Arc<NotificationDispatcher>,
        backend: Arc<dyn StorageBackend>,
        probe_timeout: Duration,
        retry: RetryConfig,
    ) -> Self {
        Self {
            probe,
            tracker,
            dispatcher,
            backend,
            probe_timeout,
            retry,
        }
    }

    async fn probe(&self, monitor: &Monitor) -> ProbeOutcome {
        let timeout = bounded_timeout(self.probe_timeout, monitor.interval);
        let probe = self.probe.clone();
        let target = monitor.clone();
        let start = Instant::now();

        match tokio::spawn(async move { probe.check(&target, timeout).await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("probe task failed: {e}");
                ProbeOutcome::failure(
                    monitor.id.clone(),
                    FailureReason::Unknown,
                    start.elapsed(),
                    format!("probe aborted: {e}"),
                )
            }
        }
    }

    /// Execute one run for `monitor`
    ///
    /// `live` is cleared by the coordinator on pause or removal; it is checked
    /// before every write attempt and again before notifying.
    #[instrument(skip_all, fields(monitor = %monitor.id))]
    pub async fn run_cycle(&self, monitor: &Monitor, live: &AtomicBool) -> CycleReport {
        let outcome = self.probe(monitor).await;
        let probe_finished_at = Instant::now();
        let discarded = || {
            debug!("monitor no longer scheduled, discarding outcome");
            CycleReport {
                probe_finished_at,
                result: CycleResult::Discarded,
            }
        };

        let pending = &outcome;
        let recorded = with_backoff(&self.retry, "recording probe outcome", || async move {
            if !live.load(Ordering::Acquire) {
                return Ok(None);
            }
            self.tracker.record(pending).await.map(Some)
        })
        .await;

        let result = match recorded {
            Ok(Some(transition)) => CycleResult::Recorded(transition),
            Ok(None) => return discarded(),
            Err(e) => {
                error!("giving up on recording outcome for this cycle: {e}");
                CycleResult::RecordFailed
            }
        };

        if !live.load(Ordering::Acquire) {
            return discarded();
        }

        let interval = chrono::Duration::from_std(monitor.interval).unwrap_or_else(|_| chrono::Duration::days(1));
        let next_due = Utc::now() + interval;
        match self
            .backend
            .update_scheduling_meta(&monitor.id, outcome.timestamp, next_due)
            .await
        {
            Ok(()) => {}
            Err(StorageError::NotFound(_)) => debug!("monitor is not stored, skipping scheduling metadata"),
            Err(e) => warn!("failed to update scheduling metadata: {e}"),
        }

        if let CycleResult::Recorded(Some(event)) = &result
            && event.is_notifiable()
        {
            let reports = self.dispatcher.dispatch(event, monitor).await;
            let delivered = reports.iter().filter(|r| r.result.is_ok()).count();
            info!(
                "transition {} -> {} notified on {delivered}/{} channels",
                event.previous,
                event.current,
                reports.len()
            );
        }

        CycleReport {
            probe_finished_at,
            result,
        }
    }
}
