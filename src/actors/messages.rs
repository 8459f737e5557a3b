//! Message types for actor communication
//!
//! ## Design Principles
//!
//! 1. **Commands**: Request/response messages sent to the coordinator via mpsc
//! 2. **Completions**: Pool workers report finished runs back to the coordinator
//! 3. **Changes**: Monitor edits arriving from outside (push) or from the reconciler (poll)

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::model::{Monitor, MonitorId};

use super::scheduler::ScheduleError;

/// Scheduling state of one monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleState {
    /// Waiting for its fire time
    Scheduled,
    /// Probe in flight
    Running,
    /// Excluded from scheduling
    Paused,
    /// Deleted, waiting for an in-flight probe to finish
    Removed,
}

impl fmt::Display for ScheduleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleState::Scheduled => write!(f, "scheduled"),
            ScheduleState::Running => write!(f, "running"),
            ScheduleState::Paused => write!(f, "paused"),
            ScheduleState::Removed => write!(f, "removed"),
        }
    }
}

/// Commands that can be sent to the ScheduleCoordinator
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Start scheduling a new monitor (paused if the monitor is inactive)
    Create {
        monitor: Monitor,
        respond_to: oneshot::Sender<Result<(), ScheduleError>>,
    },

    /// Replace the definition of a known monitor, keeping its schedule
    Update {
        monitor: Monitor,
        respond_to: oneshot::Sender<Result<(), ScheduleError>>,
    },

    /// Stop issuing probes; an in-flight probe finishes but its outcome is dropped
    Pause {
        monitor_id: MonitorId,
        respond_to: oneshot::Sender<Result<(), ScheduleError>>,
    },

    /// Make a paused monitor due immediately
    Resume {
        monitor_id: MonitorId,
        respond_to: oneshot::Sender<Result<(), ScheduleError>>,
    },

    /// Forget a monitor
    ///
    /// Answered only once no probe for the monitor is in flight anymore.
    Remove {
        monitor_id: MonitorId,
        respond_to: oneshot::Sender<Result<(), ScheduleError>>,
    },

    UpdateInterval {
        monitor_id: MonitorId,
        interval: Duration,
        respond_to: oneshot::Sender<Result<(), ScheduleError>>,
    },

    GetState {
        monitor_id: MonitorId,
        respond_to: oneshot::Sender<Option<ScheduleState>>,
    },

    /// Snapshot of every known monitor and its state
    ListMonitors {
        respond_to: oneshot::Sender<Vec<(Monitor, ScheduleState)>>,
    },

    GetStats {
        respond_to: oneshot::Sender<SchedulerStats>,
    },

    /// Stop accepting fires and answer once the pool is drained
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// Sent by a pool worker when a run is over
#[derive(Debug)]
pub struct RunFinished {
    pub monitor_id: MonitorId,

    /// When the probe itself completed; the next fire is measured from here
    pub probe_finished_at: Instant,

    /// The outcome was dropped instead of recorded
    pub discarded: bool,
}

/// Scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchedulerStats {
    pub scheduled: usize,
    pub running: usize,
    pub paused: usize,

    /// Runs handed to the pool since start
    pub dispatched: u64,

    /// Runs whose outcome was dropped because of pause or removal
    pub discarded: u64,

    /// Dispatch rounds that left due monitors waiting for a free worker
    pub saturated: u64,

    /// Delay between fire time and dispatch of the latest run
    pub last_lag: Duration,

    pub max_lag: Duration,
}

/// An edit to the set of monitors made outside the engine
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorChange {
    /// New or edited definition; `active = false` means paused
    Upsert(Monitor),
    Pause(MonitorId),
    Resume(MonitorId),
    Remove(MonitorId),
    UpdateInterval(MonitorId, Duration),
}
