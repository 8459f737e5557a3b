//! ScheduleCoordinator - Owns the schedule of every monitor
//!
//! The coordinator is the single writer of the ready set. Probes never run on
//! its task: due monitors are handed to a bounded pool of workers and report
//! back through a completion channel.
//!
//! ## State Machine
//!
//! ```text
//!            fire time reached            probe finished
//! scheduled ───────────────────▶ running ───────────────▶ scheduled (finish + interval)
//!     │ ▲                           │
//!     │ └──────── resume ───────┐   │ pause (outcome dropped)
//!     └──────── pause ────────▶ paused
//!
//! any ── remove ──▶ removed (slot dropped once no probe is in flight)
//! ```
//!
//! ## Dispatch
//!
//! Due monitors wait in a min-heap keyed by `(due, seq)`, so saturation delays
//! them in FIFO-by-due-time order. Entries carry the slot's version; a pause,
//! removal or reschedule bumps the version and leaves the old entry stale.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::ConfigError;
use crate::model::{Monitor, MonitorId};

use super::messages::{RunFinished, ScheduleState, SchedulerCommand, SchedulerStats};
use super::worker::{CycleResult, Worker};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("monitor '{0}' is not scheduled")]
    NotFound(MonitorId),
    #[error("scheduler is shutting down")]
    ShuttingDown,
    #[error("scheduler is not running")]
    Unavailable,
}

/// Coordinator-side bookkeeping of one monitor
struct Slot {
    monitor: Monitor,
    state: ScheduleState,

    /// Bumped whenever queued heap entries must be ignored
    version: u64,

    /// Liveness flag of the in-flight run, if any
    live: Option<Arc<AtomicBool>>,

    /// Resumed while a discarded run was still in flight
    due_after_run: bool,

    last_finished: Option<Instant>,

    /// Callers of `remove` waiting for the in-flight run
    removal_waiters: Vec<oneshot::Sender<Result<(), ScheduleError>>>,
}

impl Slot {
    fn in_flight(&self) -> bool {
        self.live.is_some()
    }
}

type ReadyEntry = Reverse<(Instant, u64, MonitorId, u64)>;

pub struct ScheduleCoordinator {
    slots: HashMap<MonitorId, Slot>,
    ready: BinaryHeap<ReadyEntry>,
    next_seq: u64,

    command_rx: mpsc::Receiver<SchedulerCommand>,
    finished_tx: mpsc::UnboundedSender<RunFinished>,
    finished_rx: mpsc::UnboundedReceiver<RunFinished>,

    permits: Arc<Semaphore>,
    worker: Arc<Worker>,
    min_interval: Duration,

    stats: SchedulerStats,
    in_flight: usize,
    commands_closed: bool,
    shutting_down: bool,
    shutdown_waiters: Vec<oneshot::Sender<()>>,
}

impl ScheduleCoordinator {
    pub fn new(
        command_rx: mpsc::Receiver<SchedulerCommand>,
        worker: Arc<Worker>,
        workers: usize,
        min_interval: Duration,
    ) -> Self {
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();

        Self {
            slots: HashMap::new(),
            ready: BinaryHeap::new(),
            next_seq: 0,
            command_rx,
            finished_tx,
            finished_rx,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            worker,
            min_interval,
            stats: SchedulerStats::default(),
            in_flight: 0,
            commands_closed: false,
            shutting_down: false,
            shutdown_waiters: Vec::new(),
        }
    }

    /// Run the actor's main loop
    ///
    /// Exits once shutdown was requested (or every handle is gone) and the
    /// pool has drained.
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting schedule coordinator");

        loop {
            let next_due = self.next_due();
            let can_dispatch = !self.shutting_down && next_due.is_some() && self.permits.available_permits() > 0;
            let wake_at = next_due.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                _ = tokio::time::sleep_until(wake_at), if can_dispatch => {
                    self.dispatch_due();
                }

                Some(finished) = self.finished_rx.recv() => {
                    self.on_finished(finished);
                }

                cmd = self.command_rx.recv(), if !self.commands_closed => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => {
                            warn!("command channel closed, shutting down");
                            self.commands_closed = true;
                            self.shutting_down = true;
                        }
                    }
                }
            }

            if self.shutting_down && self.in_flight == 0 {
                break;
            }
        }

        for waiter in self.shutdown_waiters.drain(..) {
            let _ = waiter.send(());
        }
        info!("schedule coordinator stopped ({} runs dispatched)", self.stats.dispatched);
    }

    fn handle_command(&mut self, cmd: SchedulerCommand) {
        match cmd {
            SchedulerCommand::Create { monitor, respond_to } => {
                let _ = respond_to.send(self.create(monitor));
            }
            SchedulerCommand::Update { monitor, respond_to } => {
                let _ = respond_to.send(self.update(monitor));
            }
            SchedulerCommand::Pause { monitor_id, respond_to } => {
                let _ = respond_to.send(self.pause(&monitor_id));
            }
            SchedulerCommand::Resume { monitor_id, respond_to } => {
                let _ = respond_to.send(self.resume(&monitor_id));
            }
            SchedulerCommand::Remove { monitor_id, respond_to } => {
                self.remove(&monitor_id, respond_to);
            }
            SchedulerCommand::UpdateInterval {
                monitor_id,
                interval,
                respond_to,
            } => {
                let _ = respond_to.send(self.update_interval(&monitor_id, interval));
            }
            SchedulerCommand::GetState { monitor_id, respond_to } => {
                let _ = respond_to.send(self.slots.get(&monitor_id).map(|slot| slot.state));
            }
            SchedulerCommand::ListMonitors { respond_to } => {
                let monitors = self
                    .slots
                    .values()
                    .filter(|slot| slot.state != ScheduleState::Removed)
                    .map(|slot| (slot.monitor.clone(), slot.state))
                    .collect();
                let _ = respond_to.send(monitors);
            }
            SchedulerCommand::GetStats { respond_to } => {
                let _ = respond_to.send(self.stats());
            }
            SchedulerCommand::Shutdown { respond_to } => {
                info!("shutdown requested, draining {} in-flight probes", self.in_flight);
                self.shutting_down = true;
                self.shutdown_waiters.push(respond_to);
            }
        }
    }

    fn enqueue(&mut self, monitor_id: &str, due: Instant) {
        let Some(slot) = self.slots.get_mut(monitor_id) else {
            return;
        };
        slot.version += 1;
        slot.state = ScheduleState::Scheduled;

        self.next_seq += 1;
        self.ready
            .push(Reverse((due, self.next_seq, monitor_id.to_string(), slot.version)));
        trace!("monitor {monitor_id} due in {:?}", due.saturating_duration_since(Instant::now()));
    }

    fn is_current(&self, entry: &ReadyEntry) -> bool {
        let Reverse((_, _, monitor_id, version)) = entry;
        self.slots
            .get(monitor_id)
            .is_some_and(|slot| slot.state == ScheduleState::Scheduled && slot.version == *version)
    }

    /// Fire time of the earliest live entry, dropping stale ones on the way
    fn next_due(&mut self) -> Option<Instant> {
        while let Some(entry) = self.ready.peek() {
            if self.is_current(entry) {
                let Reverse((due, ..)) = entry;
                return Some(*due);
            }
            self.ready.pop();
        }
        None
    }

    fn dispatch_due(&mut self) {
        let now = Instant::now();

        while let Some(due) = self.next_due() {
            if due > now {
                return;
            }

            let Ok(permit) = self.permits.clone().try_acquire_owned() else {
                self.stats.saturated += 1;
                debug!("worker pool saturated, {} monitors waiting", self.ready.len());
                return;
            };

            let Some(Reverse((due, _, monitor_id, _))) = self.ready.pop() else {
                return;
            };
            let Some(slot) = self.slots.get_mut(&monitor_id) else {
                continue;
            };

            let lag = now.saturating_duration_since(due);
            self.stats.last_lag = lag;
            self.stats.max_lag = self.stats.max_lag.max(lag);
            if lag > slot.monitor.interval {
                warn!(monitor = %monitor_id, "dispatch lag {lag:?} exceeds interval {:?}", slot.monitor.interval);
            }

            let live = Arc::new(AtomicBool::new(true));
            slot.state = ScheduleState::Running;
            slot.version += 1;
            slot.live = Some(live.clone());
            self.in_flight += 1;
            self.stats.dispatched += 1;

            let monitor = slot.monitor.clone();
            let worker = self.worker.clone();
            let finished_tx = self.finished_tx.clone();

            tokio::spawn(async move {
                let report = worker.run_cycle(&monitor, &live).await;
                // Free the worker before the coordinator hears about it.
                drop(permit);
                let _ = finished_tx.send(RunFinished {
                    monitor_id: monitor.id,
                    probe_finished_at: report.probe_finished_at,
                    discarded: matches!(report.result, CycleResult::Discarded),
                });
            });
        }
    }

    fn on_finished(&mut self, finished: RunFinished) {
        self.in_flight = self.in_flight.saturating_sub(1);
        if finished.discarded {
            self.stats.discarded += 1;
        }

        let Some(slot) = self.slots.get_mut(&finished.monitor_id) else {
            return;
        };
        slot.live = None;
        slot.last_finished = Some(finished.probe_finished_at);

        let state = slot.state;
        match state {
            ScheduleState::Removed => {
                let slot = self.slots.remove(&finished.monitor_id);
                for waiter in slot.into_iter().flat_map(|slot| slot.removal_waiters) {
                    let _ = waiter.send(Ok(()));
                }
                debug!("monitor {} released after its last run", finished.monitor_id);
            }
            ScheduleState::Running if !self.shutting_down => {
                let due = if std::mem::take(&mut slot.due_after_run) {
                    Instant::now()
                } else {
                    finished.probe_finished_at + slot.monitor.interval
                };
                self.enqueue(&finished.monitor_id, due);
            }
            ScheduleState::Running => {
                slot.state = ScheduleState::Scheduled;
            }
            ScheduleState::Paused | ScheduleState::Scheduled => {}
        }
    }

    fn create(&mut self, monitor: Monitor) -> Result<(), ScheduleError> {
        if self.shutting_down {
            return Err(ScheduleError::ShuttingDown);
        }
        monitor.validate(self.min_interval)?;
        if self.slots.contains_key(&monitor.id) {
            return Err(ConfigError::DuplicateMonitor(monitor.id).into());
        }

        let monitor_id = monitor.id.clone();
        let active = monitor.active;
        self.slots.insert(
            monitor_id.clone(),
            Slot {
                monitor,
                state: ScheduleState::Paused,
                version: 0,
                live: None,
                due_after_run: false,
                last_finished: None,
                removal_waiters: Vec::new(),
            },
        );

        if active {
            self.enqueue(&monitor_id, Instant::now());
        }
        info!("scheduled monitor {monitor_id} (active: {active})");
        Ok(())
    }

    fn slot_mut(&mut self, monitor_id: &str) -> Result<&mut Slot, ScheduleError> {
        self.slots
            .get_mut(monitor_id)
            .filter(|slot| slot.state != ScheduleState::Removed)
            .ok_or_else(|| ScheduleError::NotFound(monitor_id.to_string()))
    }

    /// Due time after an interval change of a waiting monitor
    fn rescheduled_due(slot: &Slot) -> Instant {
        let now = Instant::now();
        slot.last_finished
            .map(|finished| (finished + slot.monitor.interval).max(now))
            .unwrap_or(now)
    }

    fn update(&mut self, monitor: Monitor) -> Result<(), ScheduleError> {
        monitor.validate(self.min_interval)?;
        let slot = self.slot_mut(&monitor.id)?;

        let interval_changed = slot.monitor.interval != monitor.interval;
        let monitor_id = monitor.id.clone();
        slot.monitor = monitor;

        if interval_changed && slot.state == ScheduleState::Scheduled {
            let due = Self::rescheduled_due(slot);
            self.enqueue(&monitor_id, due);
        }
        debug!("updated definition of monitor {monitor_id}");
        Ok(())
    }

    fn update_interval(&mut self, monitor_id: &str, interval: Duration) -> Result<(), ScheduleError> {
        if interval < self.min_interval {
            return Err(ConfigError::IntervalTooShort {
                monitor: monitor_id.to_string(),
                interval,
                minimum: self.min_interval,
            }
            .into());
        }

        let slot = self.slot_mut(monitor_id)?;
        slot.monitor.interval = interval;

        if slot.state == ScheduleState::Scheduled {
            let due = Self::rescheduled_due(slot);
            self.enqueue(monitor_id, due);
        }
        info!("monitor {monitor_id} interval set to {interval:?}");
        Ok(())
    }

    fn pause(&mut self, monitor_id: &str) -> Result<(), ScheduleError> {
        let slot = self.slot_mut(monitor_id)?;

        if let Some(live) = &slot.live {
            live.store(false, Ordering::Release);
        }
        slot.state = ScheduleState::Paused;
        slot.version += 1;
        slot.due_after_run = false;
        slot.monitor.active = false;

        info!("paused monitor {monitor_id}");
        Ok(())
    }

    fn resume(&mut self, monitor_id: &str) -> Result<(), ScheduleError> {
        if self.shutting_down {
            return Err(ScheduleError::ShuttingDown);
        }
        let slot = self.slot_mut(monitor_id)?;
        if slot.state != ScheduleState::Paused {
            return Ok(());
        }
        slot.monitor.active = true;

        if slot.in_flight() {
            // The discarded run is still going; fire right after it.
            slot.state = ScheduleState::Running;
            slot.due_after_run = true;
        } else {
            self.enqueue(monitor_id, Instant::now());
        }

        info!("resumed monitor {monitor_id}");
        Ok(())
    }

    fn remove(&mut self, monitor_id: &str, respond_to: oneshot::Sender<Result<(), ScheduleError>>) {
        let slot = match self.slot_mut(monitor_id) {
            Ok(slot) => slot,
            Err(e) => {
                let _ = respond_to.send(Err(e));
                return;
            }
        };

        if let Some(live) = &slot.live {
            live.store(false, Ordering::Release);
            slot.state = ScheduleState::Removed;
            slot.version += 1;
            slot.removal_waiters.push(respond_to);
            info!("removing monitor {monitor_id} once its probe finishes");
        } else {
            self.slots.remove(monitor_id);
            let _ = respond_to.send(Ok(()));
            info!("removed monitor {monitor_id}");
        }
    }

    fn stats(&self) -> SchedulerStats {
        let mut stats = self.stats.clone();
        stats.scheduled = 0;
        stats.running = 0;
        stats.paused = 0;

        for slot in self.slots.values() {
            match slot.state {
                ScheduleState::Scheduled => stats.scheduled += 1,
                ScheduleState::Running => stats.running += 1,
                ScheduleState::Paused => stats.paused += 1,
                ScheduleState::Removed => {}
            }
        }
        stats
    }
}

/// Handle for controlling the ScheduleCoordinator
///
/// Cheap to clone; every clone talks to the same actor.
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// Spawn the coordinator as a tokio task and return its handle
    pub fn spawn(worker: Arc<Worker>, workers: usize, min_interval: Duration) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);

        let actor = ScheduleCoordinator::new(cmd_rx, worker, workers, min_interval);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> SchedulerCommand,
    ) -> Result<T, ScheduleError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(command(tx))
            .await
            .map_err(|_| ScheduleError::Unavailable)?;

        rx.await.map_err(|_| ScheduleError::Unavailable)
    }

    pub async fn create(&self, monitor: Monitor) -> Result<(), ScheduleError> {
        self.request(|respond_to| SchedulerCommand::Create { monitor, respond_to })
            .await?
    }

    pub async fn update(&self, monitor: Monitor) -> Result<(), ScheduleError> {
        self.request(|respond_to| SchedulerCommand::Update { monitor, respond_to })
            .await?
    }

    pub async fn pause(&self, monitor_id: &str) -> Result<(), ScheduleError> {
        let monitor_id = monitor_id.to_string();
        self.request(|respond_to| SchedulerCommand::Pause { monitor_id, respond_to })
            .await?
    }

    pub async fn resume(&self, monitor_id: &str) -> Result<(), ScheduleError> {
        let monitor_id = monitor_id.to_string();
        self.request(|respond_to| SchedulerCommand::Resume { monitor_id, respond_to })
            .await?
    }

    /// Returns once no probe for the monitor is in flight anymore
    pub async fn remove(&self, monitor_id: &str) -> Result<(), ScheduleError> {
        let monitor_id = monitor_id.to_string();
        self.request(|respond_to| SchedulerCommand::Remove { monitor_id, respond_to })
            .await?
    }

    pub async fn update_interval(&self, monitor_id: &str, interval: Duration) -> Result<(), ScheduleError> {
        let monitor_id = monitor_id.to_string();
        self.request(|respond_to| SchedulerCommand::UpdateInterval {
            monitor_id,
            interval,
            respond_to,
        })
        .await?
    }

    pub async fn state(&self, monitor_id: &str) -> Result<Option<ScheduleState>, ScheduleError> {
        let monitor_id = monitor_id.to_string();
        self.request(|respond_to| SchedulerCommand::GetState { monitor_id, respond_to })
            .await
    }

    pub async fn monitors(&self) -> Result<Vec<(Monitor, ScheduleState)>, ScheduleError> {
        self.request(|respond_to| SchedulerCommand::ListMonitors { respond_to })
            .await
    }

    pub async fn stats(&self) -> Result<SchedulerStats, ScheduleError> {
        self.request(|respond_to| SchedulerCommand::GetStats { respond_to })
            .await
    }

    /// Stop firing and wait for in-flight probes to finish
    pub async fn shutdown(&self) -> Result<(), ScheduleError> {
        self.request(|respond_to| SchedulerCommand::Shutdown { respond_to })
            .await
    }
}
