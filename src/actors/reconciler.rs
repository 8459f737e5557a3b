//! ReconcilerActor - Poll-mode change detection
//!
//! Periodically compares the monitors in storage with what the coordinator
//! is running and converges the coordinator. Storage is the source of truth:
//!
//! ```text
//! stored, not running      → Upsert (create)
//! stored, definition drift → Upsert (update, pause/resume to match `active`)
//! running, not stored      → Remove
//! ```
//!
//! Push-mode notifications go through [`apply_change`] directly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, instrument, warn};

use crate::model::Monitor;
use crate::storage::{StorageBackend, StorageResult};

use super::messages::{MonitorChange, ScheduleState};
use super::scheduler::{ScheduleError, SchedulerHandle};

/// Apply one external monitor change to the coordinator
pub async fn apply_change(scheduler: &SchedulerHandle, change: MonitorChange) -> Result<(), ScheduleError> {
    match change {
        MonitorChange::Upsert(monitor) => {
            let monitor_id = monitor.id.clone();
            let active = monitor.active;

            match scheduler.state(&monitor_id).await? {
                None => scheduler.create(monitor).await,
                Some(_) => {
                    scheduler.update(monitor).await?;
                    if active {
                        scheduler.resume(&monitor_id).await
                    } else {
                        scheduler.pause(&monitor_id).await
                    }
                }
            }
        }
        MonitorChange::Pause(monitor_id) => scheduler.pause(&monitor_id).await,
        MonitorChange::Resume(monitor_id) => scheduler.resume(&monitor_id).await,
        MonitorChange::Remove(monitor_id) => scheduler.remove(&monitor_id).await,
        MonitorChange::UpdateInterval(monitor_id, interval) => {
            scheduler.update_interval(&monitor_id, interval).await
        }
    }
}

fn same_definition(a: &Monitor, b: &Monitor) -> bool {
    a.name == b.name
        && a.target == b.target
        && a.kind == b.kind
        && a.interval == b.interval
        && a.notifications == b.notifications
}

/// Changes that bring `running` in line with `stored`
pub fn plan(stored: Vec<Monitor>, running: Vec<(Monitor, ScheduleState)>) -> Vec<MonitorChange> {
    let mut running: HashMap<String, (Monitor, ScheduleState)> = running
        .into_iter()
        .map(|(monitor, state)| (monitor.id.clone(), (monitor, state)))
        .collect();

    let mut changes = Vec::new();
    for monitor in stored {
        match running.remove(&monitor.id) {
            None => changes.push(MonitorChange::Upsert(monitor)),
            Some((current, state)) => {
                let paused = state == ScheduleState::Paused;
                if !same_definition(&current, &monitor) || paused == monitor.active {
                    changes.push(MonitorChange::Upsert(monitor));
                }
            }
        }
    }

    let mut removed: Vec<String> = running.into_keys().collect();
    removed.sort();
    changes.extend(removed.into_iter().map(MonitorChange::Remove));
    changes
}

/// Commands that can be sent to the ReconcilerActor
#[derive(Debug)]
pub enum ReconcilerCommand {
    /// Reconcile immediately, answering with the number of applied changes
    ReconcileNow {
        respond_to: oneshot::Sender<StorageResult<usize>>,
    },
    Shutdown,
}

pub struct ReconcilerActor {
    backend: Arc<dyn StorageBackend>,
    scheduler: SchedulerHandle,
    period: Duration,
    command_rx: mpsc::Receiver<ReconcilerCommand>,
}

impl ReconcilerActor {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        scheduler: SchedulerHandle,
        period: Duration,
        command_rx: mpsc::Receiver<ReconcilerCommand>,
    ) -> Self {
        Self {
            backend,
            scheduler,
            period,
            command_rx,
        }
    }

    #[instrument(skip(self), fields(period = ?self.period))]
    pub async fn run(mut self) {
        debug!("starting reconciler");

        // Startup already loaded every monitor, so the first pass waits a period.
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.reconcile().await {
                        warn!("reconciliation skipped: {e}");
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        ReconcilerCommand::ReconcileNow { respond_to } => {
                            let _ = respond_to.send(self.reconcile().await);
                        }
                        ReconcilerCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("reconciler stopped");
    }

    async fn reconcile(&self) -> StorageResult<usize> {
        let stored = self.backend.load_monitors().await?;
        let running = match self.scheduler.monitors().await {
            Ok(running) => running,
            Err(e) => {
                warn!("coordinator unavailable: {e}");
                return Ok(0);
            }
        };

        let changes = plan(stored, running);
        let mut applied = 0;
        for change in changes {
            debug!("applying {change:?}");
            match apply_change(&self.scheduler, change).await {
                Ok(()) => applied += 1,
                Err(e) => warn!("failed to apply monitor change: {e}"),
            }
        }

        if applied > 0 {
            info!("reconciled {applied} monitor changes");
        }
        Ok(applied)
    }
}

/// Handle for controlling the ReconcilerActor
#[derive(Clone)]
pub struct ReconcilerHandle {
    sender: mpsc::Sender<ReconcilerCommand>,
}

impl ReconcilerHandle {
    pub fn spawn(backend: Arc<dyn StorageBackend>, scheduler: SchedulerHandle, period: Duration) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        let actor = ReconcilerActor::new(backend, scheduler, period, cmd_rx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Run one reconciliation pass right away
    pub async fn reconcile_now(&self) -> anyhow::Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ReconcilerCommand::ReconcileNow { respond_to: tx })
            .await?;

        Ok(rx.await??)
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.sender.send(ReconcilerCommand::Shutdown).await?;
        Ok(())
    }
}
