//! Operational surface of the monitoring engine
//!
//! `Engine` wires the collaborators together and is what an API layer
//! talks to. Every collaborator is injected; nothing is global.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::actors::{
    MonitorChange, ReconcilerHandle, ScheduleError, ScheduleState, SchedulerHandle, SchedulerStats, Worker,
    apply_change,
};
use crate::config::EngineConfig;
use crate::model::{Monitor, ProbeOutcome, StatusRecord};
use crate::notify::{
    ChannelConfig, EmailTransport, NotificationDispatcher, NotifyError, PushTransport, ReqwestPushTransport,
};
use crate::probe::{Probe, ProbeExecutor};
use crate::retry::with_backoff;
use crate::status::{StatusPolicy, StatusTracker};
use crate::storage::{StorageBackend, StorageError};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Assembles an [`Engine`]; probes and transports default to the network ones
pub struct EngineBuilder {
    config: EngineConfig,
    backend: Arc<dyn StorageBackend>,
    probe: Option<Arc<dyn Probe>>,
    email: Option<Arc<dyn EmailTransport>>,
    push: Option<Arc<dyn PushTransport>>,
}

impl EngineBuilder {
    pub fn probe(mut self, probe: Arc<dyn Probe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn email_transport(mut self, email: Arc<dyn EmailTransport>) -> Self {
        self.email = Some(email);
        self
    }

    pub fn push_transport(mut self, push: Arc<dyn PushTransport>) -> Self {
        self.push = Some(push);
        self
    }

    /// Spawn the actors and give every stored monitor a slot
    ///
    /// Inactive monitors start paused, so they can still be resumed or edited.
    ///
    /// Fails when the probe client cannot be built or storage cannot be read.
    #[instrument(skip_all, fields(workers = self.config.workers))]
    pub async fn start(self) -> anyhow::Result<Engine> {
        let Self {
            config,
            backend,
            probe,
            email,
            push,
        } = self;

        let probe: Arc<dyn Probe> = match probe {
            Some(probe) => probe,
            None => Arc::new(ProbeExecutor::new(&config)?),
        };
        let push = push.unwrap_or_else(|| Arc::new(ReqwestPushTransport::new()) as Arc<dyn PushTransport>);

        let tracker = Arc::new(StatusTracker::new(backend.clone(), StatusPolicy::from(&config)));
        let dispatcher = Arc::new(NotificationDispatcher::new(email, push, config.notification_timeout()));
        let worker = Arc::new(Worker::new(
            probe,
            tracker.clone(),
            dispatcher.clone(),
            backend.clone(),
            config.probe_timeout(),
            config.persistence_retry.clone(),
        ));
        let scheduler = SchedulerHandle::spawn(worker, config.workers, config.min_interval());

        let monitors = backend.load_monitors().await?;
        let total = monitors.len();
        let (mut scheduled, mut paused) = (0, 0);
        for monitor in monitors {
            let monitor_id = monitor.id.clone();
            let active = monitor.active;
            match scheduler.create(monitor).await {
                Ok(()) if active => scheduled += 1,
                Ok(()) => paused += 1,
                Err(e) => warn!("not scheduling stored monitor {monitor_id}: {e}"),
            }
        }
        info!("loaded {total} stored monitors: {scheduled} scheduled, {paused} paused");

        let reconciler = config
            .reconcile_interval_secs
            .map(|secs| ReconcilerHandle::spawn(backend.clone(), scheduler.clone(), Duration::from_secs(secs)));

        Ok(Engine {
            config,
            backend,
            tracker,
            dispatcher,
            scheduler,
            reconciler,
        })
    }
}

pub struct Engine {
    config: EngineConfig,
    backend: Arc<dyn StorageBackend>,
    tracker: Arc<StatusTracker>,
    dispatcher: Arc<NotificationDispatcher>,
    scheduler: SchedulerHandle,
    reconciler: Option<ReconcilerHandle>,
}

impl Engine {
    pub fn builder(config: EngineConfig, backend: Arc<dyn StorageBackend>) -> EngineBuilder {
        EngineBuilder {
            config,
            backend,
            probe: None,
            email: None,
            push: None,
        }
    }

    async fn persist(&self, monitor: &Monitor) -> Result<(), StorageError> {
        with_backoff(&self.config.persistence_retry, "storing monitor", || {
            self.backend.upsert_monitor(monitor)
        })
        .await
    }

    /// Apply `edit` to the stored definition, if there is one
    async fn edit_stored(&self, monitor_id: &str, edit: impl FnOnce(&mut Monitor)) -> Result<(), StorageError> {
        let Some(mut monitor) = self.backend.load_monitor(monitor_id).await? else {
            debug!("monitor {monitor_id} is not stored");
            return Ok(());
        };
        edit(&mut monitor);
        self.persist(&monitor).await
    }

    /// Validate, store and start scheduling a new monitor
    #[instrument(skip_all, fields(monitor = %monitor.id))]
    pub async fn create_schedule(&self, monitor: Monitor) -> Result<(), EngineError> {
        monitor.validate(self.config.min_interval()).map_err(ScheduleError::from)?;

        self.scheduler.create(monitor.clone()).await?;
        if let Err(e) = self.persist(&monitor).await {
            warn!("could not store new monitor, unscheduling it: {e}");
            self.scheduler.remove(&monitor.id).await?;
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn pause(&self, monitor_id: &str) -> Result<(), EngineError> {
        self.scheduler.pause(monitor_id).await?;
        self.edit_stored(monitor_id, |monitor| monitor.active = false).await?;
        Ok(())
    }

    pub async fn resume(&self, monitor_id: &str) -> Result<(), EngineError> {
        self.scheduler.resume(monitor_id).await?;
        self.edit_stored(monitor_id, |monitor| monitor.active = true).await?;
        Ok(())
    }

    /// Stop scheduling a monitor and delete it with its status and history
    ///
    /// Returns once a probe that was in flight has finished; its outcome is
    /// never written.
    #[instrument(skip(self))]
    pub async fn remove(&self, monitor_id: &str) -> Result<(), EngineError> {
        self.scheduler.remove(monitor_id).await?;
        self.tracker.forget(monitor_id).await;
        self.backend.delete_monitor(monitor_id).await?;
        Ok(())
    }

    pub async fn update_interval(&self, monitor_id: &str, interval: Duration) -> Result<(), EngineError> {
        self.scheduler.update_interval(monitor_id, interval).await?;
        self.edit_stored(monitor_id, |monitor| monitor.interval = interval).await?;
        Ok(())
    }

    /// Send a synthetic notification through `channel`
    pub async fn test_channel(&self, channel: &ChannelConfig) -> Result<(), NotifyError> {
        channel
            .validate_credentials()
            .map_err(NotifyError::InvalidConfiguration)?;
        self.dispatcher.test_channel(channel).await
    }

    /// Converge the coordinator after a change made directly in storage
    pub async fn apply_change(&self, change: MonitorChange) -> Result<(), EngineError> {
        let removed = match &change {
            MonitorChange::Remove(monitor_id) => Some(monitor_id.clone()),
            _ => None,
        };

        apply_change(&self.scheduler, change).await?;
        if let Some(monitor_id) = removed {
            self.tracker.forget(&monitor_id).await;
        }
        Ok(())
    }

    /// Run one poll-mode reconciliation pass, if polling is enabled
    pub async fn reconcile_now(&self) -> anyhow::Result<usize> {
        match &self.reconciler {
            Some(reconciler) => reconciler.reconcile_now().await,
            None => Ok(0),
        }
    }

    /// Current status, last failure classification and last check time
    pub async fn status(&self, monitor_id: &str) -> Option<StatusRecord> {
        self.tracker.current(monitor_id).await
    }

    pub async fn schedule_state(&self, monitor_id: &str) -> Result<Option<ScheduleState>, EngineError> {
        Ok(self.scheduler.state(monitor_id).await?)
    }

    pub async fn recent_checks(&self, monitor_id: &str, limit: usize) -> Result<Vec<ProbeOutcome>, EngineError> {
        Ok(self.backend.latest_checks(monitor_id, limit).await?)
    }

    pub async fn stats(&self) -> Result<SchedulerStats, EngineError> {
        Ok(self.scheduler.stats().await?)
    }

    /// Stop firing, drain in-flight probes, then release storage
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        if let Some(reconciler) = &self.reconciler
            && let Err(e) = reconciler.shutdown().await
        {
            debug!("reconciler already stopped: {e}");
        }

        match self.scheduler.shutdown().await {
            Ok(()) | Err(ScheduleError::Unavailable) => {}
            Err(e) => return Err(e.into()),
        }
        self.backend.close().await?;

        info!("engine stopped");
        Ok(())
    }
}
