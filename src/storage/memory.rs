//! In-memory storage backend (no persistence)
//!
//! Everything lives behind a single `RwLock`, so `commit_check` is atomic
//! with respect to every other operation.
//!
//! ## Limitations
//!
//! - **No persistence**: All data lost on restart
//! - **Limited history**: Ring buffer per monitor, oldest checks evicted

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use crate::model::{Monitor, ProbeOutcome, StatusRecord};

/// Maximum checks to keep in memory per monitor
const MAX_CHECKS_PER_MONITOR: usize = 1000;

#[derive(Default)]
struct Inner {
    monitors: HashMap<String, Monitor>,
    statuses: HashMap<String, StatusRecord>,
    history: HashMap<String, VecDeque<ProbeOutcome>>,
    next_due: HashMap<String, DateTime<Utc>>,
}

impl Inner {
    fn push_history(&mut self, outcome: &ProbeOutcome) {
        let checks = self.history.entry(outcome.monitor_id.clone()).or_default();
        checks.push_back(outcome.clone());
        if checks.len() > MAX_CHECKS_PER_MONITOR {
            checks.pop_front();
        }
    }

    fn put_status(&mut self, record: &StatusRecord) {
        if let Some(monitor) = self.monitors.get_mut(&record.monitor_id) {
            monitor.status = record.status;
        }
        self.statuses.insert(record.monitor_id.clone(), record.clone());
    }
}

/// In-memory storage backend
#[derive(Default)]
pub struct MemoryBackend {
    inner: RwLock<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next due time last reported by the scheduler for a monitor
    pub async fn next_due(&self, monitor_id: &str) -> Option<DateTime<Utc>> {
        self.inner.read().await.next_due.get(monitor_id).copied()
    }

    /// Total number of stored checks across all monitors
    pub async fn history_len(&self) -> usize {
        self.inner.read().await.history.values().map(VecDeque::len).sum()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn load_active_monitors(&self) -> StorageResult<Vec<Monitor>> {
        let inner = self.inner.read().await;
        Ok(inner.monitors.values().filter(|m| m.active).cloned().collect())
    }

    async fn load_monitors(&self) -> StorageResult<Vec<Monitor>> {
        Ok(self.inner.read().await.monitors.values().cloned().collect())
    }

    async fn load_monitor(&self, monitor_id: &str) -> StorageResult<Option<Monitor>> {
        Ok(self.inner.read().await.monitors.get(monitor_id).cloned())
    }

    async fn upsert_monitor(&self, monitor: &Monitor) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        let mut monitor = monitor.clone();
        if let Some(existing) = inner.monitors.get(&monitor.id) {
            monitor.status = existing.status;
            monitor.last_checked = existing.last_checked;
        }
        inner.monitors.insert(monitor.id.clone(), monitor);
        Ok(())
    }

    async fn delete_monitor(&self, monitor_id: &str) -> StorageResult<()> {
        debug!("deleting monitor {monitor_id} from in-memory storage");
        let mut inner = self.inner.write().await;
        inner.monitors.remove(monitor_id);
        inner.statuses.remove(monitor_id);
        inner.history.remove(monitor_id);
        inner.next_due.remove(monitor_id);
        Ok(())
    }

    async fn get_status(&self, monitor_id: &str) -> StorageResult<Option<StatusRecord>> {
        Ok(self.inner.read().await.statuses.get(monitor_id).cloned())
    }

    async fn save_status(&self, record: &StatusRecord) -> StorageResult<()> {
        self.inner.write().await.put_status(record);
        Ok(())
    }

    async fn append_history(&self, outcome: &ProbeOutcome) -> StorageResult<()> {
        self.inner.write().await.push_history(outcome);
        Ok(())
    }

    async fn commit_check(&self, record: &StatusRecord, outcome: &ProbeOutcome) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        inner.put_status(record);
        inner.push_history(outcome);
        Ok(())
    }

    async fn latest_checks(&self, monitor_id: &str, limit: usize) -> StorageResult<Vec<ProbeOutcome>> {
        let inner = self.inner.read().await;
        let mut checks: Vec<ProbeOutcome> = inner
            .history
            .get(monitor_id)
            .map(|deque| deque.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default();
        checks.reverse();
        Ok(checks)
    }

    async fn update_scheduling_meta(
        &self,
        monitor_id: &str,
        last_checked: DateTime<Utc>,
        next_due: DateTime<Utc>,
    ) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        let Some(monitor) = inner.monitors.get_mut(monitor_id) else {
            return Err(StorageError::NotFound(monitor_id.to_string()));
        };
        monitor.last_checked = Some(last_checked);
        inner.next_due.insert(monitor_id.to_string(), next_due);
        Ok(())
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let inner = self.inner.read().await;
        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("monitors".to_string(), inner.monitors.len().to_string()),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend (no-op)");
        Ok(())
    }
}
