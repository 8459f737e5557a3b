//! Storage backend trait definition
//!
//! This module defines the `StorageBackend` trait that all persistence
//! implementations provide to the monitoring core.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use crate::model::{Monitor, ProbeOutcome, StatusRecord};

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Durable store for monitor definitions, status records and check history
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` as they are shared between the
/// scheduler and every pool worker.
///
/// ## Error Handling
///
/// Every failure is a `StorageError`. Callers treat them as transient: the
/// worker retries with backoff and then skips the cycle.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Monitors that should be scheduled on startup or recovery
    async fn load_active_monitors(&self) -> StorageResult<Vec<Monitor>>;

    /// All monitors, paused ones included
    async fn load_monitors(&self) -> StorageResult<Vec<Monitor>>;

    async fn load_monitor(&self, monitor_id: &str) -> StorageResult<Option<Monitor>>;

    /// Insert or replace a monitor definition
    ///
    /// Status and scheduling metadata already stored for the monitor are kept.
    async fn upsert_monitor(&self, monitor: &Monitor) -> StorageResult<()>;

    /// Remove a monitor together with its status record and history
    async fn delete_monitor(&self, monitor_id: &str) -> StorageResult<()>;

    async fn get_status(&self, monitor_id: &str) -> StorageResult<Option<StatusRecord>>;

    async fn save_status(&self, record: &StatusRecord) -> StorageResult<()>;

    async fn append_history(&self, outcome: &ProbeOutcome) -> StorageResult<()>;

    /// Save the status record and append the outcome atomically
    ///
    /// Either both writes become visible or neither does.
    async fn commit_check(&self, record: &StatusRecord, outcome: &ProbeOutcome) -> StorageResult<()>;

    /// The N most recent outcomes for a monitor, oldest first
    async fn latest_checks(&self, monitor_id: &str, limit: usize) -> StorageResult<Vec<ProbeOutcome>>;

    async fn update_scheduling_meta(
        &self,
        monitor_id: &str,
        last_checked: DateTime<Utc>,
        next_due: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Lightweight liveness check of the backend
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}
