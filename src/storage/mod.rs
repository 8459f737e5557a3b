//! Persistence gateway for monitors, status records and check history
//!
//! The monitoring core never owns durable state. It reaches the store through
//! the `StorageBackend` trait, which is injected into the status tracker and
//! the scheduler at construction time.
//!
//! ## Backends
//!
//! - **SQLite** (default): Embedded database, one file, WAL mode
//! - **In-Memory**: No persistence, for tests or ephemeral deployments
//!
//! ## Usage
//!
//! ```no_run
//! use uptime_engine::storage::{StorageBackend, sqlite::SqliteBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = SqliteBackend::new("./uptime.db").await?;
//!     let monitors = backend.load_active_monitors().await?;
//!     println!("{} active monitors", monitors.len());
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{HealthStatus, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;

use std::time::Duration;

use tracing::{debug, warn};

use crate::model::Monitor;

/// Store monitors listed in a config file
///
/// A monitor that is already stored keeps its `active` flag, so a pause made
/// at runtime survives a restart. Invalid entries are skipped. Returns how
/// many monitors were written.
pub async fn seed_monitors(
    backend: &dyn StorageBackend,
    monitors: &[Monitor],
    min_interval: Duration,
) -> StorageResult<usize> {
    let mut stored = 0;
    for monitor in monitors {
        if let Err(e) = monitor.validate(min_interval) {
            warn!("skipping monitor from config: {e}");
            continue;
        }

        let mut monitor = monitor.clone();
        if let Some(existing) = backend.load_monitor(&monitor.id).await? {
            debug!("monitor {} already stored, keeping active = {}", monitor.id, existing.active);
            monitor.active = existing.active;
        }
        backend.upsert_monitor(&monitor).await?;
        stored += 1;
    }
    Ok(stored)
}
