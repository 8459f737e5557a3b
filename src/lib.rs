//! Uptime monitoring engine
//!
//! Checks HTTP(S) endpoints and ping-reachable hosts on a per-monitor
//! interval, turns outcomes into up/down transitions and notifies the
//! channels configured on each monitor.
//!
//! ```text
//! ScheduleCoordinator ─▶ Probe ─▶ StatusTracker ─▶ NotificationDispatcher ─▶ channels
//!          └──────────────┬──────────────┘
//!                  StorageBackend
//! ```

pub mod actors;
pub mod config;
pub mod engine;
pub mod model;
pub mod notify;
pub mod probe;
pub mod retry;
pub mod status;
pub mod storage;
pub mod util;

pub use engine::{Engine, EngineBuilder, EngineError};
pub use model::{FailureReason, Monitor, MonitorId, MonitorStatus, ProbeKind, ProbeOutcome, StatusRecord, TransitionEvent};
