//! Actor-based scheduling
//!
//! Each actor runs as an independent tokio task and is driven through a
//! cloneable handle.
//!
//! ## Architecture Overview
//!
//! ```text
//!   Engine / Reconciler
//!          │ SchedulerCommand (mpsc, oneshot replies)
//!          ▼
//!  ┌────────────────────┐   spawn (≤ W permits)   ┌──────────────┐
//!  │ ScheduleCoordinator│ ──────────────────────▶ │ Worker cycle │ ─▶ Probe
//!  │ (ready set, slots) │ ◀────────────────────── │              │ ─▶ StatusTracker ─▶ Storage
//!  └────────────────────┘   RunFinished           └──────────────┘ ─▶ NotificationDispatcher
//! ```
//!
//! ## Actor Types
//!
//! - **ScheduleCoordinator**: single writer of the ready set and per-monitor states
//! - **Worker**: not an actor; one spawned task per run, bounded by a semaphore
//! - **ReconcilerActor**: polls storage and converges the coordinator

pub mod messages;
pub mod reconciler;
pub mod scheduler;
pub mod worker;

pub use messages::{MonitorChange, ScheduleState, SchedulerStats};
pub use reconciler::{ReconcilerHandle, apply_change};
pub use scheduler::{ScheduleError, SchedulerHandle};
pub use worker::Worker;
