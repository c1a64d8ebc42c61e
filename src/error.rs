//! Error types for the scheduler.

use std::time::Duration;

/// Top-level error type for scheduler lifecycle and registration.
///
/// Lookup failures ("no task with that name") are not errors — the control
/// methods on [`crate::Scheduler`] report them as `bool` / `Option` returns.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// `start` was called while the dispatch loop is already running.
    #[error("scheduler is already running")]
    AlreadyRunning,

    /// `start` was called after `stop`; a stopped scheduler cannot be restarted.
    #[error("scheduler was stopped and cannot be restarted")]
    AlreadyStopped,

    /// A daily registration named an hour or minute outside the clock.
    #[error("invalid daily time {hour:02}:{minute:02} (expected 00:00..=23:59)")]
    InvalidDailyTime { hour: u32, minute: u32 },

    /// The dispatch loop did not exit within the shutdown grace period.
    #[error("scheduler did not stop within {0:?}")]
    ShutdownTimeout(Duration),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SchedulerError>;
