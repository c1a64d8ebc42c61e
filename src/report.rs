//! Run records and scheduler snapshots for observability.
//!
//! These are the read-only views the scheduler exposes: one [`RunRecord`]
//! per finished run (kept in a bounded history and optionally streamed over
//! the builder's event channel) and a [`SchedulerSnapshot`] of the current
//! registry. All types serialize, so embedders can ship them to a UI or a
//! diagnostics endpoint as-is.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a single run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// The job returned `Ok`.
    Completed,
    /// The job returned `Err` or panicked.
    Failed,
    /// The task was suspended when its slot came due; the job was not
    /// invoked, but the slot was consumed so the cadence is preserved.
    Skipped,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// One finished run of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    /// Name the task was registered under.
    pub task: String,
    /// The slot the run was dispatched for.
    pub scheduled_for: DateTime<Utc>,
    /// When the worker picked the run up.
    pub started_at: DateTime<Utc>,
    /// When the job returned (== `started_at` for skipped runs).
    pub finished_at: DateTime<Utc>,
    /// How the run ended.
    pub outcome: RunOutcome,
    /// Error message for failed runs.
    pub error: Option<String>,
}

/// Which collection currently holds a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for its next slot.
    Scheduled,
    /// A run is in flight.
    Running,
    /// Parked until demanded.
    OnDemand,
}

/// Point-in-time view of one registered task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    /// Name the task was registered under.
    pub name: String,
    /// Which collection holds the task.
    pub state: TaskState,
    /// Next slot, if one is scheduled (`None` for parked on-demand tasks).
    pub next_run: Option<DateTime<Utc>>,
    /// Repeat period (`None` for one-shot and on-demand tasks).
    pub period: Option<Duration>,
    /// Whether dispatch is currently suspended for this task.
    pub suspended: bool,
    /// Whether the task was registered on-demand.
    pub on_demand: bool,
    /// When the task was (last re-)registered.
    pub registered_at: DateTime<Utc>,
    /// When a run of this task last finished, if ever.
    pub last_completed: Option<DateTime<Utc>>,
}

/// Public snapshot used by diagnostics and embedder UIs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    /// All registered tasks, sorted by name.
    pub tasks: Vec<TaskInfo>,
    /// Recent run history, oldest first.
    pub history: Vec<RunRecord>,
}
