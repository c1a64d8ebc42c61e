//! Selkie: in-process background task scheduler.
//!
//! Tasks register under unique string names with one of four policies —
//! timed (one run at an absolute time), periodic, daily, or on-demand — and
//! a single dispatch loop runs them at their slots on the tokio runtime.
//!
//! # Architecture
//!
//! The scheduler keeps every task in exactly one of three collections:
//! - **scheduled**: waiting for its next slot; the loop sleeps until the
//!   earliest one (or until a registration wakes it early)
//! - **running**: a worker task is executing a run; runs of one name never
//!   overlap, repeated demands coalesce into a single follow-up run
//! - **on-demand**: parked until [`Scheduler::demand_task`] asks for it
//!
//! A run ends when its [`Job::run`] returns: `Ok` is the completion signal,
//! `Err` the failure signal (also invoking the scheduler-wide failure hook),
//! and a panic is contained and reported as a failure. Periodic tasks are
//! then rescheduled one period after their slot — or one period after the
//! completion if the run overran, so a slow run never causes a burst of
//! catch-up runs. Cancellation is cooperative throughout: stopping a task or
//! the scheduler only signals the run's context token.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use chrono::Utc;
//! use selkie::{Scheduler, job_fn};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> anyhow::Result<()> {
//! let scheduler = Scheduler::new();
//! scheduler.start()?;
//!
//! scheduler.add_periodic_task(
//!     "heartbeat",
//!     Utc::now(),
//!     Duration::from_secs(30),
//!     job_fn(|ctx| async move {
//!         tracing::info!("task '{}' beat", ctx.name());
//!         Ok(())
//!     }),
//! );
//!
//! scheduler.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
mod handle;
pub mod job;
pub mod report;
pub mod scheduler;

pub use error::{Result, SchedulerError};
pub use job::{Job, JobContext, job_fn};
pub use report::{RunOutcome, RunRecord, SchedulerSnapshot, TaskInfo, TaskState};
pub use scheduler::{FailureHook, Scheduler, SchedulerBuilder};
