//! The task contract: the unit of work the scheduler runs.
//!
//! Jobs are opaque to the scheduler — it never looks at what a run computes,
//! only at whether [`Job::run`] returned `Ok` or `Err`. Returning from `run`
//! is the completion signal for that run; there is no separate callback to
//! invoke, and the worker wrapper guarantees the scheduler hears about each
//! run exactly once (a panic inside `run` is reported as a failure).

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

/// A unit of work that can be registered with the scheduler.
///
/// One instance serves every run of its task, so implementations hold their
/// own state behind `&self`. Long-running jobs should watch
/// [`JobContext::cancelled`] and return early when a stop is requested —
/// cancellation is cooperative, the scheduler never aborts a run.
#[async_trait]
pub trait Job: Send + Sync {
    /// Execute one run of the task.
    async fn run(&self, ctx: JobContext) -> anyhow::Result<()>;
}

/// Per-run context handed to [`Job::run`].
#[derive(Debug, Clone)]
pub struct JobContext {
    name: Arc<str>,
    scheduled_for: DateTime<Utc>,
    cancel: CancellationToken,
}

impl JobContext {
    pub(crate) fn new(
        name: Arc<str>,
        scheduled_for: DateTime<Utc>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            name,
            scheduled_for,
            cancel,
        }
    }

    /// Name the task was registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The slot this run was dispatched for (the run may start later than
    /// this if the loop woke late, or earlier for `run_task_now`).
    pub fn scheduled_for(&self) -> DateTime<Utc> {
        self.scheduled_for
    }

    /// Whether a stop was requested for this run.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when a stop is requested for this run. Intended for
    /// `tokio::select!` inside long-running jobs.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}

/// Adapt an async closure into a [`Job`].
///
/// ```rust,ignore
/// let job = job_fn(|ctx| async move {
///     tracing::info!(task = ctx.name(), "sweeping cache");
///     Ok(())
/// });
/// scheduler.add_periodic_task("cache-sweep", first_run, every, job);
/// ```
pub fn job_fn<F, Fut>(f: F) -> Arc<dyn Job>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnJob(f))
}

struct FnJob<F>(F);

#[async_trait]
impl<F, Fut> Job for FnJob<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn run(&self, ctx: JobContext) -> anyhow::Result<()> {
        (self.0)(ctx).await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn test_ctx(cancel: CancellationToken) -> JobContext {
        JobContext::new(Arc::from("test-task"), Utc::now(), cancel)
    }

    #[tokio::test]
    async fn job_fn_runs_closure() {
        let job = job_fn(|ctx| async move {
            assert_eq!(ctx.name(), "test-task");
            Ok(())
        });
        let result = job.run(test_ctx(CancellationToken::new())).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn job_fn_propagates_errors() {
        let job = job_fn(|_ctx| async move { anyhow::bail!("disk on fire") });
        let err = job
            .run(test_ctx(CancellationToken::new()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("disk on fire"));
    }

    #[tokio::test]
    async fn context_observes_cancellation() {
        let token = CancellationToken::new();
        let ctx = test_ctx(token.clone());
        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
        // Resolves immediately once the token is cancelled.
        ctx.cancelled().await;
    }
}
