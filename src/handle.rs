//! Per-task bookkeeping: registration state, run identity, and the
//! reschedule arithmetic.
//!
//! A [`TaskHandle`] lives in exactly one of the scheduler's collections
//! (scheduled, running, on-demand) at any moment. Workers never hold a
//! handle — they execute from a [`RunSlot`] snapshot and rendezvous back by
//! name and run id, so a handle that was unregistered or replaced mid-run
//! simply makes the eventual completion stale.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::job::Job;
use crate::report::{TaskInfo, TaskState};

/// One registered task and its scheduling state.
pub(crate) struct TaskHandle {
    pub(crate) name: String,
    pub(crate) job: Arc<dyn Job>,
    /// Next slot this task is due at. Stale while parked on-demand.
    pub(crate) next_run: DateTime<Utc>,
    /// Repeat period; `ZERO` means one-shot.
    pub(crate) period: Duration,
    pub(crate) registered_at: DateTime<Utc>,
    pub(crate) is_running: bool,
    pub(crate) suspended: bool,
    /// Cleared by unregistration; without it a finished periodic run is
    /// dropped instead of rescheduled.
    pub(crate) re_register: bool,
    /// A demand arrived while a run was in flight; honored once when an
    /// on-demand run finishes.
    pub(crate) rerun_requested: bool,
    pub(crate) on_demand: bool,
    pub(crate) last_completed: Option<DateTime<Utc>>,
    /// Identity of the run currently in flight. A completion carrying any
    /// other id is stale and ignored.
    pub(crate) run_id: Option<Uuid>,
    /// Cancellation token of the run currently in flight (child of the
    /// scheduler's shutdown token).
    pub(crate) cancel: Option<CancellationToken>,
}

/// Everything a worker needs to execute one run. Snapshotted from the
/// handle under the registry lock, used entirely outside it.
pub(crate) struct RunSlot {
    pub(crate) name: Arc<str>,
    pub(crate) run_id: Uuid,
    pub(crate) job: Arc<dyn Job>,
    pub(crate) cancel: CancellationToken,
    /// Suspension observed at dispatch; a suspended slot skips the job but
    /// still reports completion so the cadence advances.
    pub(crate) suspended: bool,
    pub(crate) scheduled_for: DateTime<Utc>,
    pub(crate) started_at: DateTime<Utc>,
}

impl TaskHandle {
    /// New handle for a timed, periodic, or daily task.
    pub(crate) fn scheduled(
        name: String,
        job: Arc<dyn Job>,
        first_run: DateTime<Utc>,
        period: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            name,
            job,
            next_run: first_run,
            period,
            registered_at: now,
            is_running: false,
            suspended: false,
            re_register: true,
            rerun_requested: false,
            on_demand: false,
            last_completed: None,
            run_id: None,
            cancel: None,
        }
    }

    /// New handle parked in the on-demand collection. `next_run` is stamped
    /// with the registration time purely so it is never in the future — a
    /// finished on-demand run must park again, not enter the schedule.
    pub(crate) fn parked(name: String, job: Arc<dyn Job>, now: DateTime<Utc>) -> Self {
        Self {
            name,
            job,
            next_run: now,
            period: Duration::ZERO,
            registered_at: now,
            is_running: false,
            suspended: false,
            re_register: false,
            rerun_requested: false,
            on_demand: true,
            last_completed: None,
            run_id: None,
            cancel: None,
        }
    }

    /// Re-registration under the same name: overwrite the scheduling
    /// parameters in place. Keeps `last_completed`, `suspended`, and the
    /// identity of any run currently in flight, so a running task that is
    /// re-registered finishes its current run first and is then placed
    /// according to the new parameters.
    pub(crate) fn reset(
        &mut self,
        job: Arc<dyn Job>,
        first_run: DateTime<Utc>,
        period: Duration,
        on_demand: bool,
        now: DateTime<Utc>,
    ) {
        self.job = job;
        self.next_run = first_run;
        self.period = period;
        self.on_demand = on_demand;
        self.re_register = !on_demand;
        self.registered_at = now;
    }

    /// Mark for removal: a completion arriving afterwards must not re-add
    /// the handle anywhere.
    pub(crate) fn mark_unregistered(&mut self) {
        self.re_register = false;
        self.rerun_requested = false;
    }

    /// Start a run for the slot at `scheduled_for`: stamp a fresh run id,
    /// derive the run's cancellation token, and snapshot what the worker
    /// needs. Clears any pending re-run request (the run now starting
    /// satisfies it).
    pub(crate) fn begin_run(
        &mut self,
        shutdown: &CancellationToken,
        scheduled_for: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> RunSlot {
        let run_id = Uuid::new_v4();
        let cancel = shutdown.child_token();
        self.is_running = true;
        self.rerun_requested = false;
        self.run_id = Some(run_id);
        self.cancel = Some(cancel.clone());
        RunSlot {
            name: Arc::from(self.name.as_str()),
            run_id,
            job: Arc::clone(&self.job),
            cancel,
            suspended: self.suspended,
            scheduled_for,
            started_at: now,
        }
    }

    /// Close out the run that just finished.
    pub(crate) fn finish_run(&mut self, now: DateTime<Utc>) {
        self.is_running = false;
        self.run_id = None;
        self.cancel = None;
        self.last_completed = Some(now);
    }

    /// Ask the run currently in flight to stop. Cooperative: the job decides
    /// when to return.
    pub(crate) fn request_stop(&self) {
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
    }

    /// Queue one follow-up run for when the current run finishes. Repeated
    /// requests while the same run is in flight coalesce into a single
    /// follow-up.
    pub(crate) fn request_rerun(&mut self) {
        self.rerun_requested = true;
    }

    /// Advance `next_run` past a run that finished at `now`.
    ///
    /// Returns `false` when the handle must not be rescheduled (one-shot, or
    /// unregistered mid-run). Otherwise the next slot is one period after
    /// the previous one — unless that moment has already passed because the
    /// run overran its slot, in which case the schedule is re-anchored one
    /// period after the completion instead of burst-firing every missed
    /// slot. A candidate exactly equal to `now` is kept, so a run that took
    /// exactly one period is followed by one immediately-due slot.
    pub(crate) fn advance_after(&mut self, now: DateTime<Utc>) -> bool {
        if !self.re_register || self.period.is_zero() {
            return false;
        }
        let period = to_delta(self.period);
        let candidate = add_saturating(self.next_run, period);
        self.next_run = if candidate < now {
            add_saturating(now, period)
        } else {
            candidate
        };
        true
    }

    /// Public snapshot of this handle.
    pub(crate) fn info(&self, state: TaskState) -> TaskInfo {
        TaskInfo {
            name: self.name.clone(),
            state,
            next_run: (!self.on_demand).then_some(self.next_run),
            period: (!self.period.is_zero()).then_some(self.period),
            suspended: self.suspended,
            on_demand: self.on_demand,
            registered_at: self.registered_at,
            last_completed: self.last_completed,
        }
    }
}

fn to_delta(period: Duration) -> TimeDelta {
    TimeDelta::from_std(period).unwrap_or(TimeDelta::MAX)
}

fn add_saturating(at: DateTime<Utc>, delta: TimeDelta) -> DateTime<Utc> {
    at.checked_add_signed(delta)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
