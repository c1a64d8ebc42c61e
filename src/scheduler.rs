//! The scheduler: three task collections, one dispatch loop.
//!
//! Tasks live in exactly one of three collections — `scheduled` (waiting for
//! a slot), `running` (a worker is executing a run), `on_demand` (parked
//! until asked for). The dispatch loop sleeps until the earliest scheduled
//! slot or until the wake signal fires, moves every due handle into
//! `running`, and spawns one worker per run. Workers report back through a
//! single completion funnel that reschedules, parks, or drops the handle.
//!
//! All structural state sits behind one mutex ([`Registry`]), which is never
//! held across an await. Anything that can block or call user code — worker
//! spawns, the failure hook, event-channel sends — happens after the lock is
//! released.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Result, SchedulerError};
use crate::handle::{RunSlot, TaskHandle};
use crate::job::{Job, JobContext};
use crate::report::{RunOutcome, RunRecord, SchedulerSnapshot, TaskInfo, TaskState};

/// Default number of run-history entries to keep.
const DEFAULT_HISTORY_LIMIT: usize = 200;

/// Default grace period `stop` waits for the dispatch loop to exit.
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Period used by daily registrations.
const DAILY_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Callback invoked once per failed run, after the failure is recorded.
///
/// Takes no arguments: the hook signals *that* something failed; the run
/// records say what. Jobs that need per-failure detail at the hook should
/// capture it themselves before returning an error.
pub type FailureHook = Box<dyn Fn() + Send + Sync>;

/// Builder for [`Scheduler`]. Hooks and limits are fixed before the
/// scheduler is shared, so none of them need locking later.
pub struct SchedulerBuilder {
    history_limit: usize,
    shutdown_grace: Duration,
    on_failure: Option<FailureHook>,
    events: Option<mpsc::UnboundedSender<RunRecord>>,
}

impl SchedulerBuilder {
    fn new() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            on_failure: None,
            events: None,
        }
    }

    /// Override the in-memory run-history limit (minimum 1).
    pub fn history_limit(mut self, max_entries: usize) -> Self {
        self.history_limit = max_entries.max(1);
        self
    }

    /// Override how long [`Scheduler::stop`] waits for the dispatch loop.
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Invoke `hook` once per failed run, after the failure is recorded.
    pub fn on_failure(mut self, hook: FailureHook) -> Self {
        self.on_failure = Some(hook);
        self
    }

    /// Send one [`RunRecord`] per finished run to `tx`. A closed receiver
    /// is not an error; records are simply dropped.
    pub fn events(mut self, tx: mpsc::UnboundedSender<RunRecord>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Build the scheduler. Call [`Scheduler::start`] to spawn the loop.
    pub fn build(self) -> Scheduler {
        Scheduler {
            shared: Arc::new(Shared {
                registry: Mutex::new(Registry::default()),
                wake: Notify::new(),
                shutdown: CancellationToken::new(),
                loop_state: Mutex::new(LoopState::Idle),
                history_limit: self.history_limit,
                shutdown_grace: self.shutdown_grace,
                on_failure: self.on_failure,
                events: self.events,
            }),
        }
    }
}

/// In-process background task scheduler.
///
/// Clones share one registry and one dispatch loop; cloning is cheap and is
/// the intended way to hand registration access to other parts of an
/// application. All methods that start work (`start`, `run_task_now`,
/// `demand_task`) must be called from within a tokio runtime.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

struct Shared {
    registry: Mutex<Registry>,
    /// Wakes the dispatch loop when an earlier slot appears. `notify_one`
    /// stores a permit, so a signal sent while the loop is busy is picked
    /// up by its next wait instead of being lost.
    wake: Notify,
    /// Cancelled by `stop`. Every run token is a child of this one, so
    /// shutdown also asks every in-flight run to stop.
    shutdown: CancellationToken,
    loop_state: Mutex<LoopState>,
    history_limit: usize,
    shutdown_grace: Duration,
    on_failure: Option<FailureHook>,
    events: Option<mpsc::UnboundedSender<RunRecord>>,
}

enum LoopState {
    Idle,
    Running(JoinHandle<()>),
    Stopped,
}

/// Everything the dispatch loop and the completion funnel mutate, behind
/// one lock so the disjointness of the three collections and the meaning of
/// `next_wake` hold together.
#[derive(Default)]
struct Registry {
    scheduled: HashMap<String, TaskHandle>,
    running: HashMap<String, TaskHandle>,
    on_demand: HashMap<String, TaskHandle>,
    /// Earliest slot the loop believes is pending. Never later than the
    /// true minimum over `scheduled`; transiently earlier after a removal,
    /// which the loop absorbs as a spurious wake.
    next_wake: Option<DateTime<Utc>>,
    history: Vec<RunRecord>,
}

impl Registry {
    /// Remove `name` from whichever non-running collection holds it.
    fn extract_idle(&mut self, name: &str) -> Option<TaskHandle> {
        self.scheduled
            .remove(name)
            .or_else(|| self.on_demand.remove(name))
    }

    /// Lower `next_wake` to `at` unless it is already no later. Returns
    /// `true` when the loop's current sleep just became stale and it must
    /// be woken.
    fn lower_next_wake(&mut self, at: DateTime<Utc>) -> bool {
        match self.next_wake {
            Some(current) if current <= at => false,
            _ => {
                self.next_wake = Some(at);
                true
            }
        }
    }

    fn push_history(&mut self, record: RunRecord, limit: usize) {
        self.history.push(record);
        if self.history.len() > limit {
            let excess = self.history.len() - limit;
            self.history.drain(..excess);
        }
    }

    /// Move every due handle into `running` and recompute `next_wake` from
    /// what remains. Returns the run slots to spawn (after unlock).
    fn collect_due(&mut self, shutdown: &CancellationToken, now: DateTime<Utc>) -> Vec<RunSlot> {
        let due: Vec<String> = self
            .scheduled
            .iter()
            .filter(|(_, handle)| handle.next_run <= now)
            .map(|(name, _)| name.clone())
            .collect();

        let mut slots = Vec::with_capacity(due.len());
        for name in due {
            if let Some(mut handle) = self.scheduled.remove(&name) {
                let slot = handle.begin_run(shutdown, handle.next_run, now);
                self.running.insert(name, handle);
                slots.push(slot);
            }
        }

        self.next_wake = self.scheduled.values().map(|handle| handle.next_run).min();

        slots
    }
}

impl Scheduler {
    /// Scheduler with default limits and no hooks. See [`Scheduler::builder`].
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Configure history limit, shutdown grace, failure hook, or an event
    /// channel before building.
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    /// Spawn the dispatch loop.
    ///
    /// Errors with [`SchedulerError::AlreadyRunning`] if the loop is up, and
    /// [`SchedulerError::AlreadyStopped`] after [`Scheduler::stop`] — a
    /// stopped scheduler cannot be restarted.
    pub fn start(&self) -> Result<()> {
        let mut state = lock(&self.shared.loop_state);
        match *state {
            LoopState::Running(_) => return Err(SchedulerError::AlreadyRunning),
            LoopState::Stopped => return Err(SchedulerError::AlreadyStopped),
            LoopState::Idle => {}
        }
        *state = LoopState::Running(tokio::spawn(dispatch_loop(Arc::clone(&self.shared))));
        info!("scheduler started");
        Ok(())
    }

    /// Stop the dispatch loop and ask every in-flight run to stop.
    ///
    /// Runs are only asked (cooperatively, through their context token);
    /// workers that ignore the request keep executing, detached. The loop
    /// itself is joined with a bounded grace period; on expiry
    /// [`SchedulerError::ShutdownTimeout`] is returned. Idempotent, and a
    /// no-op on a scheduler that was never started.
    pub async fn stop(&self) -> Result<()> {
        let join = {
            let mut state = lock(&self.shared.loop_state);
            match std::mem::replace(&mut *state, LoopState::Stopped) {
                LoopState::Running(join) => Some(join),
                LoopState::Idle | LoopState::Stopped => None,
            }
        };

        // Wakes the loop out of its sleep and cancels every run token.
        self.shared.shutdown.cancel();

        let Some(join) = join else {
            return Ok(());
        };
        match tokio::time::timeout(self.shared.shutdown_grace, join).await {
            Ok(Ok(())) => {
                info!("scheduler stopped");
                Ok(())
            }
            Ok(Err(e)) => {
                error!("scheduler dispatch loop panicked: {e}");
                Ok(())
            }
            Err(_) => Err(SchedulerError::ShutdownTimeout(self.shared.shutdown_grace)),
        }
    }

    /// Whether the dispatch loop is currently running.
    pub fn is_running(&self) -> bool {
        matches!(&*lock(&self.shared.loop_state), LoopState::Running(join) if !join.is_finished())
    }

    /// Run `job` once at `at`. Replaces any existing task with this name.
    pub fn add_timed_task(&self, name: impl Into<String>, at: DateTime<Utc>, job: Arc<dyn Job>) {
        let name = name.into();
        debug!("task '{name}' registered for one run at {at}");
        self.register(name, job, at, Duration::ZERO, false);
    }

    /// Run `job` at `first_run` and then every `every` until unregistered.
    /// Replaces any existing task with this name. An `every` of zero
    /// degrades to a one-shot.
    pub fn add_periodic_task(
        &self,
        name: impl Into<String>,
        first_run: DateTime<Utc>,
        every: Duration,
        job: Arc<dyn Job>,
    ) {
        let name = name.into();
        debug!("task '{name}' registered every {every:?} from {first_run}");
        self.register(name, job, first_run, every, false);
    }

    /// Run `job` every day at `hour:minute` UTC — today if that time is
    /// still ahead, otherwise starting tomorrow. Replaces any existing task
    /// with this name.
    pub fn add_daily_task(
        &self,
        name: impl Into<String>,
        hour: u32,
        minute: u32,
        job: Arc<dyn Job>,
    ) -> Result<()> {
        if hour > 23 || minute > 59 {
            return Err(SchedulerError::InvalidDailyTime { hour, minute });
        }
        let name = name.into();
        let first_run = next_daily_occurrence(Utc::now(), hour, minute);
        debug!("task '{name}' registered daily at {hour:02}:{minute:02} UTC, next {first_run}");
        self.register(name, job, first_run, DAILY_PERIOD, false);
        Ok(())
    }

    /// Park `job` until [`Scheduler::demand_task`] or
    /// [`Scheduler::run_task_now`] asks for it. Replaces any existing task
    /// with this name.
    pub fn add_on_demand_task(&self, name: impl Into<String>, job: Arc<dyn Job>) {
        let name = name.into();
        debug!("task '{name}' registered on-demand");
        self.register(name, job, Utc::now(), Duration::ZERO, true);
    }

    fn register(
        &self,
        name: String,
        job: Arc<dyn Job>,
        first_run: DateTime<Utc>,
        period: Duration,
        on_demand: bool,
    ) {
        let now = Utc::now();
        let mut wake = false;
        {
            let mut registry = self.shared.lock_registry();
            if registry.running.contains_key(&name) {
                // Mid-run: take the new parameters in place and let the
                // completion funnel place the handle. A future slot is
                // honored by the early-reschedule branch of `finish_run`.
                debug!("task '{name}' re-registered while running");
                if let Some(handle) = registry.running.get_mut(&name) {
                    handle.reset(job, first_run, period, on_demand, now);
                }
            } else {
                let handle = match registry.extract_idle(&name) {
                    Some(mut existing) => {
                        debug!("task '{name}' registration replaced");
                        existing.reset(job, first_run, period, on_demand, now);
                        existing
                    }
                    None if on_demand => TaskHandle::parked(name.clone(), job, now),
                    None => TaskHandle::scheduled(name.clone(), job, first_run, period, now),
                };
                if on_demand {
                    registry.on_demand.insert(name, handle);
                } else {
                    wake = registry.lower_next_wake(first_run);
                    registry.scheduled.insert(name, handle);
                }
            }
        }
        if wake {
            self.shared.wake.notify_one();
        }
    }

    /// Start `name`'s job immediately, regardless of its schedule.
    ///
    /// A task that is already running reports `true` without starting a
    /// second run — runs of one name never overlap. The schedule itself is
    /// untouched: a periodic task keeps its cadence and a pending one-shot
    /// still fires at its registered time. Returns `false` when no task has
    /// this name.
    pub fn run_task_now(&self, name: &str) -> bool {
        let now = Utc::now();
        let slot = {
            let mut registry = self.shared.lock_registry();
            if registry.running.contains_key(name) {
                debug!("task '{name}' already running; manual run satisfied");
                return true;
            }
            let Some(mut handle) = registry.extract_idle(name) else {
                return false;
            };
            let slot = handle.begin_run(&self.shared.shutdown, now, now);
            registry.running.insert(handle.name.clone(), handle);
            slot
        };
        info!("task '{name}' started manually");
        spawn_worker(Arc::clone(&self.shared), slot);
        true
    }

    /// Run an on-demand task.
    ///
    /// If the name is currently running (under any policy), one follow-up
    /// run is queued instead; repeated demands during the same run coalesce
    /// into that single follow-up. If it is parked on-demand, it starts
    /// immediately. Returns `false` when the name is in neither state.
    pub fn demand_task(&self, name: &str) -> bool {
        let now = Utc::now();
        let slot = {
            let mut registry = self.shared.lock_registry();
            if let Some(handle) = registry.running.get_mut(name) {
                debug!("task '{name}' demanded while running; queueing one re-run");
                handle.request_rerun();
                return true;
            }
            let Some(mut handle) = registry.on_demand.remove(name) else {
                return false;
            };
            let slot = handle.begin_run(&self.shared.shutdown, now, now);
            registry.running.insert(handle.name.clone(), handle);
            slot
        };
        info!("task '{name}' started on demand");
        spawn_worker(Arc::clone(&self.shared), slot);
        true
    }

    /// Ask the current run of `name` to stop.
    ///
    /// Cooperative: the job observes its context token and decides when to
    /// return; the `running` slot is released when it does. A name that is
    /// not running at all is already in the requested state, so this also
    /// returns `true` for unknown names. Stopping does not unregister — a
    /// periodic task is still rescheduled when the cancelled run returns.
    pub fn stop_task(&self, name: &str) -> bool {
        let registry = self.shared.lock_registry();
        if let Some(handle) = registry.running.get(name) {
            info!("task '{name}' asked to stop");
            handle.request_stop();
        }
        true
    }

    /// Suspend dispatch for `name`.
    ///
    /// A suspended task keeps consuming its slots as skipped runs, so the
    /// original cadence is intact when it is enabled again. Returns `false`
    /// when the name is neither scheduled nor running.
    pub fn disable_task(&self, name: &str) -> bool {
        self.set_task_suspended(name, true)
    }

    /// Resume dispatch for `name`. Returns `false` when the name is neither
    /// scheduled nor running.
    pub fn enable_task(&self, name: &str) -> bool {
        self.set_task_suspended(name, false)
    }

    fn set_task_suspended(&self, name: &str, suspended: bool) -> bool {
        let mut registry = self.shared.lock_registry();
        let handle = if registry.scheduled.contains_key(name) {
            registry.scheduled.get_mut(name)
        } else {
            registry.running.get_mut(name)
        };
        let Some(handle) = handle else {
            return false;
        };
        handle.suspended = suspended;
        if suspended {
            info!("task '{name}' disabled");
        } else {
            info!("task '{name}' enabled");
        }
        true
    }

    /// Remove `name` entirely.
    ///
    /// A run already in flight is not interrupted, but its completion is
    /// discarded — the task will not be rescheduled. Returns the task's
    /// final snapshot, or `None` if nothing was registered under the name.
    pub fn unregister_task(&self, name: &str) -> Option<TaskInfo> {
        let mut registry = self.shared.lock_registry();
        let (mut handle, state) = registry
            .scheduled
            .remove(name)
            .map(|h| (h, TaskState::Scheduled))
            .or_else(|| {
                registry
                    .running
                    .remove(name)
                    .map(|h| (h, TaskState::Running))
            })
            .or_else(|| {
                registry
                    .on_demand
                    .remove(name)
                    .map(|h| (h, TaskState::OnDemand))
            })?;
        handle.mark_unregistered();
        info!("task '{name}' unregistered");
        Some(handle.info(state))
    }

    /// Point-in-time view of every registered task plus recent run history.
    pub fn snapshot(&self) -> SchedulerSnapshot {
        let registry = self.shared.lock_registry();
        let mut tasks: Vec<TaskInfo> = registry
            .scheduled
            .values()
            .map(|h| h.info(TaskState::Scheduled))
            .chain(registry.running.values().map(|h| h.info(TaskState::Running)))
            .chain(
                registry
                    .on_demand
                    .values()
                    .map(|h| h.info(TaskState::OnDemand)),
            )
            .collect();
        tasks.sort_by(|a, b| a.name.cmp(&b.name));
        SchedulerSnapshot {
            tasks,
            history: registry.history.clone(),
        }
    }

    /// Snapshot of one task, or `None` if the name is not registered.
    pub fn task_info(&self, name: &str) -> Option<TaskInfo> {
        let registry = self.shared.lock_registry();
        registry
            .scheduled
            .get(name)
            .map(|h| h.info(TaskState::Scheduled))
            .or_else(|| registry.running.get(name).map(|h| h.info(TaskState::Running)))
            .or_else(|| {
                registry
                    .on_demand
                    .get(name)
                    .map(|h| h.info(TaskState::OnDemand))
            })
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Shared {
    fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Next occurrence of `hour:minute` UTC strictly after `now`: today if that
/// time is still ahead, otherwise tomorrow. `hour`/`minute` are validated
/// by the caller.
fn next_daily_occurrence(now: DateTime<Utc>, hour: u32, minute: u32) -> DateTime<Utc> {
    match now.date_naive().and_hms_opt(hour, minute, 0) {
        Some(slot) => {
            let slot = slot.and_utc();
            if slot > now {
                slot
            } else {
                slot + TimeDelta::days(1)
            }
        }
        // Unreachable after validation; treat as due now rather than panic.
        None => now,
    }
}

/// The wait/dispatch loop. Runs until the shutdown token is cancelled.
async fn dispatch_loop(shared: Arc<Shared>) {
    debug!("dispatch loop running");
    loop {
        let next_wake = shared.lock_registry().next_wake;

        match next_wake {
            Some(at) => {
                let wait = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                tokio::select! {
                    _ = shared.shutdown.cancelled() => break,
                    _ = shared.wake.notified() => {}
                    _ = tokio::time::sleep(wait) => {}
                }
            }
            // Nothing scheduled: block on the wake signal alone.
            None => {
                tokio::select! {
                    _ = shared.shutdown.cancelled() => break,
                    _ = shared.wake.notified() => {}
                }
            }
        }

        if shared.shutdown.is_cancelled() {
            break;
        }

        let now = Utc::now();
        let slots = {
            let mut registry = shared.lock_registry();
            // An early wake is a hint that `next_wake` moved, not a release:
            // go back around and recompute the sleep against the new value.
            if registry.next_wake.is_some_and(|at| now < at) {
                continue;
            }
            registry.collect_due(&shared.shutdown, now)
        };

        if !slots.is_empty() {
            debug!("dispatching {} due task(s)", slots.len());
        }
        for slot in slots {
            spawn_worker(Arc::clone(&shared), slot);
        }
    }
    debug!("dispatch loop exited");
}

fn spawn_worker(shared: Arc<Shared>, slot: RunSlot) {
    tokio::spawn(run_slot(shared, slot));
}

/// One worker: execute a run slot and report the result to the funnel.
async fn run_slot(shared: Arc<Shared>, slot: RunSlot) {
    let RunSlot {
        name,
        run_id,
        job,
        cancel,
        suspended,
        scheduled_for,
        started_at,
    } = slot;

    if suspended {
        debug!("task '{name}' suspended; consuming slot without running");
        let record = RunRecord {
            task: name.to_string(),
            scheduled_for,
            started_at,
            finished_at: started_at,
            outcome: RunOutcome::Skipped,
            error: None,
        };
        finish_run(&shared, &name, run_id, record);
        return;
    }

    debug!("task '{name}' run started for slot {scheduled_for}");
    let ctx = JobContext::new(Arc::clone(&name), scheduled_for, cancel);
    // The job gets its own task so a panic is contained here and still
    // reported, instead of vanishing with the worker.
    let joined = tokio::spawn(async move { job.run(ctx).await }).await;

    let finished_at = Utc::now();
    let (outcome, error) = match joined {
        Ok(Ok(())) => {
            debug!("task '{name}' run completed");
            (RunOutcome::Completed, None)
        }
        Ok(Err(e)) => {
            let msg = format!("{e:#}");
            warn!("task '{name}' run failed: {msg}");
            (RunOutcome::Failed, Some(msg))
        }
        Err(join_err) => {
            let msg = if join_err.is_panic() {
                "job panicked".to_owned()
            } else {
                format!("job task failed: {join_err}")
            };
            warn!("task '{name}' {msg}");
            (RunOutcome::Failed, Some(msg))
        }
    };

    let record = RunRecord {
        task: name.to_string(),
        scheduled_for,
        started_at,
        finished_at,
        outcome,
        error,
    };
    finish_run(&shared, &name, run_id, record);
}

/// Completion funnel: the only place a finished run mutates the registry.
///
/// Stale completions (the handle was unregistered or replaced-and-restarted
/// while this run was in flight) are dropped. Otherwise the handle leaves
/// `running` and is placed by the first rule that applies: a future
/// `next_run` re-enters the schedule as-is (it was re-registered mid-run),
/// a periodic handle advances and re-enters, an on-demand handle parks (or
/// restarts once, if a demand arrived during the run), anything else is
/// dropped. The failure hook and the event channel fire after the lock is
/// released.
fn finish_run(shared: &Arc<Shared>, name: &str, run_id: Uuid, record: RunRecord) {
    let now = record.finished_at;
    let mut wake = false;
    let mut respawn = None;

    {
        let mut registry = shared.lock_registry();
        let current = matches!(
            registry.running.get(name),
            Some(handle) if handle.run_id == Some(run_id)
        );
        if !current {
            debug!("task '{name}' finished after removal; dropping result");
            return;
        }
        let Some(mut handle) = registry.running.remove(name) else {
            return;
        };

        handle.finish_run(now);
        registry.push_history(record.clone(), shared.history_limit);

        if handle.next_run > now {
            // Re-registered to a future slot while it was running.
            wake = registry.lower_next_wake(handle.next_run);
            registry.scheduled.insert(handle.name.clone(), handle);
        } else if handle.advance_after(now) {
            wake = registry.lower_next_wake(handle.next_run);
            registry.scheduled.insert(handle.name.clone(), handle);
        } else if handle.on_demand {
            if handle.rerun_requested && !shared.shutdown.is_cancelled() {
                debug!("task '{name}' running queued demand");
                let slot = handle.begin_run(&shared.shutdown, now, now);
                registry.running.insert(handle.name.clone(), handle);
                respawn = Some(slot);
            } else {
                registry.on_demand.insert(handle.name.clone(), handle);
            }
        } else {
            debug!("task '{name}' finished and dropped");
        }
    }

    if wake {
        shared.wake.notify_one();
    }
    if let Some(slot) = respawn {
        spawn_worker(Arc::clone(shared), slot);
    }

    if record.outcome == RunOutcome::Failed {
        if let Some(hook) = &shared.on_failure {
            hook();
        }
    }
    if let Some(events) = &shared.events {
        // No subscribers is not an error.
        let _ = events.send(record);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::job::job_fn;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn make_scheduler() -> (Scheduler, mpsc::UnboundedReceiver<RunRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Scheduler::builder().events(tx).build(), rx)
    }

    fn ok_job() -> Arc<dyn Job> {
        job_fn(|_ctx| async move { Ok(()) })
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, h, m, 0).unwrap()
    }

    async fn next_record(rx: &mut mpsc::UnboundedReceiver<RunRecord>) -> RunRecord {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("record within timeout")
            .expect("event channel open")
    }

    #[test]
    fn new_scheduler_is_empty() {
        let (scheduler, _rx) = make_scheduler();
        let snapshot = scheduler.snapshot();
        assert!(snapshot.tasks.is_empty());
        assert!(snapshot.history.is_empty());
        assert!(!scheduler.is_running());
    }

    #[test]
    fn registration_appears_in_snapshot() {
        let (scheduler, _rx) = make_scheduler();
        scheduler.add_periodic_task("sync", at(12, 0), Duration::from_secs(60), ok_job());

        let snapshot = scheduler.snapshot();
        assert_eq!(snapshot.tasks.len(), 1);
        let task = &snapshot.tasks[0];
        assert_eq!(task.name, "sync");
        assert_eq!(task.state, TaskState::Scheduled);
        assert_eq!(task.next_run, Some(at(12, 0)));
        assert_eq!(task.period, Some(Duration::from_secs(60)));
    }

    #[test]
    fn same_name_registration_replaces() {
        let (scheduler, _rx) = make_scheduler();
        scheduler.add_periodic_task("job", at(12, 0), Duration::from_secs(60), ok_job());
        scheduler.add_timed_task("job", at(15, 30), ok_job());

        let snapshot = scheduler.snapshot();
        assert_eq!(snapshot.tasks.len(), 1);
        let task = &snapshot.tasks[0];
        assert_eq!(task.next_run, Some(at(15, 30)));
        assert_eq!(task.period, None);
    }

    #[test]
    fn re_registration_moves_between_collections() {
        let (scheduler, _rx) = make_scheduler();
        scheduler.add_periodic_task("job", at(12, 0), Duration::from_secs(60), ok_job());
        scheduler.add_on_demand_task("job", ok_job());

        let snapshot = scheduler.snapshot();
        assert_eq!(snapshot.tasks.len(), 1);
        assert_eq!(snapshot.tasks[0].state, TaskState::OnDemand);
        assert!(snapshot.tasks[0].next_run.is_none());
    }

    #[test]
    fn unknown_names_report_not_found() {
        let (scheduler, _rx) = make_scheduler();
        assert!(!scheduler.run_task_now("ghost"));
        assert!(!scheduler.demand_task("ghost"));
        assert!(!scheduler.disable_task("ghost"));
        assert!(!scheduler.enable_task("ghost"));
        assert!(scheduler.unregister_task("ghost").is_none());
        assert!(scheduler.task_info("ghost").is_none());
        // "Ensure stopped" is already satisfied for a name that is not
        // running at all.
        assert!(scheduler.stop_task("ghost"));
    }

    #[test]
    fn demand_requires_on_demand_when_idle() {
        let (scheduler, _rx) = make_scheduler();
        scheduler.add_periodic_task("periodic", at(12, 0), Duration::from_secs(60), ok_job());
        assert!(!scheduler.demand_task("periodic"));
    }

    #[test]
    fn unregister_returns_final_snapshot() {
        let (scheduler, _rx) = make_scheduler();
        scheduler.add_timed_task("once", at(12, 0), ok_job());

        let info = scheduler.unregister_task("once").expect("registered");
        assert_eq!(info.name, "once");
        assert_eq!(info.state, TaskState::Scheduled);
        assert_eq!(info.next_run, Some(at(12, 0)));

        assert!(scheduler.unregister_task("once").is_none());
        assert!(scheduler.snapshot().tasks.is_empty());
    }

    #[test]
    fn disable_and_enable_toggle_suspension() {
        let (scheduler, _rx) = make_scheduler();
        scheduler.add_periodic_task("job", at(12, 0), Duration::from_secs(60), ok_job());

        assert!(scheduler.disable_task("job"));
        assert!(scheduler.task_info("job").expect("registered").suspended);
        assert!(scheduler.enable_task("job"));
        assert!(!scheduler.task_info("job").expect("registered").suspended);
    }

    #[test]
    fn daily_rejects_out_of_range_times() {
        let (scheduler, _rx) = make_scheduler();
        let err = scheduler
            .add_daily_task("daily", 24, 0, ok_job())
            .unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::InvalidDailyTime { hour: 24, minute: 0 }
        ));
        assert!(
            scheduler
                .add_daily_task("daily", 23, 60, ok_job())
                .is_err()
        );
        assert!(scheduler.snapshot().tasks.is_empty());
    }

    #[test]
    fn daily_occurrence_today_when_still_ahead() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 8, 0, 0).unwrap();
        let next = next_daily_occurrence(now, 9, 30);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 14, 9, 30, 0).unwrap());
    }

    #[test]
    fn daily_occurrence_tomorrow_when_past() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 10, 0, 0).unwrap();
        let next = next_daily_occurrence(now, 9, 30);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 15, 9, 30, 0).unwrap());
    }

    #[test]
    fn daily_occurrence_tomorrow_on_exact_hit() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 9, 30, 0).unwrap();
        let next = next_daily_occurrence(now, 9, 30);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 15, 9, 30, 0).unwrap());
    }

    #[test]
    fn daily_occurrence_rolls_over_midnight() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 23, 59, 30).unwrap();
        let next = next_daily_occurrence(now, 0, 0);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn start_twice_reports_already_running() {
        let (scheduler, _rx) = make_scheduler();
        scheduler.start().expect("first start");
        assert!(scheduler.is_running());
        assert!(matches!(
            scheduler.start(),
            Err(SchedulerError::AlreadyRunning)
        ));
        scheduler.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn stopped_scheduler_cannot_restart() {
        let (scheduler, _rx) = make_scheduler();
        scheduler.start().expect("start");
        scheduler.stop().await.expect("stop");
        assert!(!scheduler.is_running());
        assert!(matches!(
            scheduler.start(),
            Err(SchedulerError::AlreadyStopped)
        ));
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_ok_before_start() {
        let (scheduler, _rx) = make_scheduler();
        scheduler.stop().await.expect("stop before start");
        scheduler.stop().await.expect("second stop");
        assert!(matches!(
            scheduler.start(),
            Err(SchedulerError::AlreadyStopped)
        ));
    }

    #[tokio::test]
    async fn one_shot_runs_and_is_dropped() {
        let (scheduler, mut rx) = make_scheduler();
        scheduler.start().expect("start");
        scheduler.add_timed_task("once", Utc::now(), ok_job());

        let record = next_record(&mut rx).await;
        assert_eq!(record.task, "once");
        assert_eq!(record.outcome, RunOutcome::Completed);
        // Bookkeeping happens before the event is sent, so the collections
        // are already final here.
        assert!(scheduler.snapshot().tasks.is_empty());
        assert_eq!(scheduler.snapshot().history.len(), 1);

        scheduler.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn early_registration_interrupts_a_long_sleep() {
        let (scheduler, mut rx) = make_scheduler();
        scheduler.start().expect("start");
        // Put the loop to sleep for ten minutes.
        scheduler.add_timed_task(
            "far",
            Utc::now() + TimeDelta::minutes(10),
            ok_job(),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;

        // A task due now must not wait out that sleep.
        scheduler.add_timed_task("near", Utc::now(), ok_job());
        let record = next_record(&mut rx).await;
        assert_eq!(record.task, "near");

        scheduler.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn failure_hook_fires_once_per_failure() {
        let failures = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&failures);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::builder()
            .events(tx)
            .on_failure(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .build();
        scheduler.start().expect("start");

        scheduler.add_timed_task(
            "broken",
            Utc::now(),
            job_fn(|_ctx| async move { anyhow::bail!("backend unreachable") }),
        );

        let record = next_record(&mut rx).await;
        assert_eq!(record.outcome, RunOutcome::Failed);
        assert!(
            record
                .error
                .as_deref()
                .expect("error message")
                .contains("backend unreachable")
        );
        assert_eq!(failures.load(Ordering::SeqCst), 1);

        scheduler.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn run_history_is_bounded() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::builder().events(tx).history_limit(2).build();
        scheduler.start().expect("start");

        scheduler.add_timed_task("a", Utc::now(), ok_job());
        scheduler.add_timed_task("b", Utc::now(), ok_job());
        scheduler.add_timed_task("c", Utc::now(), ok_job());

        for _ in 0..3 {
            let _ = next_record(&mut rx).await;
        }
        assert_eq!(scheduler.snapshot().history.len(), 2);

        scheduler.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn history_limit_zero_clamps_to_one() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::builder().events(tx).history_limit(0).build();
        scheduler.start().expect("start");

        scheduler.add_timed_task("a", Utc::now(), ok_job());
        scheduler.add_timed_task("b", Utc::now(), ok_job());

        for _ in 0..2 {
            let _ = next_record(&mut rx).await;
        }
        assert_eq!(scheduler.snapshot().history.len(), 1);

        scheduler.stop().await.expect("stop");
    }
}
