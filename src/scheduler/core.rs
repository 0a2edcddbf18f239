//! Scheduler engine
//!
//! Owns the job registry, the trigger-evaluation loop and the in-flight
//! execution table. One engine instance lives for the whole process; `start`
//! and `stop` bound run periods within it, and counters carry across those
//! periods.

use super::error::{SchedulerError, SchedulerResult};
use super::jobs::{JobUnit, StartOptions};
use crate::config::Config;
use crate::events::{EventKind, EventRecorder, ExecutionEvent};
use crate::health::ComponentProbe;
use crate::monitor::MonitorLoop;
use crate::recovery::RecoveryController;
use crate::state::{SchedulerState, StateStore};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, trace, warn};

/// Shortest and longest single sleep of the trigger loop. The lower bound
/// stops a busy spin when a fire time is imminent; the upper bound keeps the
/// loop responsive to wall-clock adjustments.
const MIN_TICK: Duration = Duration::from_millis(200);
const MAX_TICK: Duration = Duration::from_secs(30);

/// Result of a manual out-of-schedule execution
#[derive(Debug)]
pub enum RunOnceOutcome {
    /// The job ran to completion (successfully or not)
    Completed(ExecutionEvent),
    /// A scheduled run was still in flight; nothing was executed
    AlreadyRunning(ExecutionEvent),
}

struct RunPeriod {
    shutdown: watch::Sender<bool>,
}

/// The scheduler engine
///
/// All public methods take `&self`; the engine is designed to live in an
/// `Arc` shared between the CLI surface, the trigger loop and the monitor.
pub struct SchedulerService {
    config: Config,
    tz: Tz,
    jobs: DashMap<String, JobUnit>,
    recorder: Arc<EventRecorder>,
    store: Arc<StateStore>,

    run: Mutex<Option<RunPeriod>>,
    last_options: Mutex<Option<StartOptions>>,
    start_time: RwLock<Option<DateTime<Utc>>>,
    paused: AtomicBool,

    /// Claims held by executing jobs; presence means "in flight"
    in_flight: DashMap<String, Arc<AtomicBool>>,
    /// Signalled whenever the in-flight table drains to empty
    idle: Notify,

    /// Upcoming fire times, published by the trigger loop for the dashboard
    next_fires: DashMap<String, DateTime<Utc>>,

    /// Survives restarts so the recovery cool-down is not reset by the very
    /// restart it caused
    recovery: Mutex<RecoveryController>,
    probes: RwLock<Vec<ComponentProbe>>,
}

impl SchedulerService {
    pub fn new(
        config: Config,
        store: StateStore,
        recorder: EventRecorder,
    ) -> SchedulerResult<Self> {
        let tz: Tz = config.scheduler.timezone.parse().map_err(|_| {
            SchedulerError::Configuration(format!(
                "unknown timezone: {}",
                config.scheduler.timezone
            ))
        })?;

        let recovery = RecoveryController::new(config.recovery.clone());

        Ok(Self {
            config,
            tz,
            jobs: DashMap::new(),
            recorder: Arc::new(recorder),
            store: Arc::new(store),
            run: Mutex::new(None),
            last_options: Mutex::new(None),
            start_time: RwLock::new(None),
            paused: AtomicBool::new(false),
            in_flight: DashMap::new(),
            idle: Notify::new(),
            next_fires: DashMap::new(),
            recovery: Mutex::new(recovery),
            probes: RwLock::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn recorder(&self) -> &Arc<EventRecorder> {
        &self.recorder
    }

    pub fn recovery(&self) -> &Mutex<RecoveryController> {
        &self.recovery
    }

    /// Register a job. Fails on duplicate ids or invalid triggers; the
    /// registry itself is independent of whether the engine is running.
    pub fn register(&self, job: JobUnit) -> SchedulerResult<()> {
        job.trigger.validate()?;
        match self.jobs.entry(job.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(SchedulerError::DuplicateJob(job.id))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                debug!(job_id = %job.id, trigger = %job.trigger, "job registered");
                slot.insert(job);
                Ok(())
            }
        }
    }

    pub fn job_ids(&self) -> Vec<String> {
        self.jobs.iter().map(|e| e.key().clone()).collect()
    }

    /// Liveness inputs for the health evaluator, derived from the registered
    /// jobs plus which collaborators are actually wired.
    pub fn set_component_probes(&self, probes: Vec<ComponentProbe>) {
        *self.probes.write() = probes;
    }

    pub fn component_probes(&self) -> Vec<ComponentProbe> {
        self.probes.read().clone()
    }

    pub fn is_running(&self) -> bool {
        self.run.lock().is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        *self.start_time.read()
    }

    pub fn next_fires(&self) -> HashMap<String, DateTime<Utc>> {
        self.next_fires
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    /// Start a run period with the given job-group selection.
    pub fn start(self: &Arc<Self>, options: StartOptions) -> SchedulerResult<()> {
        let mut run = self.run.lock();
        if run.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }
        if !self.config.scheduler.enabled {
            return Err(SchedulerError::Configuration(
                "scheduler is disabled".to_string(),
            ));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        *self.start_time.write() = Some(Utc::now());
        *self.last_options.lock() = Some(options.clone());

        tokio::spawn(Arc::clone(self).trigger_loop(options.clone(), shutdown_rx.clone()));

        if options.monitoring && self.config.monitor.enabled {
            let monitor = MonitorLoop::new(Arc::clone(self));
            tokio::spawn(monitor.run(shutdown_rx));
        }

        info!(
            collection = options.collection,
            analysis = options.analysis,
            email = options.email,
            full_pipeline = options.full_pipeline,
            enhanced_strategy = options.enhanced_strategy,
            monitoring = options.monitoring,
            timezone = %self.tz,
            "scheduler started"
        );

        *run = Some(RunPeriod {
            shutdown: shutdown_tx,
        });
        Ok(())
    }

    /// Stop the current run period.
    ///
    /// Waits up to the configured grace period for in-flight executions to
    /// finish, then abandons the stragglers, recording a forced failure for
    /// each. Calling stop while stopped is a no-op.
    pub async fn stop(&self) {
        let period = self.run.lock().take();
        let Some(period) = period else {
            debug!("stop requested while not running, ignoring");
            return;
        };

        info!("scheduler stopping");
        // Receivers drop on their own once their loops observe the signal.
        let _ = period.shutdown.send(true);
        self.next_fires.clear();

        let grace = self.config.scheduler.stop_grace();
        let deadline = Instant::now() + grace;
        loop {
            if self.in_flight.is_empty() {
                break;
            }
            // Arm the notification before re-checking, otherwise a release
            // landing between the check and the first poll is lost and the
            // wait runs out the whole grace.
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight.is_empty() {
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            if tokio::time::timeout(remaining, notified).await.is_err() {
                break;
            }
        }

        let stragglers: Vec<(String, Arc<AtomicBool>)> = self
            .in_flight
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        for (job_id, abandon) in stragglers {
            abandon.store(true, Ordering::Relaxed);
            warn!(
                job_id = %job_id,
                grace_secs = grace.as_secs(),
                "abandoning in-flight execution"
            );
            self.recorder.record(ExecutionEvent::new(
                &job_id,
                EventKind::ForcedFailure,
                format!("abandoned after {}s stop grace", grace.as_secs()),
                grace,
            ));
            self.in_flight.remove(&job_id);
        }

        self.persist().await;
        info!("scheduler stopped");
    }

    /// Stop and start again with the options of the previous run period.
    /// Counters and history are untouched; only run state resets.
    pub async fn restart_last(self: &Arc<Self>) -> SchedulerResult<()> {
        let options = self
            .last_options
            .lock()
            .clone()
            .ok_or(SchedulerError::NotRunning)?;

        self.stop().await;
        self.start(options)
    }

    /// Suppress trigger firings without tearing anything down. Triggers keep
    /// advancing while paused, so resuming never produces a burst of
    /// catch-up runs.
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::Relaxed) {
            info!("scheduler paused");
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::Relaxed) {
            info!("scheduler resumed");
        }
    }

    /// Execute one job immediately, outside its schedule.
    ///
    /// Overlap rules apply exactly as for scheduled firings: if the job is
    /// already in flight the request is rejected and recorded as a skip.
    pub async fn run_once(&self, job_id: &str) -> SchedulerResult<RunOnceOutcome> {
        let job = self
            .jobs
            .get(job_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| SchedulerError::UnknownJob(job_id.to_string()))?;

        let Some(abandon) = self.claim(&job.id) else {
            let event = ExecutionEvent::skipped(
                &job.id,
                "manual run rejected: previous execution still in flight",
            );
            self.record_and_persist(event.clone()).await;
            return Ok(RunOnceOutcome::AlreadyRunning(event));
        };

        info!(job_id = %job.id, "manual execution requested");
        match self.execute(&job, abandon).await {
            Some(event) => Ok(RunOnceOutcome::Completed(event)),
            // The claim was abandoned mid-run by a concurrent stop; surface
            // the forced-failure event recorded there.
            None => {
                let event = self.recorder.last_event_for(&job.id).ok_or_else(|| {
                    SchedulerError::Internal("abandoned run left no event".to_string())
                })?;
                Ok(RunOnceOutcome::Completed(event))
            }
        }
    }

    /// Build the snapshot persisted to disk and shown on the dashboard.
    pub fn snapshot(&self) -> SchedulerState {
        let counters = self.recorder.counters();
        SchedulerState {
            running: self.is_running(),
            start_time: self.start_time(),
            total_executions: counters.total_executions,
            total_failures: counters.total_failures,
            last_event_by_job: self.recorder.last_by_job(),
            event_history: self.recorder.tail(self.config.state.persisted_history),
            saved_at: Some(Utc::now()),
        }
    }

    /// Persist the current snapshot. Best-effort: failures are logged and
    /// never propagated into scheduling.
    pub async fn persist(&self) {
        let snapshot = self.snapshot();
        if let Err(err) = self.store.save(&snapshot).await {
            warn!(error = %err, "state persistence failed");
        }
    }

    pub async fn record_and_persist(&self, event: ExecutionEvent) {
        self.recorder.record(event);
        self.persist().await;
    }

    /// Atomically claim a job for execution. `None` means a run is already
    /// in flight.
    fn claim(&self, job_id: &str) -> Option<Arc<AtomicBool>> {
        match self.in_flight.entry(job_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let abandon = Arc::new(AtomicBool::new(false));
                slot.insert(Arc::clone(&abandon));
                Some(abandon)
            }
        }
    }

    fn release(&self, job_id: &str) {
        self.in_flight.remove(job_id);
        if self.in_flight.is_empty() {
            self.idle.notify_waiters();
        }
    }

    /// Run the executor and record the outcome. Returns `None` when the run
    /// was abandoned by a concurrent stop, in which case the forced-failure
    /// event has already been recorded and this result must be discarded.
    async fn execute(&self, job: &JobUnit, abandon: Arc<AtomicBool>) -> Option<ExecutionEvent> {
        let started = Instant::now();
        let result = std::panic::AssertUnwindSafe(job.run()).catch_unwind().await;
        let elapsed = started.elapsed();

        self.release(&job.id);

        if abandon.load(Ordering::Relaxed) {
            debug!(job_id = %job.id, "discarding result of abandoned execution");
            return None;
        }

        let event = match result {
            Ok(Ok(message)) => {
                info!(
                    job_id = %job.id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "job succeeded"
                );
                ExecutionEvent::success(&job.id, message, elapsed)
            }
            Ok(Err(message)) => {
                error!(job_id = %job.id, error = %message, "job failed");
                ExecutionEvent::failure(&job.id, message, elapsed)
            }
            Err(panic) => {
                let message = panic_message(panic);
                error!(job_id = %job.id, panic = %message, "job panicked");
                ExecutionEvent::failure(&job.id, format!("panicked: {message}"), elapsed)
            }
        };

        self.record_and_persist(event.clone()).await;
        Some(event)
    }

    /// Fire a scheduled trigger: claim, or record an overlap skip.
    async fn dispatch(self: &Arc<Self>, job: JobUnit) {
        match self.claim(&job.id) {
            Some(abandon) => {
                let service = Arc::clone(self);
                tokio::spawn(async move {
                    service.execute(&job, abandon).await;
                });
            }
            None => {
                warn!(
                    job_id = %job.id,
                    "trigger fired while previous run still in flight, skipping"
                );
                let event =
                    ExecutionEvent::skipped(&job.id, "previous execution still in flight");
                self.record_and_persist(event).await;
            }
        }
    }

    /// Single loop evaluating every enabled job's trigger.
    async fn trigger_loop(
        self: Arc<Self>,
        options: StartOptions,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let now = Utc::now().with_timezone(&self.tz);
        let mut next: HashMap<String, DateTime<Tz>> = HashMap::new();

        for entry in self.jobs.iter() {
            let job = entry.value();
            if !options.enables(job.group) {
                continue;
            }
            match job.trigger.next_fire(now) {
                Some(at) => {
                    debug!(job_id = %job.id, next = %at, "trigger armed");
                    self.next_fires.insert(job.id.clone(), at.with_timezone(&Utc));
                    next.insert(job.id.clone(), at);
                }
                None => warn!(job_id = %job.id, "trigger yields no next fire time, job inert"),
            }
        }

        self.persist().await;

        loop {
            let wait = match next.values().min() {
                Some(earliest) => {
                    let now = Utc::now().with_timezone(&self.tz);
                    let until = (*earliest - now).to_std().unwrap_or(Duration::ZERO);
                    until.clamp(MIN_TICK, MAX_TICK)
                }
                // Nothing scheduled; just wait for shutdown.
                None => MAX_TICK,
            };

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(wait) => {}
            }

            let now = Utc::now().with_timezone(&self.tz);
            let due: Vec<String> = next
                .iter()
                .filter(|(_, at)| **at <= now)
                .map(|(id, _)| id.clone())
                .collect();

            for job_id in due {
                let Some(job) = self.jobs.get(&job_id).map(|e| e.value().clone()) else {
                    next.remove(&job_id);
                    continue;
                };

                if self.is_paused() {
                    trace!(job_id = %job_id, "trigger fired while paused, suppressed");
                } else {
                    self.dispatch(job.clone()).await;
                }

                match job.trigger.next_fire(now) {
                    Some(at) => {
                        self.next_fires.insert(job_id.clone(), at.with_timezone(&Utc));
                        next.insert(job_id, at);
                    }
                    None => {
                        self.next_fires.remove(&job_id);
                        next.remove(&job_id);
                    }
                }
            }
        }

        debug!("trigger loop exited");
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::jobs::{JobGroup, Trigger};
    use std::sync::atomic::AtomicU32;

    fn service_with(configure: impl FnOnce(&mut Config)) -> Arc<SchedulerService> {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = Config::default();
        config.state.path = dir.path().join("state.json");
        configure(&mut config);
        // tempdir must outlive the store
        std::mem::forget(dir);

        let store = StateStore::new(config.state.path.clone());
        let recorder = EventRecorder::new(config.scheduler.history_capacity);
        Arc::new(SchedulerService::new(config, store, recorder).expect("service"))
    }

    fn service() -> Arc<SchedulerService> {
        service_with(|_| {})
    }

    fn noop_job(id: &str) -> JobUnit {
        JobUnit::new(
            id,
            id,
            Trigger::Interval(Duration::from_secs(3600)),
            JobGroup::Collection,
            || async { Ok("done".to_string()) },
        )
    }

    fn quiet_options() -> StartOptions {
        StartOptions {
            monitoring: false,
            ..StartOptions::standard()
        }
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let service = service();
        service.register(noop_job("a")).expect("first");
        assert!(matches!(
            service.register(noop_job("a")),
            Err(SchedulerError::DuplicateJob(_))
        ));
    }

    #[tokio::test]
    async fn test_run_once_unknown_job() {
        let service = service();
        assert!(matches!(
            service.run_once("missing").await,
            Err(SchedulerError::UnknownJob(_))
        ));
    }

    #[tokio::test]
    async fn test_run_once_records_success() {
        let service = service();
        service.register(noop_job("a")).expect("register");

        let outcome = service.run_once("a").await.expect("run");
        let RunOnceOutcome::Completed(event) = outcome else {
            panic!("expected completed outcome");
        };
        assert_eq!(event.kind, EventKind::Success);
        assert_eq!(service.recorder().counters().total_executions, 1);
    }

    #[tokio::test]
    async fn test_run_once_records_failure_and_counters_hold() {
        let service = service();
        service
            .register(JobUnit::new(
                "failing",
                "failing",
                Trigger::Interval(Duration::from_secs(3600)),
                JobGroup::Collection,
                || async { Err("feed unavailable".to_string()) },
            ))
            .expect("register");

        service.run_once("failing").await.expect("run");
        let counters = service.recorder().counters();
        assert_eq!(counters.total_executions, 1);
        assert_eq!(counters.total_failures, 1);
    }

    #[tokio::test]
    async fn test_run_once_overlap_rejected() {
        let service = service();
        service
            .register(JobUnit::new(
                "slow",
                "slow",
                Trigger::Interval(Duration::from_secs(3600)),
                JobGroup::Collection,
                || async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok("done".to_string())
                },
            ))
            .expect("register");

        let bg = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.run_once("slow").await })
        };
        // Let the background run claim the job before contending.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let outcome = service.run_once("slow").await.expect("run");
        assert!(matches!(outcome, RunOnceOutcome::AlreadyRunning(_)));

        let first = bg.await.expect("join").expect("run");
        assert!(matches!(first, RunOnceOutcome::Completed(_)));

        // Exactly one execution counted; the skip is bookkeeping only.
        let counters = service.recorder().counters();
        assert_eq!(counters.total_executions, 1);
        assert_eq!(counters.total_failures, 0);
    }

    #[tokio::test]
    async fn test_panicking_job_recorded_as_failure() {
        let service = service();
        service
            .register(JobUnit::new(
                "panicky",
                "panicky",
                Trigger::Interval(Duration::from_secs(3600)),
                JobGroup::Collection,
                || async { panic!("executor blew up") },
            ))
            .expect("register");

        let outcome = service.run_once("panicky").await.expect("run");
        let RunOnceOutcome::Completed(event) = outcome else {
            panic!("expected completed outcome");
        };
        assert_eq!(event.kind, EventKind::Failure);
        assert!(event.message.contains("executor blew up"));
        // The claim must be released even after a panic.
        assert!(service.in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_start_twice_rejected_and_stop_idempotent() {
        let service = service();
        service.register(noop_job("a")).expect("register");

        service.start(quiet_options()).expect("start");
        assert!(service.is_running());
        assert!(matches!(
            service.start(quiet_options()),
            Err(SchedulerError::AlreadyRunning)
        ));

        service.stop().await;
        assert!(!service.is_running());
        // Second stop must be a no-op.
        service.stop().await;
    }

    #[tokio::test]
    async fn test_restart_preserves_counters() {
        let service = service();
        service.register(noop_job("a")).expect("register");
        service.run_once("a").await.expect("run");

        service.start(quiet_options()).expect("start");
        service.restart_last().await.expect("restart");

        assert!(service.is_running());
        assert_eq!(service.recorder().counters().total_executions, 1);
        service.stop().await;
    }

    #[tokio::test]
    async fn test_pause_suppresses_dispatch() {
        let service = service();
        let runs = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&runs);
        service
            .register(JobUnit::new(
                "fast",
                "fast",
                Trigger::Interval(Duration::from_millis(250)),
                JobGroup::Collection,
                move || {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::Relaxed);
                        Ok("tick".to_string())
                    }
                },
            ))
            .expect("register");

        service.pause();
        service.start(quiet_options()).expect("start");

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(runs.load(Ordering::Relaxed), 0);

        service.resume();
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert!(runs.load(Ordering::Relaxed) >= 1);

        service.stop().await;
    }

    #[tokio::test]
    async fn test_stop_returns_when_in_flight_drains() {
        let service = service_with(|config| {
            config.scheduler.stop_grace_secs = 30;
        });

        service
            .register(JobUnit::new(
                "brief",
                "brief",
                Trigger::Interval(Duration::from_millis(100)),
                JobGroup::Collection,
                || async {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    Ok("done".to_string())
                },
            ))
            .expect("register");

        service.start(quiet_options()).expect("start");
        tokio::time::sleep(Duration::from_millis(400)).await;

        // The running execution finishes in well under a second; stop must
        // observe the drain instead of sleeping out the 30s grace.
        let begun = Instant::now();
        service.stop().await;
        assert!(begun.elapsed() < Duration::from_secs(5));

        let last = service.recorder().last_event_for("brief").expect("event");
        assert_ne!(last.kind, EventKind::ForcedFailure);
    }

    #[tokio::test]
    async fn test_stop_abandons_stragglers() {
        let service = service_with(|config| {
            config.scheduler.stop_grace_secs = 0;
        });

        service
            .register(JobUnit::new(
                "stuck",
                "stuck",
                Trigger::Interval(Duration::from_millis(100)),
                JobGroup::Collection,
                || async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok("never".to_string())
                },
            ))
            .expect("register");

        service.start(quiet_options()).expect("start");

        // Wait for the trigger to dispatch the stuck job.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!service.in_flight.is_empty());

        service.stop().await;

        let last = service.recorder().last_event_for("stuck").expect("event");
        assert_eq!(last.kind, EventKind::ForcedFailure);
        let counters = service.recorder().counters();
        assert!(counters.total_failures <= counters.total_executions);
    }
}
