//! Monitor loop
//!
//! A periodic tick that turns recorded history into a health verdict, feeds
//! the verdict to the recovery controller, publishes a dashboard snapshot and
//! persists state. Spawned alongside the trigger loop and torn down by the
//! same shutdown signal.

use crate::events::{EventCounters, EventKind, ExecutionEvent};
use crate::health::{HealthEvaluator, HealthVerdict};
use crate::recovery::{RecoveryAction, RecoveryState, RECOVERY_JOB_ID};
use crate::scheduler::SchedulerService;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Point-in-time operational view, rebuilt on every monitor tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub running: bool,
    pub paused: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime_secs: Option<u64>,
    pub counters: EventCounters,
    pub health: HealthVerdict,
    pub recovery_state: RecoveryState,
    pub next_fire_by_job: HashMap<String, DateTime<Utc>>,
    pub recent_events: Vec<ExecutionEvent>,
    pub refreshed_at: DateTime<Utc>,
}

impl DashboardSnapshot {
    pub fn capture(scheduler: &SchedulerService, health: HealthVerdict) -> Self {
        let now = Utc::now();
        let started_at = scheduler.start_time();
        let uptime_secs = started_at
            .filter(|_| scheduler.is_running())
            .map(|t| now.signed_duration_since(t).num_seconds().max(0) as u64);

        Self {
            running: scheduler.is_running(),
            paused: scheduler.is_paused(),
            started_at,
            uptime_secs,
            counters: scheduler.recorder().counters(),
            health,
            recovery_state: scheduler.recovery().lock().state(),
            next_fire_by_job: scheduler.next_fires(),
            recent_events: scheduler
                .recorder()
                .tail(scheduler.config().monitor.event_tail),
            refreshed_at: now,
        }
    }
}

/// Periodic health/recovery/persistence driver
pub struct MonitorLoop {
    scheduler: Arc<SchedulerService>,
    evaluator: HealthEvaluator,
    tick: Duration,
}

impl MonitorLoop {
    pub fn new(scheduler: Arc<SchedulerService>) -> Self {
        let config = scheduler.config();
        let evaluator = HealthEvaluator::new(config.health.clone());
        let tick = config.monitor.tick();
        Self {
            scheduler,
            evaluator,
            tick,
        }
    }

    /// Run until the shutdown signal fires. A recovery restart replaces the
    /// run period this loop belongs to, so the old loop exits through its own
    /// shutdown receiver and the new period spawns a fresh one.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(tick_secs = self.tick.as_secs(), "monitor loop started");
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first interval tick completes immediately; skip it so the
        // first evaluation happens a full period after start.
        interval.tick().await;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }
        debug!("monitor loop exited");
    }

    /// One evaluation cycle.
    pub async fn tick(&self) -> DashboardSnapshot {
        let probes = self.scheduler.component_probes();
        let verdict = self
            .evaluator
            .evaluate(self.scheduler.recorder(), &probes);

        info!(
            status = %verdict.status,
            failure_rate = verdict.failure_rate,
            window = verdict.window_len,
            "health evaluated"
        );

        let action = self.scheduler.recovery().lock().observe(verdict.status);
        if action == RecoveryAction::Restart {
            self.restart().await;
        }

        let snapshot = DashboardSnapshot::capture(&self.scheduler, verdict);
        if let Ok(rendered) = serde_json::to_string(&snapshot) {
            debug!(dashboard = %rendered, "dashboard refreshed");
        }

        self.scheduler.persist().await;
        snapshot
    }

    async fn restart(&self) {
        warn!("recovery restart initiated");
        self.scheduler.record_and_persist(ExecutionEvent::new(
            RECOVERY_JOB_ID,
            EventKind::Recovery,
            "automatic restart after sustained critical health",
            Duration::ZERO,
        ))
        .await;

        match self.scheduler.restart_last().await {
            Ok(()) => info!("recovery restart completed"),
            Err(err) => warn!(error = %err, "recovery restart failed"),
        }
        self.scheduler.recovery().lock().acknowledge_restart();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::events::EventRecorder;
    use crate::scheduler::{JobGroup, JobUnit, StartOptions, Trigger};
    use crate::state::StateStore;

    fn scheduler_with(configure: impl FnOnce(&mut Config)) -> Arc<SchedulerService> {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = Config::default();
        config.state.path = dir.path().join("state.json");
        configure(&mut config);
        std::mem::forget(dir);

        let store = StateStore::new(config.state.path.clone());
        let recorder = EventRecorder::new(config.scheduler.history_capacity);
        Arc::new(SchedulerService::new(config, store, recorder).expect("service"))
    }

    fn idle_job() -> JobUnit {
        JobUnit::new(
            "idle",
            "idle",
            Trigger::Interval(Duration::from_secs(3600)),
            JobGroup::Collection,
            || async { Ok("ok".to_string()) },
        )
    }

    #[tokio::test]
    async fn test_dashboard_snapshot_reflects_scheduler() {
        let scheduler = scheduler_with(|_| {});
        scheduler.register(idle_job()).expect("register");
        scheduler
            .recorder()
            .record(ExecutionEvent::success("idle", "ok", Duration::ZERO));

        let monitor = MonitorLoop::new(Arc::clone(&scheduler));
        let snapshot = monitor.tick().await;

        assert!(!snapshot.running);
        assert_eq!(snapshot.counters.total_executions, 1);
        assert_eq!(snapshot.recent_events.len(), 1);
        assert_eq!(snapshot.recovery_state, RecoveryState::Normal);
    }

    #[tokio::test]
    async fn test_sustained_critical_triggers_single_restart() {
        let scheduler = scheduler_with(|config| {
            config.recovery.debounce_ticks = 3;
        });
        scheduler.register(idle_job()).expect("register");
        scheduler
            .start(StartOptions {
                monitoring: false,
                ..StartOptions::standard()
            })
            .expect("start");

        // Force a critical failure rate.
        for _ in 0..5 {
            scheduler.recorder().record(ExecutionEvent::failure(
                "idle",
                "boom",
                Duration::ZERO,
            ));
        }

        let monitor = MonitorLoop::new(Arc::clone(&scheduler));
        monitor.tick().await;
        monitor.tick().await;
        assert!(scheduler
            .recorder()
            .last_event_for(RECOVERY_JOB_ID)
            .is_none());

        // Third consecutive critical tick restarts exactly once.
        monitor.tick().await;
        let recovery = scheduler
            .recorder()
            .last_event_for(RECOVERY_JOB_ID)
            .expect("recovery event");
        assert_eq!(recovery.kind, EventKind::Recovery);
        assert!(scheduler.is_running());

        // Still critical, but inside the cool-down: no second restart.
        let before = scheduler.recorder().len();
        monitor.tick().await;
        let events_since: Vec<_> = scheduler
            .recorder()
            .tail(scheduler.recorder().len())
            .into_iter()
            .skip(before)
            .filter(|e| e.kind == EventKind::Recovery)
            .collect();
        assert!(events_since.is_empty());

        scheduler.stop().await;
    }
}
