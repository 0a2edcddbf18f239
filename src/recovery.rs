//! Automatic recovery state machine
//!
//! Watches health verdicts over monitor ticks and decides when the scheduler
//! should be restarted. A restart requires the verdict to stay critical for a
//! configured number of consecutive ticks (debounce), fires at most once per
//! critical episode, and is followed by a cool-down during which the
//! controller refuses to re-arm.

use crate::config::RecoveryConfig;
use crate::health::HealthStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reserved job id under which recovery restarts appear in the event history.
pub const RECOVERY_JOB_ID: &str = "recovery_controller";

/// Controller state
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RecoveryState {
    /// No critical verdicts observed
    Normal,
    /// Counting consecutive critical verdicts
    Watching,
    /// Restart requested, awaiting acknowledgement
    Recovering,
}

/// Decision returned from an observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    None,
    /// The caller must restart the scheduler and then call
    /// [`RecoveryController::acknowledge_restart`]
    Restart,
}

/// Debounced restart controller
pub struct RecoveryController {
    config: RecoveryConfig,
    state: RecoveryState,
    consecutive_critical: u32,
    last_restart: Option<DateTime<Utc>>,
}

impl RecoveryController {
    pub fn new(config: RecoveryConfig) -> Self {
        Self {
            config,
            state: RecoveryState::Normal,
            consecutive_critical: 0,
            last_restart: None,
        }
    }

    pub fn state(&self) -> RecoveryState {
        self.state
    }

    pub fn consecutive_critical(&self) -> u32 {
        self.consecutive_critical
    }

    /// Whether the post-restart quiet period is still in effect
    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        match self.last_restart {
            Some(at) => {
                let elapsed = now.signed_duration_since(at);
                elapsed.num_seconds() < self.config.cooldown_secs as i64
            }
            None => false,
        }
    }

    /// Feed one health verdict into the state machine.
    pub fn observe(&mut self, status: HealthStatus) -> RecoveryAction {
        self.observe_at(status, Utc::now())
    }

    /// Observation with an explicit clock, used by tests.
    pub fn observe_at(&mut self, status: HealthStatus, now: DateTime<Utc>) -> RecoveryAction {
        if !self.config.enabled {
            return RecoveryAction::None;
        }

        match status {
            HealthStatus::Critical => {
                if self.state == RecoveryState::Recovering {
                    // Restart already requested for this episode.
                    return RecoveryAction::None;
                }
                if self.in_cooldown(now) {
                    tracing::debug!(
                        state = %self.state,
                        "critical verdict ignored during recovery cool-down"
                    );
                    return RecoveryAction::None;
                }

                self.state = RecoveryState::Watching;
                self.consecutive_critical += 1;

                if self.consecutive_critical >= self.config.debounce_ticks {
                    tracing::warn!(
                        consecutive_critical = self.consecutive_critical,
                        "failure threshold sustained, requesting scheduler restart"
                    );
                    self.state = RecoveryState::Recovering;
                    self.last_restart = Some(now);
                    RecoveryAction::Restart
                } else {
                    tracing::info!(
                        consecutive_critical = self.consecutive_critical,
                        required = self.config.debounce_ticks,
                        "critical verdict observed, watching"
                    );
                    RecoveryAction::None
                }
            }
            HealthStatus::Healthy | HealthStatus::Degraded => {
                if self.state == RecoveryState::Watching {
                    tracing::info!("verdict recovered before debounce threshold, standing down");
                }
                self.state = RecoveryState::Normal;
                self.consecutive_critical = 0;
                RecoveryAction::None
            }
        }
    }

    /// Called after the restart attempt completed, regardless of outcome.
    /// One restart per critical episode; the cool-down gates the next one.
    pub fn acknowledge_restart(&mut self) {
        self.state = RecoveryState::Normal;
        self.consecutive_critical = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn controller() -> RecoveryController {
        RecoveryController::new(RecoveryConfig {
            enabled: true,
            debounce_ticks: 3,
            cooldown_secs: 600,
        })
    }

    #[test]
    fn test_single_critical_does_not_restart() {
        let mut ctrl = controller();
        assert_eq!(ctrl.observe(HealthStatus::Critical), RecoveryAction::None);
        assert_eq!(ctrl.state(), RecoveryState::Watching);
    }

    #[test]
    fn test_restart_after_exactly_k_criticals() {
        let mut ctrl = controller();
        assert_eq!(ctrl.observe(HealthStatus::Critical), RecoveryAction::None);
        assert_eq!(ctrl.observe(HealthStatus::Critical), RecoveryAction::None);
        assert_eq!(ctrl.observe(HealthStatus::Critical), RecoveryAction::Restart);
        assert_eq!(ctrl.state(), RecoveryState::Recovering);
    }

    #[test]
    fn test_healthy_tick_resets_streak() {
        let mut ctrl = controller();
        ctrl.observe(HealthStatus::Critical);
        ctrl.observe(HealthStatus::Critical);
        ctrl.observe(HealthStatus::Healthy);
        assert_eq!(ctrl.state(), RecoveryState::Normal);
        assert_eq!(ctrl.consecutive_critical(), 0);

        // The streak must start over from scratch.
        assert_eq!(ctrl.observe(HealthStatus::Critical), RecoveryAction::None);
        assert_eq!(ctrl.observe(HealthStatus::Critical), RecoveryAction::None);
        assert_eq!(ctrl.observe(HealthStatus::Critical), RecoveryAction::Restart);
    }

    #[test]
    fn test_degraded_also_resets_streak() {
        let mut ctrl = controller();
        ctrl.observe(HealthStatus::Critical);
        ctrl.observe(HealthStatus::Degraded);
        assert_eq!(ctrl.consecutive_critical(), 0);
    }

    #[test]
    fn test_cooldown_blocks_second_restart() {
        let mut ctrl = controller();
        let t0 = Utc::now();

        for _ in 0..2 {
            ctrl.observe_at(HealthStatus::Critical, t0);
        }
        assert_eq!(
            ctrl.observe_at(HealthStatus::Critical, t0),
            RecoveryAction::Restart
        );
        ctrl.acknowledge_restart();

        // Critical verdicts resume immediately; within the cool-down the
        // controller must not even re-enter watching.
        let t1 = t0 + Duration::seconds(60);
        for _ in 0..10 {
            assert_eq!(
                ctrl.observe_at(HealthStatus::Critical, t1),
                RecoveryAction::None
            );
        }
        assert_eq!(ctrl.state(), RecoveryState::Normal);
    }

    #[test]
    fn test_rearms_after_cooldown() {
        let mut ctrl = controller();
        let t0 = Utc::now();
        for _ in 0..3 {
            ctrl.observe_at(HealthStatus::Critical, t0);
        }
        ctrl.acknowledge_restart();

        let t1 = t0 + Duration::seconds(601);
        assert_eq!(
            ctrl.observe_at(HealthStatus::Critical, t1),
            RecoveryAction::None
        );
        assert_eq!(ctrl.state(), RecoveryState::Watching);
        ctrl.observe_at(HealthStatus::Critical, t1);
        assert_eq!(
            ctrl.observe_at(HealthStatus::Critical, t1),
            RecoveryAction::Restart
        );
    }

    #[test]
    fn test_disabled_controller_never_acts() {
        let mut ctrl = RecoveryController::new(RecoveryConfig {
            enabled: false,
            debounce_ticks: 1,
            cooldown_secs: 0,
        });
        for _ in 0..5 {
            assert_eq!(ctrl.observe(HealthStatus::Critical), RecoveryAction::None);
        }
        assert_eq!(ctrl.state(), RecoveryState::Normal);
    }
}
