//! Health evaluation
//!
//! Turns raw event history into an actionable verdict. Evaluation is a pure
//! function of the recorder's current contents plus component liveness
//! signals; nothing here mutates state or performs I/O.

use crate::config::HealthConfig;
use crate::events::{EventRecorder, ExecutionEvent, RecentWindow};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use once_cell::sync::Lazy;
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Overall health classification
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
}

/// Liveness classification of a single component
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ComponentState {
    Up,
    Down,
    Unknown,
}

/// Liveness input for one component: whether its collaborator is wired at
/// all, and which job ids exercise it.
#[derive(Debug, Clone)]
pub struct ComponentProbe {
    pub name: String,
    pub wired: bool,
    pub job_ids: Vec<String>,
}

impl ComponentProbe {
    pub fn new(name: impl Into<String>, wired: bool, job_ids: Vec<String>) -> Self {
        Self {
            name: name.into(),
            wired,
            job_ids,
        }
    }
}

/// Derived health verdict; computed fresh on every monitor tick, never
/// persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthVerdict {
    pub status: HealthStatus,

    /// Fraction of failed events in the trailing window
    pub failure_rate: f64,

    /// Number of events the rate was computed over
    pub window_len: usize,

    /// Advisory per-component liveness, not part of the rate computation
    pub component_status: BTreeMap<String, ComponentState>,

    pub checked_at: DateTime<Utc>,
}

impl HealthVerdict {
    pub fn is_critical(&self) -> bool {
        self.status == HealthStatus::Critical
    }
}

/// Messages matching any of these mark a component's collaborator as
/// unreachable rather than merely failing.
static UNAVAILABLE_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)connection\s+(refused|reset|aborted|closed|failed)",
        r"(?i)\btimed?\s?out\b",
        r"(?i)\bdns\b",
        r"(?i)network\s+is\s+unreachable",
        r"(?i)temporarily\s+unavailable",
        r"(?i)no\s+route\s+to\s+host",
        r"(?i)\b50[234]\b",
    ])
    .expect("collaborator-unavailable patterns are valid regexes")
});

/// Classifies recent event history into a [`HealthVerdict`]
pub struct HealthEvaluator {
    config: HealthConfig,
}

impl HealthEvaluator {
    pub fn new(config: HealthConfig) -> Self {
        Self { config }
    }

    /// Compute the verdict from the recorder's trailing window.
    ///
    /// The window is the most recent `window_events` executions younger than
    /// `window_minutes`. Overlap skips are bookkeeping, not executions, so a
    /// burst of skips never shrinks the sample the rate is computed over.
    pub fn evaluate(&self, recorder: &EventRecorder, probes: &[ComponentProbe]) -> HealthVerdict {
        let now = Utc::now();

        let mut window: Vec<ExecutionEvent> = recorder
            .recent(RecentWindow::Since(ChronoDuration::minutes(
                self.config.window_minutes as i64,
            )))
            .into_iter()
            .filter(|e| e.kind.counts_as_execution())
            .collect();
        let excess = window.len().saturating_sub(self.config.window_events);
        if excess > 0 {
            window.drain(..excess);
        }

        let failure_rate = if window.is_empty() {
            0.0
        } else {
            let failures = window.iter().filter(|e| e.kind.is_failure()).count();
            failures as f64 / window.len() as f64
        };

        let status = if failure_rate == 0.0 {
            HealthStatus::Healthy
        } else if failure_rate <= self.config.degraded_threshold {
            HealthStatus::Degraded
        } else {
            HealthStatus::Critical
        };

        let last_by_job = recorder.last_by_job();
        let component_status = probes
            .iter()
            .map(|probe| (probe.name.clone(), classify_component(probe, &last_by_job)))
            .collect();

        HealthVerdict {
            status,
            failure_rate,
            window_len: window.len(),
            component_status,
            checked_at: now,
        }
    }
}

fn classify_component(
    probe: &ComponentProbe,
    last_by_job: &HashMap<String, ExecutionEvent>,
) -> ComponentState {
    if !probe.wired {
        return ComponentState::Down;
    }

    // Pure liveness probes carry no jobs; wired means up.
    if probe.job_ids.is_empty() {
        return ComponentState::Up;
    }

    let mut seen = false;
    for job_id in &probe.job_ids {
        if let Some(event) = last_by_job.get(job_id) {
            seen = true;
            if event.kind.is_failure() && UNAVAILABLE_PATTERNS.is_match(&event.message) {
                return ComponentState::Down;
            }
        }
    }

    if seen {
        ComponentState::Up
    } else {
        ComponentState::Unknown
    }
}
