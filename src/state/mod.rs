//! Durable scheduler state
//!
//! Operational counters and run history survive process restarts through a
//! single JSON snapshot. In-flight job state is deliberately not persisted:
//! a restart always means all jobs start cold.

mod file_store;

pub use file_store::StateStore;

use crate::events::{EventCounters, ExecutionEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Persisted snapshot of the scheduler's operational state
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchedulerState {
    /// Whether the scheduler was running when the snapshot was taken
    pub running: bool,

    /// Start of the current run period
    pub start_time: Option<DateTime<Utc>>,

    /// Monotonic counters since process start (reset only by deleting the file)
    pub total_executions: u64,
    pub total_failures: u64,

    /// Most recent event per job
    #[serde(default)]
    pub last_event_by_job: HashMap<String, ExecutionEvent>,

    /// Capped slice of recent events, oldest first
    #[serde(default)]
    pub event_history: Vec<ExecutionEvent>,

    /// When the snapshot was written
    pub saved_at: Option<DateTime<Utc>>,
}

impl SchedulerState {
    pub fn counters(&self) -> EventCounters {
        EventCounters {
            total_executions: self.total_executions,
            total_failures: self.total_failures,
        }
    }
}
