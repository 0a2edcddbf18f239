//! Execution event recording
//!
//! Single source of truth for what happened and when. Every job completion
//! (including panics, overlap skips and forced abandonments) becomes an
//! [`ExecutionEvent`] appended to a bounded history. The health evaluator and
//! the dashboard only ever read from here.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use uuid::Uuid;

/// Maximum stored length of an event message; longer messages are truncated.
pub const MAX_MESSAGE_LEN: usize = 240;

/// Outcome classification of a recorded event
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    /// Executor returned success
    Success,
    /// Executor returned an error or panicked
    Failure,
    /// Trigger fired while the previous run was still in flight
    SkippedOverlap,
    /// Execution abandoned during shutdown grace expiry
    ForcedFailure,
    /// Automatic recovery restart, recorded under a reserved job id
    Recovery,
}

impl EventKind {
    /// Whether this event counts against the failure rate
    pub fn is_failure(&self) -> bool {
        matches!(self, EventKind::Failure | EventKind::ForcedFailure)
    }

    /// Overlap skips are bookkeeping, not executions
    pub fn counts_as_execution(&self) -> bool {
        !matches!(self, EventKind::SkippedOverlap)
    }
}

/// Immutable record of one job run's outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub id: Uuid,
    pub job_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub message: String,
    pub duration_ms: u64,
}

impl ExecutionEvent {
    pub fn new(
        job_id: impl Into<String>,
        kind: EventKind,
        message: impl Into<String>,
        duration: Duration,
    ) -> Self {
        let mut message = message.into();
        if message.len() > MAX_MESSAGE_LEN {
            let mut idx = MAX_MESSAGE_LEN;
            while !message.is_char_boundary(idx) {
                idx -= 1;
            }
            message.truncate(idx);
        }

        Self {
            id: Uuid::new_v4(),
            job_id: job_id.into(),
            timestamp: Utc::now(),
            kind,
            message,
            duration_ms: duration.as_millis() as u64,
        }
    }

    pub fn success(job_id: &str, message: impl Into<String>, duration: Duration) -> Self {
        Self::new(job_id, EventKind::Success, message, duration)
    }

    pub fn failure(job_id: &str, message: impl Into<String>, duration: Duration) -> Self {
        Self::new(job_id, EventKind::Failure, message, duration)
    }

    pub fn skipped(job_id: &str, message: impl Into<String>) -> Self {
        Self::new(job_id, EventKind::SkippedOverlap, message, Duration::ZERO)
    }

    pub fn succeeded(&self) -> bool {
        !self.kind.is_failure()
    }
}

/// Monotonic execution counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCounters {
    pub total_executions: u64,
    pub total_failures: u64,
}

/// Trailing window selector for [`EventRecorder::recent`]
#[derive(Debug, Clone, Copy)]
pub enum RecentWindow {
    /// The most recent N events
    Count(usize),
    /// Events no older than the given duration
    Since(chrono::Duration),
}

struct RecorderInner {
    history: VecDeque<ExecutionEvent>,
    last_by_job: HashMap<String, ExecutionEvent>,
    counters: EventCounters,
}

/// Append-only bounded history of job executions
///
/// Job completions arrive concurrently from worker tasks, so all mutation
/// happens under a mutex. Capacity overflow silently evicts the oldest entry.
pub struct EventRecorder {
    capacity: usize,
    inner: Mutex<RecorderInner>,
}

impl EventRecorder {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(RecorderInner {
                history: VecDeque::new(),
                last_by_job: HashMap::new(),
                counters: EventCounters::default(),
            }),
        }
    }

    /// Rebuild a recorder from a persisted snapshot so counters and history
    /// survive process restarts.
    pub fn resume(
        capacity: usize,
        counters: EventCounters,
        history: Vec<ExecutionEvent>,
        last_by_job: HashMap<String, ExecutionEvent>,
    ) -> Self {
        let capacity = capacity.max(1);
        let mut deque: VecDeque<ExecutionEvent> = history.into();
        while deque.len() > capacity {
            deque.pop_front();
        }
        Self {
            capacity,
            inner: Mutex::new(RecorderInner {
                history: deque,
                last_by_job,
                counters,
            }),
        }
    }

    /// Append an event, update the per-job pointer and the global counters.
    pub fn record(&self, event: ExecutionEvent) {
        let mut inner = self.inner.lock();

        if event.kind.counts_as_execution() {
            inner.counters.total_executions += 1;
            if event.kind.is_failure() {
                inner.counters.total_failures += 1;
            }
        }

        inner
            .last_by_job
            .insert(event.job_id.clone(), event.clone());

        if inner.history.len() == self.capacity {
            inner.history.pop_front();
        }
        inner.history.push_back(event);
    }

    /// Events within a trailing window, oldest first. Pure read.
    pub fn recent(&self, window: RecentWindow) -> Vec<ExecutionEvent> {
        let inner = self.inner.lock();
        match window {
            RecentWindow::Count(n) => {
                let skip = inner.history.len().saturating_sub(n);
                inner.history.iter().skip(skip).cloned().collect()
            }
            RecentWindow::Since(age) => {
                let cutoff = Utc::now() - age;
                inner
                    .history
                    .iter()
                    .filter(|e| e.timestamp >= cutoff)
                    .cloned()
                    .collect()
            }
        }
    }

    /// The most recent N events, oldest first.
    pub fn tail(&self, n: usize) -> Vec<ExecutionEvent> {
        self.recent(RecentWindow::Count(n))
    }

    pub fn counters(&self) -> EventCounters {
        self.inner.lock().counters
    }

    pub fn last_event_for(&self, job_id: &str) -> Option<ExecutionEvent> {
        self.inner.lock().last_by_job.get(job_id).cloned()
    }

    pub fn last_by_job(&self) -> HashMap<String, ExecutionEvent> {
        self.inner.lock().last_by_job.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(job_id: &str, kind: EventKind) -> ExecutionEvent {
        ExecutionEvent::new(job_id, kind, "test", Duration::from_millis(5))
    }

    #[test]
    fn test_counters_track_failures() {
        let recorder = EventRecorder::new(10);
        recorder.record(event("a", EventKind::Success));
        recorder.record(event("a", EventKind::Failure));
        recorder.record(event("b", EventKind::ForcedFailure));

        let counters = recorder.counters();
        assert_eq!(counters.total_executions, 3);
        assert_eq!(counters.total_failures, 2);
        assert!(counters.total_failures <= counters.total_executions);
    }

    #[test]
    fn test_skipped_overlap_not_counted_as_execution() {
        let recorder = EventRecorder::new(10);
        recorder.record(event("a", EventKind::SkippedOverlap));

        assert_eq!(recorder.counters().total_executions, 0);
        assert_eq!(recorder.len(), 1);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let recorder = EventRecorder::new(3);
        for i in 0..5 {
            recorder.record(event(&format!("job{}", i), EventKind::Success));
        }

        assert_eq!(recorder.len(), 3);
        let events = recorder.tail(10);
        assert_eq!(events[0].job_id, "job2");
        assert_eq!(events[2].job_id, "job4");
        // counters are unaffected by eviction
        assert_eq!(recorder.counters().total_executions, 5);
    }

    #[test]
    fn test_last_by_job_points_at_latest() {
        let recorder = EventRecorder::new(10);
        recorder.record(event("a", EventKind::Success));
        recorder.record(event("a", EventKind::Failure));

        let last = recorder.last_event_for("a").unwrap();
        assert_eq!(last.kind, EventKind::Failure);
        assert!(recorder.last_event_for("missing").is_none());
    }

    #[test]
    fn test_message_truncation() {
        let long = "x".repeat(2 * MAX_MESSAGE_LEN);
        let event = ExecutionEvent::failure("a", long, Duration::ZERO);
        assert!(event.message.len() <= MAX_MESSAGE_LEN);
    }

    #[test]
    fn test_recent_count_window() {
        let recorder = EventRecorder::new(10);
        for _ in 0..6 {
            recorder.record(event("a", EventKind::Success));
        }
        assert_eq!(recorder.recent(RecentWindow::Count(4)).len(), 4);
        assert_eq!(recorder.recent(RecentWindow::Count(100)).len(), 6);
    }

    #[test]
    fn test_resume_restores_counters() {
        let recorder = EventRecorder::new(10);
        recorder.record(event("a", EventKind::Failure));
        let counters = recorder.counters();
        let history = recorder.tail(10);
        let last = recorder.last_by_job();

        let resumed = EventRecorder::resume(10, counters, history, last);
        assert_eq!(resumed.counters(), counters);
        assert_eq!(resumed.len(), 1);
        assert!(resumed.last_event_for("a").is_some());
    }
}
