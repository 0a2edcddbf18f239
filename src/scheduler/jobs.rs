//! Job definitions and trigger model

use super::error::{SchedulerError, SchedulerResult};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveTime, TimeZone};
use chrono_tz::Tz;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one executor run: a summary message either way.
pub type JobOutcome = Result<String, String>;

type ExecutorFn =
    dyn Fn() -> Pin<Box<dyn Future<Output = JobOutcome> + Send>> + Send + Sync;

/// Which start-mode group a job belongs to
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display,
)]
#[strum(serialize_all = "snake_case")]
pub enum JobGroup {
    /// Periodic news collection
    Collection,
    /// Periodic AI analysis
    Analysis,
    /// Scheduled email reports
    Email,
    /// Collect + analyze + mail as one unit
    FullPipeline,
    /// Multi-slot time-windowed collection strategy
    Strategy,
    /// Nightly maintenance
    Maintenance,
}

/// The rule determining when a job fires
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Every fixed duration from scheduler start
    Interval(Duration),
    /// Once per day at a local time
    DailyAt(NaiveTime),
    /// Sub-interval restricted to a time-of-day window
    Windowed {
        start: NaiveTime,
        end: NaiveTime,
        every: Duration,
    },
    /// Cron expression (seconds field first)
    Cron(cron::Schedule),
}

impl Trigger {
    /// Parse a cron expression into a trigger.
    pub fn cron(expr: &str) -> SchedulerResult<Self> {
        cron::Schedule::from_str(expr)
            .map(Trigger::Cron)
            .map_err(|e| SchedulerError::InvalidTrigger(format!("{expr}: {e}")))
    }

    /// Validate invariants that cannot be encoded in the type.
    pub fn validate(&self) -> SchedulerResult<()> {
        match self {
            Trigger::Interval(d) => {
                if d.is_zero() {
                    return Err(SchedulerError::InvalidTrigger(
                        "interval must be non-zero".to_string(),
                    ));
                }
            }
            Trigger::Windowed { start, end, every } => {
                if start >= end {
                    return Err(SchedulerError::InvalidTrigger(format!(
                        "window start {start} must precede end {end}"
                    )));
                }
                if every.is_zero() {
                    return Err(SchedulerError::InvalidTrigger(
                        "window interval must be non-zero".to_string(),
                    ));
                }
            }
            Trigger::DailyAt(_) | Trigger::Cron(_) => {}
        }
        Ok(())
    }

    /// Next wall-clock fire time strictly after `after`.
    ///
    /// Calendar triggers are computed forward from `after`, so a scheduled
    /// time that already passed before a process restart is simply waited
    /// out until its next occurrence, never fired retroactively.
    pub fn next_fire(&self, after: DateTime<Tz>) -> Option<DateTime<Tz>> {
        match self {
            Trigger::Interval(d) => {
                let d = ChronoDuration::from_std(*d).ok()?;
                after.checked_add_signed(d)
            }
            Trigger::DailyAt(t) => {
                let today = at_time(after.date_naive(), *t, after.timezone())?;
                if today > after {
                    Some(today)
                } else {
                    at_time(after.date_naive().succ_opt()?, *t, after.timezone())
                }
            }
            Trigger::Windowed { start, end, every } => {
                let every = ChronoDuration::from_std(*every).ok()?;
                let candidate = after.checked_add_signed(every)?;
                let t = candidate.time();
                if t < *start {
                    at_time(candidate.date_naive(), *start, after.timezone())
                } else if t > *end {
                    at_time(candidate.date_naive().succ_opt()?, *start, after.timezone())
                } else {
                    Some(candidate)
                }
            }
            Trigger::Cron(schedule) => schedule.after(&after).next(),
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Interval(d) => write!(f, "every {}s", d.as_secs()),
            Trigger::DailyAt(t) => write!(f, "daily at {}", t.format("%H:%M")),
            Trigger::Windowed { start, end, every } => write!(
                f,
                "every {}s between {} and {}",
                every.as_secs(),
                start.format("%H:%M"),
                end.format("%H:%M"),
            ),
            Trigger::Cron(schedule) => write!(f, "cron {}", schedule),
        }
    }
}

fn at_time(date: NaiveDate, time: NaiveTime, tz: Tz) -> Option<DateTime<Tz>> {
    // DST gaps can make a local time nonexistent; take the earliest valid
    // instant in that case.
    match tz.from_local_datetime(&date.and_time(time)) {
        chrono::LocalResult::Single(dt) => Some(dt),
        chrono::LocalResult::Ambiguous(earliest, _) => Some(earliest),
        chrono::LocalResult::None => tz
            .from_local_datetime(&date.and_time(time).checked_add_signed(ChronoDuration::hours(1))?)
            .earliest(),
    }
}

/// A named, schedulable unit of work
///
/// The trigger is immutable after registration; the executor is an async
/// callback into the external collaborators (collector, analyzer, mailer).
#[derive(Clone)]
pub struct JobUnit {
    pub id: String,
    pub name: String,
    pub trigger: Trigger,
    pub group: JobGroup,
    /// Collaborator this job exercises, for health probes
    pub component: Option<String>,
    executor: Arc<ExecutorFn>,
}

impl JobUnit {
    pub fn new<F, Fut>(
        id: impl Into<String>,
        name: impl Into<String>,
        trigger: Trigger,
        group: JobGroup,
        executor: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobOutcome> + Send + 'static,
    {
        Self {
            id: id.into(),
            name: name.into(),
            trigger,
            group,
            component: None,
            executor: Arc::new(move || Box::pin(executor())),
        }
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    /// Invoke the executor. Callers wrap this in the monitored execution
    /// context; it is never awaited on the trigger-evaluation path.
    pub fn run(&self) -> Pin<Box<dyn Future<Output = JobOutcome> + Send>> {
        (self.executor)()
    }
}

impl fmt::Debug for JobUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobUnit")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("trigger", &self.trigger)
            .field("group", &self.group)
            .field("component", &self.component)
            .finish_non_exhaustive()
    }
}

/// Job-group selection passed to `start`
#[derive(Debug, Clone)]
pub struct StartOptions {
    pub collection: bool,
    pub analysis: bool,
    pub email: bool,
    pub full_pipeline: bool,
    pub enhanced_strategy: bool,
    pub maintenance: bool,
    /// Spawn the monitor loop alongside the jobs
    pub monitoring: bool,
}

impl StartOptions {
    /// Collection, analysis and email jobs (the default operating mode)
    pub fn standard() -> Self {
        Self {
            collection: true,
            analysis: true,
            email: true,
            full_pipeline: false,
            enhanced_strategy: false,
            maintenance: true,
            monitoring: true,
        }
    }

    pub fn collection_only() -> Self {
        Self {
            analysis: false,
            email: false,
            ..Self::standard()
        }
    }

    pub fn full_pipeline() -> Self {
        Self {
            collection: false,
            analysis: false,
            email: false,
            full_pipeline: true,
            ..Self::standard()
        }
    }

    pub fn enhanced_strategy() -> Self {
        Self {
            collection: false,
            analysis: false,
            email: false,
            enhanced_strategy: true,
            ..Self::standard()
        }
    }

    pub fn enables(&self, group: JobGroup) -> bool {
        match group {
            JobGroup::Collection => self.collection,
            JobGroup::Analysis => self.analysis,
            JobGroup::Email => self.email,
            JobGroup::FullPipeline => self.full_pipeline,
            JobGroup::Strategy => self.enhanced_strategy,
            JobGroup::Maintenance => self.maintenance,
        }
    }
}

impl Default for StartOptions {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn utc() -> Tz {
        chrono_tz::UTC
    }

    fn at(h: u32, m: u32) -> DateTime<Tz> {
        utc()
            .with_ymd_and_hms(2025, 6, 2, h, m, 0)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn test_interval_next_fire() {
        let trigger = Trigger::Interval(Duration::from_secs(300));
        let next = trigger.next_fire(at(10, 0)).unwrap();
        assert_eq!(next, at(10, 5));
    }

    #[test]
    fn test_daily_at_fires_later_today() {
        let trigger = Trigger::DailyAt(NaiveTime::from_hms_opt(8, 0, 0).unwrap());
        let next = trigger.next_fire(at(6, 30)).unwrap();
        assert_eq!(next, at(8, 0));
    }

    #[test]
    fn test_daily_at_never_fires_retroactively() {
        // Restart at 09:00 with a 08:00 job: it waits for tomorrow.
        let trigger = Trigger::DailyAt(NaiveTime::from_hms_opt(8, 0, 0).unwrap());
        let next = trigger.next_fire(at(9, 0)).unwrap();
        assert_eq!(next.date_naive(), at(9, 0).date_naive().succ_opt().unwrap());
        assert_eq!(next.hour(), 8);
    }

    #[test]
    fn test_windowed_fires_inside_window() {
        let trigger = Trigger::Windowed {
            start: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            every: Duration::from_secs(180),
        };
        let next = trigger.next_fire(at(10, 0)).unwrap();
        assert_eq!(next, at(10, 3));
    }

    #[test]
    fn test_windowed_clamps_to_window_start() {
        let trigger = Trigger::Windowed {
            start: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            every: Duration::from_secs(180),
        };
        // Before the window opens: first fire is at window start.
        let next = trigger.next_fire(at(5, 0)).unwrap();
        assert_eq!(next, at(8, 0));

        // After the window closes: next fire is tomorrow's window start.
        let next = trigger.next_fire(at(17, 0)).unwrap();
        assert_eq!(next.hour(), 8);
        assert_eq!(
            next.date_naive(),
            at(17, 0).date_naive().succ_opt().unwrap()
        );
    }

    #[test]
    fn test_cron_trigger_parses_and_fires() {
        let trigger = Trigger::cron("0 0 9,18 * * *").unwrap();
        let next = trigger.next_fire(at(10, 0)).unwrap();
        assert_eq!(next.hour(), 18);
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn test_invalid_cron_is_rejected() {
        assert!(matches!(
            Trigger::cron("not a cron"),
            Err(SchedulerError::InvalidTrigger(_))
        ));
    }

    #[test]
    fn test_validate_rejects_inverted_window() {
        let trigger = Trigger::Windowed {
            start: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            every: Duration::from_secs(60),
        };
        assert!(trigger.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        assert!(Trigger::Interval(Duration::ZERO).validate().is_err());
    }

    #[test]
    fn test_start_options_group_mapping() {
        let opts = StartOptions::collection_only();
        assert!(opts.enables(JobGroup::Collection));
        assert!(!opts.enables(JobGroup::Analysis));
        assert!(opts.enables(JobGroup::Maintenance));

        let opts = StartOptions::enhanced_strategy();
        assert!(opts.enables(JobGroup::Strategy));
        assert!(!opts.enables(JobGroup::Collection));
    }
}
