//! Scheduler error types

use thiserror::Error;

pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("job already registered: {0}")]
    DuplicateJob(String),

    #[error("unknown job: {0}")]
    UnknownJob(String),

    #[error("scheduler is already running")]
    AlreadyRunning,

    #[error("scheduler is not running")]
    NotRunning,

    #[error("invalid trigger: {0}")]
    InvalidTrigger(String),

    #[error("scheduler configuration error: {0}")]
    Configuration(String),

    #[error("internal scheduler error: {0}")]
    Internal(String),
}
