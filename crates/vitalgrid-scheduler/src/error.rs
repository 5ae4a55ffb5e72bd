//! Scheduler error types.

use thiserror::Error;

use crate::pool::SchedulerState;

/// Errors that can occur during scheduling operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task rejected: scheduler is {state}")]
    Rejected { state: SchedulerState },

    #[error("already scheduled: {0}")]
    AlreadyScheduled(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("cron scheduling is not supported (expression: {0:?})")]
    CronUnsupported(String),

    #[error("failed to build worker runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

impl From<vital_core::CoreError> for SchedulerError {
    fn from(err: vital_core::CoreError) -> Self {
        match err {
            vital_core::CoreError::InvalidArgument(msg) => SchedulerError::InvalidArgument(msg),
            other => SchedulerError::InvalidArgument(other.to_string()),
        }
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
