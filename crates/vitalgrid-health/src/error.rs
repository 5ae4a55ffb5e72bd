//! Health engine error types.

use thiserror::Error;

use vital_core::CoreError;
use vitalgrid_scheduler::SchedulerError;

/// Errors returned by registry, executor and engine operations.
///
/// Probe faults are never reported here; they become results.
#[derive(Debug, Error)]
pub enum HealthError {
    #[error("probe not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("core error: {0}")]
    Core(CoreError),
}

impl From<CoreError> for HealthError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidArgument(msg) => HealthError::InvalidArgument(msg),
            other => HealthError::Core(other),
        }
    }
}

pub type HealthResult<T> = Result<T, HealthError>;
