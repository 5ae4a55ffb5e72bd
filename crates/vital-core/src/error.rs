//! Error types shared by every vitalgrid crate.

use std::any::Any;

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while building core values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to read config: {0}")]
    ConfigRead(String),

    #[error("failed to parse config: {0}")]
    ConfigParse(String),
}

/// Validate a probe or aggregator name.
pub fn validate_name(name: &str) -> CoreResult<()> {
    if name.trim().is_empty() {
        return Err(CoreError::InvalidArgument("name must not be empty".to_string()));
    }
    Ok(())
}

/// Validate a single tag.
pub fn validate_tag(tag: &str) -> CoreResult<()> {
    if tag.trim().is_empty() {
        return Err(CoreError::InvalidArgument("tag must not be empty".to_string()));
    }
    Ok(())
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
