//! Error types for core validation.

use thiserror::Error;

/// Errors raised while validating externally supplied data.
#[derive(Debug, Error, PartialEq)]
pub enum CoreError {
    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("invalid rule {id}: {reason}")]
    InvalidRule { id: String, reason: String },
}

pub type CoreResult<T> = Result<T, CoreError>;
