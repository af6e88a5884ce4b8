//! Controller error types.

use std::time::Duration;

use thiserror::Error;

use drs_core::CoreError;
use drs_orchestrator::OrchestratorError;

use crate::sources::SourceError;

/// Errors raised by a cluster's tick or by operator commands.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("inputs not fetched within {0:?}")]
    FetchTimeout(Duration),

    #[error("invalid input: {0}")]
    Invalid(#[from] CoreError),

    #[error("recommendation not found: {0}")]
    RecommendationNotFound(String),

    #[error("cluster {0} is in manual mode; approvals are not accepted")]
    ManualMode(String),

    #[error("orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),
}

pub type ControllerResult<T> = Result<T, ControllerError>;
