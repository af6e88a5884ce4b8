//! Orchestrator error types.

use thiserror::Error;

/// Errors returned when admitting or controlling migration jobs.
#[derive(Debug, Error, PartialEq)]
pub enum OrchestratorError {
    #[error("workload already has an in-flight migration: {0}")]
    WorkloadLocked(String),

    #[error("workload appears twice in one move unit: {0}")]
    DuplicateWorkload(String),

    #[error("concurrency limit reached: {in_flight} in flight, limit {limit}")]
    ConcurrencyLimit { in_flight: u32, limit: u32 },

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("empty move unit")]
    EmptyUnit,
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
