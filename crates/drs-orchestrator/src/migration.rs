//! Migration API boundary.
//!
//! The DRS never implements the live-migration protocol itself. It calls
//! out through [`MigrationApi`], which the hypervisor integration
//! provides. [`DryRunMigrationApi`] is the built-in stand-in that logs
//! each migration and reports success after a fixed number of polls.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

/// Opaque reference to a migration started on the hypervisor layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MigrationHandle(pub String);

impl std::fmt::Display for MigrationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Progress of one migration attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum MigrationStatus {
    Running,
    Succeeded,
    Failed(MigrationError),
}

/// Why a migration attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MigrationError {
    #[error("node unreachable: {0}")]
    Unreachable(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("timeout")]
    Timeout,

    #[error("insufficient resources on target: {0}")]
    InsufficientResources(String),

    #[error("incompatible target: {0}")]
    IncompatibleTarget(String),

    #[error("rule violation: {0}")]
    RuleViolation(String),

    #[error("{0}")]
    Other(String),
}

impl MigrationError {
    /// Stable classification key used by [`RetryPolicy`].
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unreachable(_) => "unreachable",
            Self::Network(_) => "network",
            Self::Timeout => "timeout",
            Self::InsufficientResources(_) => "insufficient_resources",
            Self::IncompatibleTarget(_) => "incompatible_target",
            Self::RuleViolation(_) => "rule_violation",
            Self::Other(_) => "unknown",
        }
    }
}

/// Which failure kinds are worth another attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    transient: HashSet<String>,
}

impl RetryPolicy {
    /// Policy that treats exactly `kinds` as transient.
    pub fn with_transient<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            transient: kinds.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_transient(&self, err: &MigrationError) -> bool {
        self.transient.contains(err.kind())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_transient(["unreachable", "network", "timeout"])
    }
}

/// Hypervisor-side live migration.
#[async_trait]
pub trait MigrationApi: Send + Sync {
    async fn start_migration(
        &self,
        workload_id: &str,
        source: &str,
        target: &str,
    ) -> Result<MigrationHandle, MigrationError>;

    async fn poll(&self, handle: &MigrationHandle) -> MigrationStatus;

    async fn cancel(&self, handle: &MigrationHandle) -> Result<(), MigrationError>;
}

// ── Dry run ──────────────────────────────────────────────────────

/// Migration API that moves nothing.
///
/// Every migration succeeds on the `polls_to_complete`-th poll.
pub struct DryRunMigrationApi {
    polls_to_complete: u32,
    next_id: AtomicU64,
    /// handle → polls seen so far.
    inflight: Mutex<HashMap<MigrationHandle, u32>>,
}

impl DryRunMigrationApi {
    pub fn new(polls_to_complete: u32) -> Self {
        Self {
            polls_to_complete: polls_to_complete.max(1),
            next_id: AtomicU64::new(1),
            inflight: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl MigrationApi for DryRunMigrationApi {
    async fn start_migration(
        &self,
        workload_id: &str,
        source: &str,
        target: &str,
    ) -> Result<MigrationHandle, MigrationError> {
        let seq = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = MigrationHandle(format!("dry-run-{seq}"));
        info!(workload = %workload_id, %source, %target, %handle, "dry-run migration started");
        self.inflight.lock().await.insert(handle.clone(), 0);
        Ok(handle)
    }

    async fn poll(&self, handle: &MigrationHandle) -> MigrationStatus {
        let mut inflight = self.inflight.lock().await;
        let Some(polls) = inflight.get_mut(handle) else {
            return MigrationStatus::Failed(MigrationError::Other(format!("unknown handle {handle}")));
        };
        *polls += 1;
        if *polls >= self.polls_to_complete {
            inflight.remove(handle);
            info!(%handle, "dry-run migration completed");
            MigrationStatus::Succeeded
        } else {
            MigrationStatus::Running
        }
    }

    async fn cancel(&self, handle: &MigrationHandle) -> Result<(), MigrationError> {
        if self.inflight.lock().await.remove(handle).is_some() {
            info!(%handle, "dry-run migration cancelled");
        }
        Ok(())
    }
}
