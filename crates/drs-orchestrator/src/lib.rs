//! drs-orchestrator — executes approved migrations.
//!
//! Turns approved recommendations into tracked `MigrationJob`s and drives
//! them through the hypervisor's migration API:
//!
//! - Admits move units atomically against the concurrency ceiling
//! - Locks each workload while it has a non-terminal job
//! - Retries transient failures, never permanent ones
//! - Cancels jobs on operator request or when a referenced node goes offline
//!
//! # Architecture
//!
//! ```text
//! Orchestrator
//!   ├── MigrationApi (start / poll / cancel)
//!   ├── Mutex<state>
//!   │     ├── active jobs + per-job cancel channel
//!   │     ├── lock table (workload → job)
//!   │     └── bounded terminal history
//!   └── one tokio task per job
//! ```

pub mod error;
pub mod migration;
pub mod orchestrator;

pub use error::{OrchestratorError, OrchestratorResult};
pub use migration::{
    DryRunMigrationApi, MigrationApi, MigrationError, MigrationHandle, MigrationStatus, RetryPolicy,
};
pub use orchestrator::{JobOutcome, Orchestrator, OrchestratorConfig};
