//! drs-controller — the DRS control loop.
//!
//! Wires the placement crate and the orchestrator into one tick per
//! cluster and exposes the query/command surface used by the REST API.
//!
//! # Architecture
//!
//! ```text
//! Drs
//!   └── per cluster: ClusterController (own tokio task)
//!         ├── SnapshotSource / RuleStore / SettingsStore
//!         ├── score_cluster + recommend   (drs-placement)
//!         ├── apply_mode                  (mode gate)
//!         ├── Orchestrator                (drs-orchestrator)
//!         └── ClusterHandle               (status, recommendations, approve, reject, jobs, cancel)
//! ```

pub mod cluster;
pub mod error;
pub mod mode;
pub mod scheduler;
pub mod sources;

pub use cluster::{ClusterController, ClusterHandle, ClusterStatus, TickReport};
pub use drs_placement::Dimension;
pub use error::{ControllerError, ControllerResult};
pub use mode::{Approvals, GateDecision, apply_mode};
pub use scheduler::Drs;
pub use sources::{
    FileSource, MemorySource, RuleStore, SettingsStore, SnapshotSource, SourceError, SourceResult,
};
