//! drs-core — shared types for the distributed resource scheduler.
//!
//! Holds the snapshot model, rule and settings types, recommendation and
//! migration job records, and the daemon configuration file format.

pub mod config;
pub mod error;
pub mod snapshot;
pub mod types;
pub mod validate;

use std::time::{SystemTime, UNIX_EPOCH};

pub use config::DaemonConfig;
pub use error::{CoreError, CoreResult};
pub use types::*;
pub use validate::validate_rules;

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
