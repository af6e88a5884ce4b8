//! DRS placement — health scoring, affinity rules, recommendations.
//!
//! This crate decides WHAT should move. It never talks to the
//! hypervisor layer and never changes lock state; the orchestrator
//! executes the plans produced here.
//!
//! # Components
//!
//! - **`scorer`** — Cluster balance score and dominant dimension
//! - **`rules`** — Affinity / anti-affinity evaluation for one placement
//! - **`recommender`** — Drain and rebalance recommendations

pub mod recommender;
pub mod rules;
pub mod scorer;

pub use recommender::recommend;
pub use rules::{PlacementContext, RuleVerdict, evaluate_placement};
pub use scorer::{Dimension, HealthScore, score_cluster};
