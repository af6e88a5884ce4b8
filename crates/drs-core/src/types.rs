//! Domain types for the DRS.
//!
//! These types represent the resource snapshot fed in by the cluster
//! inventory, the rule set and settings read each tick, and the
//! recommendations and migration jobs the scheduler produces. All types
//! are serializable so they can be loaded from the file-backed stores
//! and returned from the REST API unchanged.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Unique identifier for a cluster.
pub type ClusterId = String;

/// Unique identifier for a node (hypervisor host) within a cluster.
pub type NodeId = String;

/// Unique identifier for a workload (VM / container).
pub type WorkloadId = String;

/// Unique identifier for a recommendation.
pub type RecommendationId = String;

/// Unique identifier for a migration job.
pub type JobId = String;

// ── Snapshot ──────────────────────────────────────────────────────

/// Immutable view of a cluster's resource state at one point in time.
///
/// A snapshot is never mutated after capture. Hypothetical snapshots
/// (used when simulating a move) are new values derived from an
/// existing one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterSnapshot {
    pub cluster_id: ClusterId,
    /// Unix timestamp (seconds) when the feed captured this state.
    pub captured_at: u64,
    /// Monotonic per-cluster version, assigned during normalization.
    #[serde(default)]
    pub version: u64,
    /// Nodes in feed order.
    pub nodes: Vec<NodeMetrics>,
    /// Workloads placed on the nodes above.
    #[serde(default)]
    pub workloads: Vec<Workload>,
    /// Derived totals. Recomputed on construction; ignored on input.
    #[serde(default)]
    pub summary: SnapshotSummary,
    /// Consecutive feeds each carried-forward node has been absent from.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub missing_feeds: BTreeMap<NodeId, u32>,
}

/// Per-node utilization as reported by the feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeMetrics {
    pub node_id: NodeId,
    pub status: NodeStatus,
    /// CPU utilization in percent (0-100).
    pub cpu_pct: f64,
    /// Memory utilization in percent (0-100).
    pub mem_pct: f64,
    pub workload_count: u32,
    pub running_workload_count: u32,
    /// Optional node-group label, matched by `TargetSelector::NodeGroup`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

/// Lifecycle status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Online,
    Offline,
    Maintenance,
}

/// Aggregates derived from the node list.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SnapshotSummary {
    pub total_nodes: u32,
    pub online_nodes: u32,
    pub total_workloads: u32,
    pub running_workloads: u32,
    /// Mean CPU% across online nodes (0 when none are online).
    pub avg_cpu_pct: f64,
    /// Mean memory% across online nodes (0 when none are online).
    pub avg_mem_pct: f64,
}

// ── Workload ──────────────────────────────────────────────────────

/// A relocatable unit of compute.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workload {
    pub id: WorkloadId,
    pub current_node: NodeId,
    /// CPU consumed, in percentage points of a node's capacity.
    pub cpu_weight: f64,
    /// Memory consumed, in percentage points of a node's capacity.
    pub mem_weight: f64,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<String>,
    /// True while a migration job owns this workload.
    #[serde(default)]
    pub locked: bool,
}

impl Workload {
    /// Combined resource weight, used to prefer moving smaller workloads.
    pub fn resource_weight(&self) -> f64 {
        self.cpu_weight + self.mem_weight
    }
}

// ── Rules ─────────────────────────────────────────────────────────

/// Placement constraint between workloads, or between workloads and nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AffinityRule {
    pub id: String,
    pub kind: RuleKind,
    pub strictness: Strictness,
    pub subject: SubjectSelector,
    pub target: TargetSelector,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Affinity,
    AntiAffinity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strictness {
    /// Hard constraint; never knowingly violated.
    Must,
    /// Soft constraint; only affects ranking.
    Should,
}

/// Which workloads a rule applies to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubjectSelector {
    Tag { tag: String },
    Pool { pool: String },
    Workloads { ids: Vec<WorkloadId> },
}

impl SubjectSelector {
    /// Whether the workload is a member of this selector.
    pub fn matches(&self, workload: &Workload) -> bool {
        match self {
            Self::Tag { tag } => workload.tags.contains(tag),
            Self::Pool { pool } => workload.pool.as_deref() == Some(pool.as_str()),
            Self::Workloads { ids } => ids.iter().any(|id| *id == workload.id),
        }
    }
}

/// Where the subject should (or should not) be placed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TargetSelector {
    Nodes { ids: Vec<NodeId> },
    NodeGroup { group: String },
    /// Relative to the other members of the subject selector.
    CoLocated,
}

// ── Settings ──────────────────────────────────────────────────────

/// Operator-selected autonomy level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrsMode {
    #[default]
    Manual,
    Partial,
    Automatic,
}

/// Per-cluster scheduler settings, read once per tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DrsSettings {
    #[serde(default)]
    pub mode: DrsMode,
    /// Score at or above which no rebalancing is done.
    #[serde(default = "default_imbalance_threshold")]
    pub imbalance_threshold: f64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_migrations: u32,
    /// Minimum score gain (in score points) required to justify a move.
    #[serde(default = "default_min_improvement")]
    pub min_improvement_pct: f64,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    #[serde(default)]
    pub scoring: ScoringConfig,
    /// Cap on the number of recommendations surfaced per tick.
    #[serde(default = "default_max_recommendations")]
    pub max_recommendations: u32,
    /// Relocate workloads off nodes in maintenance.
    #[serde(default = "default_true")]
    pub drain_maintenance: bool,
    /// Ranking penalty (score points) per violated `should` rule.
    #[serde(default = "default_should_penalty")]
    pub should_penalty: f64,
}

impl Default for DrsSettings {
    fn default() -> Self {
        Self {
            mode: DrsMode::default(),
            imbalance_threshold: default_imbalance_threshold(),
            max_concurrent_migrations: default_max_concurrent(),
            min_improvement_pct: default_min_improvement(),
            tick_interval_secs: default_tick_interval(),
            scoring: ScoringConfig::default(),
            max_recommendations: default_max_recommendations(),
            drain_maintenance: true,
            should_penalty: default_should_penalty(),
        }
    }
}

/// Weights and normalization for the health score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoringConfig {
    #[serde(default = "default_dimension_weight")]
    pub cpu_weight: f64,
    #[serde(default = "default_dimension_weight")]
    pub mem_weight: f64,
    /// Standard deviation (percentage points) treated as fully imbalanced.
    #[serde(default = "default_max_deviation")]
    pub max_deviation_pct: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            cpu_weight: default_dimension_weight(),
            mem_weight: default_dimension_weight(),
            max_deviation_pct: default_max_deviation(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_imbalance_threshold() -> f64 {
    70.0
}
fn default_max_concurrent() -> u32 {
    2
}
fn default_min_improvement() -> f64 {
    5.0
}
fn default_tick_interval() -> u64 {
    300
}
fn default_max_recommendations() -> u32 {
    16
}
fn default_should_penalty() -> f64 {
    5.0
}
fn default_dimension_weight() -> f64 {
    1.0
}
fn default_max_deviation() -> f64 {
    25.0
}

// ── Recommendation ────────────────────────────────────────────────

/// A proposed migration with its predicted benefit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    pub id: RecommendationId,
    pub workload_id: WorkloadId,
    pub source_node: NodeId,
    pub target_node: NodeId,
    /// Score after the move minus score before it.
    pub predicted_score_delta: f64,
    /// Contributing factors, most significant first.
    pub reasons: Vec<String>,
    pub status: RecommendationStatus,
    /// Set when several workloads must move together.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl Recommendation {
    /// Deterministic id for a move, stable across ticks.
    pub fn id_for(workload_id: &str, source: &str, target: &str) -> RecommendationId {
        format!("rec:{workload_id}:{source}:{target}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationStatus {
    Proposed,
    Approved,
    Rejected,
    Superseded,
}

// ── Migration job ─────────────────────────────────────────────────

/// Tracked execution of one approved recommendation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MigrationJob {
    pub id: JobId,
    pub recommendation_id: RecommendationId,
    pub workload_id: WorkloadId,
    pub source_node: NodeId,
    pub target_node: NodeId,
    pub state: JobState,
    pub attempt_count: u32,
    pub started_at: Option<u64>,
    pub ended_at: Option<u64>,
    pub error: Option<String>,
}

impl MigrationJob {
    /// Whether the job references the node as source or target.
    pub fn touches_node(&self, node_id: &str) -> bool {
        self.source_node == node_id || self.target_node == node_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workload(id: &str) -> Workload {
        Workload {
            id: id.to_string(),
            current_node: "n1".to_string(),
            cpu_weight: 10.0,
            mem_weight: 5.0,
            tags: BTreeSet::from(["web".to_string()]),
            pool: Some("frontend".to_string()),
            locked: false,
        }
    }

    #[test]
    fn subject_selector_matching() {
        let w = workload("vm-1");
        assert!(SubjectSelector::Tag { tag: "web".into() }.matches(&w));
        assert!(!SubjectSelector::Tag { tag: "db".into() }.matches(&w));
        assert!(SubjectSelector::Pool { pool: "frontend".into() }.matches(&w));
        assert!(SubjectSelector::Workloads { ids: vec!["vm-1".into()] }.matches(&w));
        assert!(!SubjectSelector::Workloads { ids: vec!["vm-2".into()] }.matches(&w));
    }

    #[test]
    fn settings_defaults_fill_missing_fields() {
        let settings: DrsSettings = toml::from_str("mode = \"automatic\"").unwrap();
        assert_eq!(settings.mode, DrsMode::Automatic);
        assert_eq!(settings.imbalance_threshold, 70.0);
        assert_eq!(settings.max_concurrent_migrations, 2);
        assert!(settings.drain_maintenance);
        assert_eq!(settings.scoring, ScoringConfig::default());
    }

    #[test]
    fn rule_parses_from_json() {
        let json = r#"{
            "id": "keep-web-together",
            "kind": "affinity",
            "strictness": "must",
            "subject": { "type": "tag", "tag": "web" },
            "target": { "type": "co_located" }
        }"#;
        let rule: AffinityRule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.kind, RuleKind::Affinity);
        assert_eq!(rule.target, TargetSelector::CoLocated);
        assert!(rule.enabled);
    }

    #[test]
    fn job_state_terminality() {
        assert!(!JobState::Queued.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
    }

    #[test]
    fn recommendation_ids_are_stable() {
        assert_eq!(
            Recommendation::id_for("vm-1", "n1", "n3"),
            "rec:vm-1:n1:n3"
        );
    }
}
