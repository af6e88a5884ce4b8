//! Snapshot construction, normalization, and hypothetical moves.
//!
//! The feed hands us raw, possibly inconsistent data. `normalize` turns
//! it into the value the rest of the tick works from: counts clamped,
//! nodes that disappeared from the feed carried forward as offline (for
//! at most [`MISSING_NODE_GRACE_FEEDS`] feeds), and the orchestrator's
//! lock table overlaid onto the workloads.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::warn;

use crate::types::*;

/// Feeds a node may be absent from before it is treated as decommissioned.
pub const MISSING_NODE_GRACE_FEEDS: u32 = 3;

impl ClusterSnapshot {
    /// Build a snapshot and derive its summary.
    pub fn new(
        cluster_id: impl Into<ClusterId>,
        captured_at: u64,
        nodes: Vec<NodeMetrics>,
        workloads: Vec<Workload>,
    ) -> Self {
        let summary = SnapshotSummary::from_nodes(&nodes);
        Self {
            cluster_id: cluster_id.into(),
            captured_at,
            version: 0,
            nodes,
            workloads,
            summary,
            missing_feeds: BTreeMap::new(),
        }
    }

    /// Produce the normalized successor of a raw feed snapshot.
    ///
    /// `previous` is the last snapshot accepted for this cluster; nodes it
    /// knew about that are missing from the feed are inserted as offline
    /// so an unreported node is never silently ignored. A node absent for
    /// more than [`MISSING_NODE_GRACE_FEEDS`] consecutive feeds is dropped.
    pub fn normalize(
        self,
        previous: Option<&ClusterSnapshot>,
        locked: &HashSet<WorkloadId>,
    ) -> ClusterSnapshot {
        let cluster_id = self.cluster_id;
        let mut seen = HashSet::new();
        let mut nodes = Vec::with_capacity(self.nodes.len());
        let mut missing_feeds = BTreeMap::new();

        for mut node in self.nodes {
            if !seen.insert(node.node_id.clone()) {
                warn!(cluster = %cluster_id, node = %node.node_id, "duplicate node in feed, keeping first");
                continue;
            }
            if node.running_workload_count > node.workload_count {
                warn!(
                    cluster = %cluster_id,
                    node = %node.node_id,
                    running = node.running_workload_count,
                    total = node.workload_count,
                    "running workload count exceeds total, clamping"
                );
                node.running_workload_count = node.workload_count;
            }
            node.cpu_pct = sanitize_pct(node.cpu_pct);
            node.mem_pct = sanitize_pct(node.mem_pct);
            nodes.push(node);
        }

        if let Some(prev) = previous {
            for old in &prev.nodes {
                if seen.contains(&old.node_id) {
                    continue;
                }
                let missed = prev.missing_feeds.get(&old.node_id).copied().unwrap_or(0) + 1;
                if missed > MISSING_NODE_GRACE_FEEDS {
                    warn!(cluster = %cluster_id, node = %old.node_id, missed, "node missing from feed too long, dropping");
                    continue;
                }
                warn!(cluster = %cluster_id, node = %old.node_id, missed, "node missing from feed, treating as offline");
                seen.insert(old.node_id.clone());
                missing_feeds.insert(old.node_id.clone(), missed);
                nodes.push(NodeMetrics {
                    node_id: old.node_id.clone(),
                    status: NodeStatus::Offline,
                    cpu_pct: 0.0,
                    mem_pct: 0.0,
                    workload_count: old.workload_count,
                    running_workload_count: 0,
                    group: old.group.clone(),
                });
            }
        }

        let workloads = self
            .workloads
            .into_iter()
            .map(|mut w| {
                w.locked = locked.contains(&w.id);
                w
            })
            .collect();

        let version = previous.map_or(1, |p| p.version + 1);
        let mut snapshot = ClusterSnapshot::new(cluster_id, self.captured_at, nodes, workloads);
        snapshot.version = version;
        snapshot.missing_feeds = missing_feeds;
        snapshot
    }

    /// Look up a node by id.
    pub fn node(&self, node_id: &str) -> Option<&NodeMetrics> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }

    /// Look up a workload by id.
    pub fn workload(&self, workload_id: &str) -> Option<&Workload> {
        self.workloads.iter().find(|w| w.id == workload_id)
    }

    /// Nodes that count toward scoring and may receive workloads.
    pub fn eligible_nodes(&self) -> impl Iterator<Item = &NodeMetrics> {
        self.nodes.iter().filter(|n| n.status == NodeStatus::Online)
    }

    /// Workloads currently hosted on the node.
    pub fn workloads_on<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Workload> {
        self.workloads.iter().filter(move |w| w.current_node == node_id)
    }

    /// Current workload → node assignment.
    pub fn assignment(&self) -> HashMap<WorkloadId, NodeId> {
        self.workloads
            .iter()
            .map(|w| (w.id.clone(), w.current_node.clone()))
            .collect()
    }

    /// Ids of nodes whose status is offline.
    pub fn offline_nodes(&self) -> HashSet<&str> {
        self.nodes
            .iter()
            .filter(|n| n.status == NodeStatus::Offline)
            .map(|n| n.node_id.as_str())
            .collect()
    }

    /// Derive the snapshot that would result from relocating workloads.
    ///
    /// Each `(workload_id, target)` pair moves the workload's weights from
    /// its current node to `target`. Unknown workloads or nodes are skipped.
    pub fn with_moves(&self, moves: &[(&str, &str)]) -> ClusterSnapshot {
        let mut nodes = self.nodes.clone();
        let mut workloads = self.workloads.clone();

        for (workload_id, target) in moves {
            let Some(workload) = workloads.iter_mut().find(|w| w.id == *workload_id) else {
                continue;
            };
            if workload.current_node == *target {
                continue;
            }
            let Some(target_idx) = nodes.iter().position(|n| n.node_id == *target) else {
                continue;
            };
            if let Some(source) = nodes.iter_mut().find(|n| n.node_id == workload.current_node) {
                source.cpu_pct = (source.cpu_pct - workload.cpu_weight).max(0.0);
                source.mem_pct = (source.mem_pct - workload.mem_weight).max(0.0);
                source.workload_count = source.workload_count.saturating_sub(1);
                source.running_workload_count = source
                    .running_workload_count
                    .saturating_sub(1)
                    .min(source.workload_count);
            }
            let dest = &mut nodes[target_idx];
            dest.cpu_pct += workload.cpu_weight;
            dest.mem_pct += workload.mem_weight;
            dest.workload_count += 1;
            dest.running_workload_count += 1;
            workload.current_node = target.to_string();
        }

        let mut snapshot =
            ClusterSnapshot::new(self.cluster_id.clone(), self.captured_at, nodes, workloads);
        snapshot.version = self.version;
        snapshot.missing_feeds = self.missing_feeds.clone();
        snapshot
    }
}

impl SnapshotSummary {
    /// Derive totals from a node list.
    pub fn from_nodes(nodes: &[NodeMetrics]) -> Self {
        let online: Vec<&NodeMetrics> = nodes
            .iter()
            .filter(|n| n.status == NodeStatus::Online)
            .collect();
        let (avg_cpu_pct, avg_mem_pct) = if online.is_empty() {
            (0.0, 0.0)
        } else {
            let count = online.len() as f64;
            (
                online.iter().map(|n| n.cpu_pct).sum::<f64>() / count,
                online.iter().map(|n| n.mem_pct).sum::<f64>() / count,
            )
        };

        Self {
            total_nodes: nodes.len() as u32,
            online_nodes: online.len() as u32,
            total_workloads: nodes.iter().map(|n| n.workload_count).sum(),
            running_workloads: nodes.iter().map(|n| n.running_workload_count).sum(),
            avg_cpu_pct,
            avg_mem_pct,
        }
    }
}

/// Non-finite readings become 0; negative readings are floored at 0.
fn sanitize_pct(value: f64) -> f64 {
    if value.is_finite() { value.max(0.0) } else { 0.0 }
}
