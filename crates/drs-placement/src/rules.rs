//! Affinity / anti-affinity rule evaluation.
//!
//! Decides whether placing a workload on a target node satisfies the
//! configured rules. Rules are evaluated in declaration order and the
//! first violated `must` rule short-circuits. `should` rules never block
//! a placement; each violation adds a ranking penalty instead.

use std::collections::HashMap;

use drs_core::{
    AffinityRule, NodeId, NodeMetrics, RuleKind, Strictness, TargetSelector, Workload, WorkloadId,
};

/// The placement state rules are evaluated against.
///
/// `assignment` may be hypothetical: the recommender passes the
/// assignment as it would look with the rest of a move unit already
/// relocated.
#[derive(Debug, Clone, Copy)]
pub struct PlacementContext<'a> {
    pub workloads: &'a [Workload],
    pub assignment: &'a HashMap<WorkloadId, NodeId>,
    pub nodes: &'a [NodeMetrics],
}

/// Result of evaluating one candidate placement.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleVerdict {
    pub allowed: bool,
    /// First violated `must` rule, when disallowed.
    pub violated_rule: Option<String>,
    /// `should` rules the placement violates, in declaration order.
    pub soft_violations: Vec<String>,
    /// Accumulated ranking penalty from `should` violations.
    pub penalty: f64,
}

impl RuleVerdict {
    fn allowed() -> Self {
        Self {
            allowed: true,
            violated_rule: None,
            soft_violations: Vec::new(),
            penalty: 0.0,
        }
    }
}

/// Evaluate placing `workload_id` on `target` against `rules`.
pub fn evaluate_placement(
    workload_id: &str,
    target: &str,
    rules: &[AffinityRule],
    ctx: &PlacementContext<'_>,
    should_penalty: f64,
) -> RuleVerdict {
    let mut verdict = RuleVerdict::allowed();
    let Some(workload) = ctx.workloads.iter().find(|w| w.id == workload_id) else {
        return verdict;
    };

    for rule in rules {
        if !rule.enabled || !rule.subject.matches(workload) {
            continue;
        }
        if !violates(rule, workload, target, ctx) {
            continue;
        }
        match rule.strictness {
            Strictness::Must => {
                verdict.allowed = false;
                verdict.violated_rule = Some(rule.id.clone());
                return verdict;
            }
            Strictness::Should => {
                verdict.soft_violations.push(rule.id.clone());
                verdict.penalty += should_penalty;
            }
        }
    }

    verdict
}

/// Whether placing `workload` on `target` breaks `rule`.
fn violates(rule: &AffinityRule, workload: &Workload, target: &str, ctx: &PlacementContext<'_>) -> bool {
    match &rule.target {
        TargetSelector::CoLocated => {
            let mut peer_nodes = ctx
                .workloads
                .iter()
                .filter(|w| w.id != workload.id && rule.subject.matches(w))
                .filter_map(|w| ctx.assignment.get(&w.id));

            match rule.kind {
                RuleKind::AntiAffinity => peer_nodes.any(|node| node == target),
                RuleKind::Affinity => {
                    let peers: Vec<&NodeId> = peer_nodes.collect();
                    !peers.is_empty() && !peers.iter().any(|node| *node == target)
                }
            }
        }
        TargetSelector::Nodes { ids } => {
            let in_set = ids.iter().any(|id| id == target);
            node_rule_violated(rule.kind, in_set)
        }
        TargetSelector::NodeGroup { group } => {
            let in_set = ctx
                .nodes
                .iter()
                .find(|n| n.node_id == target)
                .and_then(|n| n.group.as_deref())
                == Some(group.as_str());
            node_rule_violated(rule.kind, in_set)
        }
    }
}

fn node_rule_violated(kind: RuleKind, target_in_set: bool) -> bool {
    match kind {
        RuleKind::Affinity => !target_in_set,
        RuleKind::AntiAffinity => target_in_set,
    }
}
