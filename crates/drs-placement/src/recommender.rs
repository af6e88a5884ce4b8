//! Recommendation engine — proposes migrations that reduce imbalance.
//!
//! Given a snapshot, the settings, and the rule set, the engine decides:
//! 1. Which workloads must leave nodes in maintenance (drain pass)
//! 2. Whether the cluster is imbalanced enough to act on (threshold gate)
//! 3. Which moves from overloaded to underloaded nodes improve the score
//!    most without breaking a `must` rule (rebalance pass)
//!
//! Workloads tied together by a `must` co-location affinity rule on the
//! same node form a move unit and are always proposed to the same target.
//! The engine is pure: it reads the snapshot and never touches lock state.

use std::cmp::Ordering;
use std::collections::{HashSet, VecDeque};

use tracing::{debug, warn};

use drs_core::{
    AffinityRule, ClusterSnapshot, DrsSettings, NodeMetrics, NodeStatus, Recommendation,
    RecommendationStatus, RuleKind, Strictness, TargetSelector, Workload,
};

use crate::rules::{PlacementContext, evaluate_placement};
use crate::scorer::{Dimension, score_cluster};

/// Workloads that have to move together.
#[derive(Debug, Clone)]
struct MoveUnit<'a> {
    members: Vec<&'a Workload>,
    source: &'a str,
    /// Rules binding the members together.
    binding_rules: Vec<String>,
}

impl MoveUnit<'_> {
    fn cpu(&self) -> f64 {
        self.members.iter().map(|w| w.cpu_weight).sum()
    }

    fn mem(&self) -> f64 {
        self.members.iter().map(|w| w.mem_weight).sum()
    }

    fn weight(&self) -> f64 {
        self.members.iter().map(|w| w.resource_weight()).sum()
    }

    fn lead_id(&self) -> &str {
        self.members.first().map_or("", |w| w.id.as_str())
    }

    fn is_locked(&self) -> bool {
        self.members.iter().any(|w| w.locked)
    }
}

/// A feasible relocation of one unit.
#[derive(Debug, Clone)]
struct Candidate<'a> {
    unit: MoveUnit<'a>,
    target: String,
    before: f64,
    after: f64,
    penalty: f64,
    soft_violations: Vec<String>,
}

impl Candidate<'_> {
    fn delta(&self) -> f64 {
        self.after - self.before
    }

    fn rank_value(&self) -> f64 {
        self.delta() - self.penalty
    }
}

/// Ranking order: best rank value first, then lighter units, then ids.
fn rank(a: &Candidate<'_>, b: &Candidate<'_>) -> Ordering {
    b.rank_value()
        .total_cmp(&a.rank_value())
        .then_with(|| a.unit.weight().total_cmp(&b.unit.weight()))
        .then_with(|| a.unit.lead_id().cmp(b.unit.lead_id()))
        .then_with(|| a.target.cmp(&b.target))
}

/// Why a unit is being moved.
#[derive(Debug, Clone, Copy)]
enum Pass {
    /// Leaving a node in maintenance.
    Drain,
    /// Source load on the dominant dimension against the eligible mean,
    /// as seen when the move was picked.
    Rebalance { dominant: Dimension, load: f64, mean: f64 },
}

/// Produce the ranked recommendations for one snapshot.
///
/// Maintenance drains come first, then rebalancing moves by predicted
/// benefit. Moves are picked one at a time against a working snapshot
/// that already holds every earlier pick. The list is capped at
/// `settings.max_recommendations`; a move unit is never split across the
/// cap.
pub fn recommend(
    snapshot: &ClusterSnapshot,
    settings: &DrsSettings,
    rules: &[AffinityRule],
) -> Vec<Recommendation> {
    let limit = settings.max_recommendations as usize;
    let mut working = snapshot.clone();
    let mut placed: HashSet<String> = HashSet::new();
    let mut chosen: Vec<(Candidate<'_>, Pass)> = Vec::new();

    if settings.drain_maintenance {
        for candidate in drain_candidates(snapshot, &mut working, settings, rules) {
            placed.extend(candidate.unit.members.iter().map(|w| w.id.clone()));
            chosen.push((candidate, Pass::Drain));
        }
    }

    let base = score_cluster(snapshot, &settings.scoring);
    if base.score >= settings.imbalance_threshold {
        debug!(
            cluster = %snapshot.cluster_id,
            score = base.score,
            threshold = settings.imbalance_threshold,
            "cluster balanced, no rebalancing"
        );
    } else {
        let mut picked: usize = chosen.iter().map(|(c, _)| c.unit.members.len()).sum();
        while picked < limit {
            let Some((best, pass)) = best_rebalance(snapshot, &working, settings, rules, &placed) else {
                break;
            };
            working = apply(&working, &best);
            placed.extend(best.unit.members.iter().map(|w| w.id.clone()));
            picked += best.unit.members.len();
            chosen.push((best, pass));
        }
    }

    let mut out = Vec::new();
    for (candidate, pass) in chosen {
        if out.len() + candidate.unit.members.len() > limit {
            debug!(
                cluster = %snapshot.cluster_id,
                workload = candidate.unit.lead_id(),
                limit,
                "recommendation cap reached"
            );
            break;
        }
        out.extend(to_recommendations(&candidate, pass));
    }
    out
}

/// The snapshot after `candidate` has been carried out.
fn apply(working: &ClusterSnapshot, candidate: &Candidate<'_>) -> ClusterSnapshot {
    let moves: Vec<(&str, &str)> = candidate
        .unit
        .members
        .iter()
        .map(|w| (w.id.as_str(), candidate.target.as_str()))
        .collect();
    working.with_moves(&moves)
}

// ── Drain pass ───────────────────────────────────────────────────

/// Relocate every unlocked unit off maintenance nodes.
///
/// Each chosen drain is applied to `working`, so the next unit sees the
/// load and placement of the ones before it.
fn drain_candidates<'a>(
    snapshot: &'a ClusterSnapshot,
    working: &mut ClusterSnapshot,
    settings: &DrsSettings,
    rules: &'a [AffinityRule],
) -> Vec<Candidate<'a>> {
    let mut out = Vec::new();

    for node in snapshot.nodes.iter().filter(|n| n.status == NodeStatus::Maintenance) {
        for unit in move_units(snapshot, &node.node_id, rules) {
            if unit.is_locked() {
                debug!(node = %node.node_id, workload = unit.lead_id(), "unit locked, drain deferred");
                continue;
            }

            let before = score_cluster(working, &settings.scoring).score;
            let mut options: Vec<Candidate<'a>> = working
                .eligible_nodes()
                .filter_map(|target| evaluate_move(working, settings, rules, &unit, target, before))
                .collect();
            options.sort_by(rank);

            match options.into_iter().next() {
                Some(best) => {
                    *working = apply(working, &best);
                    out.push(best);
                }
                None => {
                    warn!(
                        cluster = %snapshot.cluster_id,
                        node = %node.node_id,
                        workload = unit.lead_id(),
                        "no feasible target to drain workload off maintenance node"
                    );
                }
            }
        }
    }

    out
}

// ── Rebalance pass ───────────────────────────────────────────────

/// Best single rebalancing move on top of `working`, if any clears
/// `min_improvement_pct`.
///
/// Units are formed from the feed's placement; a unit with a member
/// already in `placed` has been moved this tick and is skipped.
fn best_rebalance<'a>(
    snapshot: &'a ClusterSnapshot,
    working: &ClusterSnapshot,
    settings: &DrsSettings,
    rules: &'a [AffinityRule],
    placed: &HashSet<String>,
) -> Option<(Candidate<'a>, Pass)> {
    let current = score_cluster(working, &settings.scoring);
    let load: fn(&NodeMetrics) -> f64 = match current.dominant {
        Dimension::Cpu => |n: &NodeMetrics| n.cpu_pct,
        Dimension::Memory => |n: &NodeMetrics| n.mem_pct,
        Dimension::None => return None,
    };

    let eligible: Vec<&NodeMetrics> = working.eligible_nodes().collect();
    if eligible.len() < 2 {
        return None;
    }
    let mean = eligible.iter().map(|n| load(n)).sum::<f64>() / eligible.len() as f64;
    let underloaded: Vec<&NodeMetrics> = eligible.iter().copied().filter(|n| load(n) < mean).collect();

    let mut best: Option<(Candidate<'a>, Pass)> = None;
    for source in eligible.iter().copied().filter(|n| load(n) > mean) {
        let Some(origin) = snapshot.node(&source.node_id) else {
            continue;
        };
        for unit in move_units(snapshot, &origin.node_id, rules) {
            if unit.is_locked() || unit.members.iter().any(|w| placed.contains(&w.id)) {
                continue;
            }
            for target in &underloaded {
                let Some(candidate) = evaluate_move(working, settings, rules, &unit, target, current.score) else {
                    continue;
                };
                if candidate.delta() < settings.min_improvement_pct || candidate.delta() <= 0.0 {
                    debug!(
                        workload = candidate.unit.lead_id(),
                        target = %candidate.target,
                        delta = candidate.delta(),
                        min = settings.min_improvement_pct,
                        "candidate below minimum improvement"
                    );
                    continue;
                }
                if best.as_ref().is_none_or(|(b, _)| rank(&candidate, b) == Ordering::Less) {
                    let pass = Pass::Rebalance {
                        dominant: current.dominant,
                        load: load(source),
                        mean,
                    };
                    best = Some((candidate, pass));
                }
            }
        }
    }

    best
}

// ── Shared helpers ───────────────────────────────────────────────

/// Simulate moving `unit` onto `target`; `None` when infeasible.
fn evaluate_move<'a>(
    snapshot: &ClusterSnapshot,
    settings: &DrsSettings,
    rules: &[AffinityRule],
    unit: &MoveUnit<'a>,
    target: &NodeMetrics,
    before: f64,
) -> Option<Candidate<'a>> {
    if target.node_id == unit.source || target.status != NodeStatus::Online {
        return None;
    }
    if target.cpu_pct + unit.cpu() > 100.0 || target.mem_pct + unit.mem() > 100.0 {
        debug!(workload = unit.lead_id(), target = %target.node_id, "insufficient headroom on target");
        return None;
    }

    let mut assignment = snapshot.assignment();
    for member in &unit.members {
        assignment.insert(member.id.clone(), target.node_id.clone());
    }
    let ctx = PlacementContext {
        workloads: &snapshot.workloads,
        assignment: &assignment,
        nodes: &snapshot.nodes,
    };

    let mut penalty = 0.0;
    let mut soft_violations = Vec::new();
    for member in &unit.members {
        let verdict = evaluate_placement(&member.id, &target.node_id, rules, &ctx, settings.should_penalty);
        if !verdict.allowed {
            debug!(
                workload = %member.id,
                target = %target.node_id,
                rule = verdict.violated_rule.as_deref().unwrap_or(""),
                "candidate violates must rule"
            );
            return None;
        }
        penalty += verdict.penalty;
        for rule in verdict.soft_violations {
            if !soft_violations.contains(&rule) {
                soft_violations.push(rule);
            }
        }
    }

    let moves: Vec<(&str, &str)> = unit
        .members
        .iter()
        .map(|w| (w.id.as_str(), target.node_id.as_str()))
        .collect();
    let after = score_cluster(&snapshot.with_moves(&moves), &settings.scoring).score;

    Some(Candidate {
        unit: unit.clone(),
        target: target.node_id.clone(),
        before,
        after,
        penalty,
        soft_violations,
    })
}

/// Group the workloads on `node_id` into units bound by `must`
/// co-location affinity rules. Members are ordered by id.
fn move_units<'a>(
    snapshot: &'a ClusterSnapshot,
    node_id: &'a str,
    rules: &'a [AffinityRule],
) -> Vec<MoveUnit<'a>> {
    let binding: Vec<&AffinityRule> = rules
        .iter()
        .filter(|r| {
            r.enabled
                && r.kind == RuleKind::Affinity
                && r.strictness == Strictness::Must
                && r.target == TargetSelector::CoLocated
        })
        .collect();

    let mut on_node: Vec<&Workload> = snapshot.workloads_on(node_id).collect();
    on_node.sort_by(|a, b| a.id.cmp(&b.id));

    let mut visited: HashSet<&str> = HashSet::new();
    let mut units = Vec::new();

    for start in &on_node {
        if !visited.insert(start.id.as_str()) {
            continue;
        }
        let mut members = vec![*start];
        let mut binding_rules = Vec::new();
        let mut queue = VecDeque::from([*start]);

        while let Some(current) = queue.pop_front() {
            for rule in binding.iter().filter(|r| r.subject.matches(current)) {
                for peer in on_node.iter().filter(|w| rule.subject.matches(w)) {
                    if visited.insert(peer.id.as_str()) {
                        members.push(*peer);
                        queue.push_back(*peer);
                        if !binding_rules.contains(&rule.id) {
                            binding_rules.push(rule.id.clone());
                        }
                    }
                }
            }
        }

        members.sort_by(|a, b| a.id.cmp(&b.id));
        units.push(MoveUnit {
            members,
            source: node_id,
            binding_rules,
        });
    }

    units
}

fn to_recommendations(candidate: &Candidate<'_>, pass: Pass) -> Vec<Recommendation> {
    let unit = &candidate.unit;
    let group = (unit.members.len() > 1).then(|| format!("group:{}", unit.lead_id()));

    let mut reasons = Vec::new();
    match pass {
        Pass::Drain => reasons.push(format!("node {} is in maintenance", unit.source)),
        Pass::Rebalance { dominant, load, mean } => {
            let label = if dominant == Dimension::Memory { "memory" } else { "cpu" };
            reasons.push(format!(
                "{label} imbalance: {} at {load:.1}% vs cluster mean {mean:.1}%",
                unit.source
            ));
        }
    }
    reasons.push(format!(
        "projected score {:.1} -> {:.1} ({:+.1})",
        candidate.before,
        candidate.after,
        candidate.delta()
    ));
    if !unit.binding_rules.is_empty() {
        let peers: Vec<&str> = unit.members.iter().map(|w| w.id.as_str()).collect();
        reasons.push(format!(
            "moves together with [{}] under must affinity rule(s) {}",
            peers.join(", "),
            unit.binding_rules.join(", ")
        ));
    }
    for rule in &candidate.soft_violations {
        reasons.push(format!("violates should rule {rule}"));
    }

    unit.members
        .iter()
        .map(|w| Recommendation {
            id: Recommendation::id_for(&w.id, unit.source, &candidate.target),
            workload_id: w.id.clone(),
            source_node: unit.source.to_string(),
            target_node: candidate.target.clone(),
            predicted_score_delta: candidate.delta(),
            reasons: reasons.clone(),
            status: RecommendationStatus::Proposed,
            group: group.clone(),
        })
        .collect()
}
