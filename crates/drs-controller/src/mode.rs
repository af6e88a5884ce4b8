//! Mode gate — decides which recommendations execute this tick.
//!
//! - **manual**: everything stays `proposed`
//! - **partial**: only ids the operator approved beforehand execute
//! - **automatic**: everything executes, up to the concurrency ceiling
//!
//! Operator rejections apply in every mode. Move units (recommendations
//! sharing a `group`) are gated as a whole: a unit executes only when
//! every member may, and counts all its members against the ceiling.

use std::collections::HashSet;

use drs_core::{DrsMode, DrsSettings, Recommendation, RecommendationId, RecommendationStatus};

/// Out-of-band operator decisions, keyed by recommendation id.
#[derive(Debug, Clone, Default)]
pub struct Approvals {
    approved: HashSet<RecommendationId>,
    rejected: HashSet<RecommendationId>,
}

impl Approvals {
    pub fn approve(&mut self, id: &str) {
        self.rejected.remove(id);
        self.approved.insert(id.to_string());
    }

    pub fn reject(&mut self, id: &str) {
        self.approved.remove(id);
        self.rejected.insert(id.to_string());
    }

    pub fn is_approved(&self, id: &str) -> bool {
        self.approved.contains(id)
    }

    pub fn is_rejected(&self, id: &str) -> bool {
        self.rejected.contains(id)
    }

    /// Drop an approval once its job has been admitted.
    pub fn consume(&mut self, id: &str) {
        self.approved.remove(id);
    }

    /// Forget decisions about moves that are no longer recommended.
    pub fn retain_current(&mut self, current: &HashSet<&str>) {
        self.approved.retain(|id| current.contains(id.as_str()));
        self.rejected.retain(|id| current.contains(id.as_str()));
    }
}

/// Outcome of gating one tick's recommendations.
#[derive(Debug, Clone, Default)]
pub struct GateDecision {
    /// Every recommendation, with its status for this tick.
    pub recommendations: Vec<Recommendation>,
    /// Units to hand to the orchestrator, in rank order.
    pub execute: Vec<Vec<Recommendation>>,
}

/// Split a ranked list into move units, keeping first-appearance order.
pub fn move_units(recommendations: &[Recommendation]) -> Vec<Vec<usize>> {
    let mut units: Vec<Vec<usize>> = Vec::new();
    let mut group_slot: Vec<(&str, usize)> = Vec::new();

    for (idx, rec) in recommendations.iter().enumerate() {
        match rec.group.as_deref() {
            Some(group) => match group_slot.iter().find(|(g, _)| *g == group) {
                Some((_, slot)) => units[*slot].push(idx),
                None => {
                    group_slot.push((group, units.len()));
                    units.push(vec![idx]);
                }
            },
            None => units.push(vec![idx]),
        }
    }
    units
}

/// Apply the cluster's mode to freshly generated recommendations.
///
/// `in_flight` is the number of non-terminal jobs; units are approved in
/// rank order until `max_concurrent_migrations` would be exceeded.
/// Superseded recommendations are never executed.
pub fn apply_mode(
    mut recommendations: Vec<Recommendation>,
    settings: &DrsSettings,
    approvals: &Approvals,
    in_flight: u32,
) -> GateDecision {
    let mut capacity = settings.max_concurrent_migrations.saturating_sub(in_flight) as usize;
    let mut execute = Vec::new();
    let mut ceiling_hit = false;

    for unit in move_units(&recommendations) {
        let mut blocked = false;
        for &idx in &unit {
            let rec = &mut recommendations[idx];
            if approvals.is_rejected(&rec.id) {
                rec.status = RecommendationStatus::Rejected;
            }
            if rec.status != RecommendationStatus::Proposed {
                blocked = true;
            }
        }
        if blocked || ceiling_hit {
            continue;
        }

        let eligible = match settings.mode {
            DrsMode::Manual => false,
            DrsMode::Partial => unit.iter().all(|&idx| approvals.is_approved(&recommendations[idx].id)),
            DrsMode::Automatic => true,
        };
        if !eligible {
            continue;
        }

        if unit.len() > capacity {
            // Ranked order is preserved; lower-ranked units wait too.
            ceiling_hit = true;
            continue;
        }
        capacity -= unit.len();

        let mut batch = Vec::with_capacity(unit.len());
        for &idx in &unit {
            recommendations[idx].status = RecommendationStatus::Approved;
            batch.push(recommendations[idx].clone());
        }
        execute.push(batch);
    }

    GateDecision {
        recommendations,
        execute,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_rec(workload: &str, target: &str, group: Option<&str>) -> Recommendation {
        Recommendation {
            id: Recommendation::id_for(workload, "n1", target),
            workload_id: workload.to_string(),
            source_node: "n1".to_string(),
            target_node: target.to_string(),
            predicted_score_delta: 10.0,
            reasons: vec![],
            status: RecommendationStatus::Proposed,
            group: group.map(str::to_string),
        }
    }

    fn settings(mode: DrsMode, max_concurrent: u32) -> DrsSettings {
        DrsSettings {
            mode,
            max_concurrent_migrations: max_concurrent,
            ..Default::default()
        }
    }

    fn statuses(decision: &GateDecision) -> Vec<RecommendationStatus> {
        decision.recommendations.iter().map(|r| r.status).collect()
    }

    #[test]
    fn manual_executes_nothing() {
        let recs = vec![make_rec("vm-1", "n2", None), make_rec("vm-2", "n3", None)];
        let mut approvals = Approvals::default();
        approvals.approve(&recs[0].id);

        let decision = apply_mode(recs, &settings(DrsMode::Manual, 4), &approvals, 0);

        assert!(decision.execute.is_empty());
        assert_eq!(statuses(&decision), vec![RecommendationStatus::Proposed; 2]);
    }

    #[test]
    fn partial_executes_only_preapproved() {
        let recs = vec![
            make_rec("vm-1", "n2", None),
            make_rec("vm-2", "n3", None),
            make_rec("vm-3", "n3", None),
        ];
        let mut approvals = Approvals::default();
        approvals.approve(&recs[1].id);
        approvals.reject(&recs[2].id);

        let decision = apply_mode(recs, &settings(DrsMode::Partial, 4), &approvals, 0);

        assert_eq!(
            statuses(&decision),
            vec![
                RecommendationStatus::Proposed,
                RecommendationStatus::Approved,
                RecommendationStatus::Rejected,
            ]
        );
        assert_eq!(decision.execute.len(), 1);
        assert_eq!(decision.execute[0][0].workload_id, "vm-2");
    }

    #[test]
    fn automatic_respects_ceiling() {
        let recs = vec![make_rec("vm-1", "n2", None), make_rec("vm-2", "n3", None)];
        let decision = apply_mode(recs, &settings(DrsMode::Automatic, 1), &Approvals::default(), 0);

        assert_eq!(decision.execute.len(), 1);
        assert_eq!(
            statuses(&decision),
            vec![RecommendationStatus::Approved, RecommendationStatus::Proposed]
        );
    }

    #[test]
    fn in_flight_jobs_reduce_capacity() {
        let recs = vec![make_rec("vm-1", "n2", None)];
        let decision = apply_mode(recs, &settings(DrsMode::Automatic, 2), &Approvals::default(), 2);
        assert!(decision.execute.is_empty());
        assert_eq!(statuses(&decision), vec![RecommendationStatus::Proposed]);
    }

    #[test]
    fn unit_counts_whole_against_ceiling() {
        let recs = vec![
            make_rec("web-a", "y", Some("group:web-a")),
            make_rec("web-b", "y", Some("group:web-a")),
            make_rec("vm-1", "z", None),
        ];
        let decision = apply_mode(recs, &settings(DrsMode::Automatic, 1), &Approvals::default(), 0);

        // The unit does not fit and everything ranked below it waits.
        assert!(decision.execute.is_empty());

        let recs = vec![
            make_rec("web-a", "y", Some("group:web-a")),
            make_rec("web-b", "y", Some("group:web-a")),
        ];
        let decision = apply_mode(recs, &settings(DrsMode::Automatic, 2), &Approvals::default(), 0);
        assert_eq!(decision.execute.len(), 1);
        assert_eq!(decision.execute[0].len(), 2);
    }

    #[test]
    fn rejected_member_blocks_unit() {
        let recs = vec![
            make_rec("web-a", "y", Some("group:web-a")),
            make_rec("web-b", "y", Some("group:web-a")),
        ];
        let mut approvals = Approvals::default();
        approvals.reject(&recs[1].id);

        let decision = apply_mode(recs, &settings(DrsMode::Automatic, 4), &approvals, 0);

        assert!(decision.execute.is_empty());
        assert_eq!(
            statuses(&decision),
            vec![RecommendationStatus::Proposed, RecommendationStatus::Rejected]
        );
    }

    #[test]
    fn superseded_is_never_executed() {
        let mut rec = make_rec("vm-1", "n2", None);
        rec.status = RecommendationStatus::Superseded;
        let decision = apply_mode(vec![rec], &settings(DrsMode::Automatic, 4), &Approvals::default(), 0);
        assert!(decision.execute.is_empty());
    }

    #[test]
    fn units_group_by_first_appearance() {
        let recs = vec![
            make_rec("a", "y", Some("g1")),
            make_rec("b", "y", None),
            make_rec("c", "y", Some("g1")),
        ];
        assert_eq!(move_units(&recs), vec![vec![0, 2], vec![1]]);
    }

    #[test]
    fn approvals_track_latest_decision() {
        let mut approvals = Approvals::default();
        approvals.approve("r1");
        approvals.reject("r1");
        assert!(!approvals.is_approved("r1"));
        assert!(approvals.is_rejected("r1"));

        approvals.approve("r2");
        approvals.retain_current(&HashSet::from(["r1"]));
        assert!(!approvals.is_approved("r2"));
        assert!(approvals.is_rejected("r1"));
    }
}
