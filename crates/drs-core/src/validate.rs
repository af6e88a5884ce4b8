//! Sanity checks for settings and rules read from external stores.
//!
//! The stores are operator-edited, so values are checked once per tick
//! before the scheduler acts on them.

use std::collections::HashSet;

use crate::error::{CoreError, CoreResult};
use crate::types::*;

impl DrsSettings {
    /// Reject settings the scheduler cannot act on safely.
    pub fn validate(&self) -> CoreResult<()> {
        if !(0.0..=100.0).contains(&self.imbalance_threshold) {
            return Err(CoreError::InvalidSettings(format!(
                "imbalance_threshold must be within 0..=100, got {}",
                self.imbalance_threshold
            )));
        }
        if !self.min_improvement_pct.is_finite() || self.min_improvement_pct < 0.0 {
            return Err(CoreError::InvalidSettings(format!(
                "min_improvement_pct must be non-negative, got {}",
                self.min_improvement_pct
            )));
        }
        if self.tick_interval_secs == 0 {
            return Err(CoreError::InvalidSettings(
                "tick_interval_secs must be at least 1".to_string(),
            ));
        }
        let s = &self.scoring;
        if s.cpu_weight < 0.0 || s.mem_weight < 0.0 || s.cpu_weight + s.mem_weight <= 0.0 {
            return Err(CoreError::InvalidSettings(
                "scoring weights must be non-negative and not both zero".to_string(),
            ));
        }
        if s.max_deviation_pct <= 0.0 {
            return Err(CoreError::InvalidSettings(format!(
                "max_deviation_pct must be positive, got {}",
                s.max_deviation_pct
            )));
        }
        Ok(())
    }
}

/// Reject rule sets with duplicate ids or empty selectors.
pub fn validate_rules(rules: &[AffinityRule]) -> CoreResult<()> {
    let mut ids = HashSet::new();
    for rule in rules {
        if !ids.insert(rule.id.as_str()) {
            return Err(CoreError::InvalidRule {
                id: rule.id.clone(),
                reason: "duplicate rule id".to_string(),
            });
        }
        if let SubjectSelector::Workloads { ids } = &rule.subject
            && ids.is_empty()
        {
            return Err(CoreError::InvalidRule {
                id: rule.id.clone(),
                reason: "subject selector lists no workloads".to_string(),
            });
        }
        if let TargetSelector::Nodes { ids } = &rule.target
            && ids.is_empty()
        {
            return Err(CoreError::InvalidRule {
                id: rule.id.clone(),
                reason: "target selector lists no nodes".to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: &str) -> AffinityRule {
        AffinityRule {
            id: id.to_string(),
            kind: RuleKind::AntiAffinity,
            strictness: Strictness::Must,
            subject: SubjectSelector::Tag { tag: "db".to_string() },
            target: TargetSelector::CoLocated,
            enabled: true,
        }
    }

    #[test]
    fn default_settings_are_valid() {
        assert!(DrsSettings::default().validate().is_ok());
    }

    #[test]
    fn threshold_out_of_range_rejected() {
        let settings = DrsSettings {
            imbalance_threshold: 120.0,
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(CoreError::InvalidSettings(_))));
    }

    #[test]
    fn zero_weights_rejected() {
        let mut settings = DrsSettings::default();
        settings.scoring.cpu_weight = 0.0;
        settings.scoring.mem_weight = 0.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn duplicate_rule_ids_rejected() {
        let err = validate_rules(&[rule("r1"), rule("r1")]).unwrap_err();
        assert_eq!(
            err,
            CoreError::InvalidRule {
                id: "r1".to_string(),
                reason: "duplicate rule id".to_string()
            }
        );
    }

    #[test]
    fn empty_node_target_rejected() {
        let mut r = rule("r1");
        r.target = TargetSelector::Nodes { ids: vec![] };
        assert!(validate_rules(&[r]).is_err());
    }
}
