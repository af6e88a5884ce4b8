//! Cluster health scoring.
//!
//! Turns a snapshot into a 0-100 balance score:
//! - **Deviation**: population standard deviation of CPU% and memory%
//!   across online nodes
//! - **Normalization**: each deviation divided by the maximum acceptable
//!   deviation, clamped to 1.0
//! - **Weighting**: CPU and memory combined with configurable weights
//!
//! 100 means perfectly balanced. The scorer holds no state; identical
//! input always yields an identical score.

use drs_core::{ClusterSnapshot, NodeStatus, ScoringConfig};

/// Resource dimension driving the imbalance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Cpu,
    Memory,
    /// Balanced, or the cluster cannot be evaluated.
    None,
}

/// Scored health of one snapshot.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HealthScore {
    /// Range: 0.0..=100.0.
    pub score: f64,
    pub dominant: Dimension,
    /// Population std-dev of CPU% across eligible nodes.
    pub cpu_deviation: f64,
    /// Population std-dev of memory% across eligible nodes.
    pub mem_deviation: f64,
    pub eligible_nodes: u32,
}

impl HealthScore {
    fn fixed(score: f64, eligible_nodes: u32) -> Self {
        Self {
            score,
            dominant: Dimension::None,
            cpu_deviation: 0.0,
            mem_deviation: 0.0,
            eligible_nodes,
        }
    }
}

/// Score a snapshot.
pub fn score_cluster(snapshot: &ClusterSnapshot, config: &ScoringConfig) -> HealthScore {
    let any_online = snapshot
        .nodes
        .iter()
        .any(|n| n.status != NodeStatus::Offline);
    if !any_online {
        // Nothing reachable: cannot evaluate.
        return HealthScore::fixed(0.0, 0);
    }

    let cpu: Vec<f64> = snapshot.eligible_nodes().map(|n| n.cpu_pct).collect();
    let mem: Vec<f64> = snapshot.eligible_nodes().map(|n| n.mem_pct).collect();
    let eligible = cpu.len() as u32;

    if eligible < 2 {
        return HealthScore::fixed(100.0, eligible);
    }

    let cpu_deviation = std_dev(&cpu);
    let mem_deviation = std_dev(&mem);

    let max_dev = if config.max_deviation_pct > 0.0 {
        config.max_deviation_pct
    } else {
        25.0
    };
    let cpu_norm = (cpu_deviation / max_dev).min(1.0);
    let mem_norm = (mem_deviation / max_dev).min(1.0);

    let total_weight = config.cpu_weight.max(0.0) + config.mem_weight.max(0.0);
    let (cpu_w, mem_w) = if total_weight > 0.0 {
        (
            config.cpu_weight.max(0.0) / total_weight,
            config.mem_weight.max(0.0) / total_weight,
        )
    } else {
        (0.5, 0.5)
    };

    let imbalance = cpu_w * cpu_norm + mem_w * mem_norm;
    let score = ((1.0 - imbalance) * 100.0).clamp(0.0, 100.0);

    let dominant = if cpu_norm == 0.0 && mem_norm == 0.0 {
        Dimension::None
    } else if cpu_norm >= mem_norm {
        Dimension::Cpu
    } else {
        Dimension::Memory
    };

    HealthScore {
        score,
        dominant,
        cpu_deviation,
        mem_deviation,
        eligible_nodes: eligible,
    }
}

/// Population standard deviation.
fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}
