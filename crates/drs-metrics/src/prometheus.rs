//! Prometheus text exposition format.
//!
//! Renders cluster statuses into the Prometheus text exposition format
//! for scraping by a Prometheus server or compatible agent.

use std::fmt::Write;

use drs_controller::ClusterStatus;

/// Render cluster statuses into Prometheus text format.
///
/// Produces GAUGE and COUNTER metrics with `cluster` labels. Clusters
/// that have not completed a tick yet report no health score.
pub fn render_prometheus(statuses: &[ClusterStatus]) -> String {
    let mut out = String::new();

    header(&mut out, "drs_health_score", "Cluster balance score (0-100, 100 = balanced).", "gauge");
    for s in statuses {
        if let Some(score) = s.score {
            let _ = writeln!(out, "drs_health_score{{cluster=\"{}\"}} {:.2}", s.cluster_id, score);
        }
    }

    header(&mut out, "drs_eligible_nodes", "Online nodes counted by the scorer.", "gauge");
    for s in statuses {
        let _ = writeln!(out, "drs_eligible_nodes{{cluster=\"{}\"}} {}", s.cluster_id, s.eligible_nodes);
    }

    header(&mut out, "drs_recommendations", "Recommendations from the latest tick, by status.", "gauge");
    for s in statuses {
        for (status, value) in [
            ("proposed", s.recommendations_proposed),
            ("approved", s.recommendations_approved),
            ("rejected", s.recommendations_rejected),
            ("superseded", s.recommendations_superseded),
        ] {
            let _ = writeln!(
                out,
                "drs_recommendations{{cluster=\"{}\",status=\"{status}\"}} {value}",
                s.cluster_id
            );
        }
    }

    header(&mut out, "drs_jobs_in_flight", "Non-terminal migration jobs.", "gauge");
    for s in statuses {
        let _ = writeln!(out, "drs_jobs_in_flight{{cluster=\"{}\"}} {}", s.cluster_id, s.jobs_in_flight);
    }

    header(&mut out, "drs_jobs_total", "Migration jobs that reached a terminal state.", "counter");
    for s in statuses {
        for (state, value) in [
            ("succeeded", s.jobs_succeeded_total),
            ("failed", s.jobs_failed_total),
            ("cancelled", s.jobs_cancelled_total),
        ] {
            let _ = writeln!(
                out,
                "drs_jobs_total{{cluster=\"{}\",state=\"{state}\"}} {value}",
                s.cluster_id
            );
        }
    }

    header(&mut out, "drs_snapshot_stale", "1 while ticks are skipped for lack of a fresh snapshot.", "gauge");
    for s in statuses {
        let _ = writeln!(out, "drs_snapshot_stale{{cluster=\"{}\"}} {}", s.cluster_id, u8::from(s.degraded));
    }

    header(&mut out, "drs_ticks_total", "Ticks attempted.", "counter");
    for s in statuses {
        let _ = writeln!(out, "drs_ticks_total{{cluster=\"{}\"}} {}", s.cluster_id, s.ticks_total);
    }

    header(&mut out, "drs_stale_ticks_total", "Ticks skipped because inputs were unavailable.", "counter");
    for s in statuses {
        let _ = writeln!(out, "drs_stale_ticks_total{{cluster=\"{}\"}} {}", s.cluster_id, s.stale_ticks_total);
    }

    out
}

fn header(out: &mut String, name: &str, help: &str, kind: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
}
