//! Cluster controller — the per-cluster tick.
//!
//! Every tick works from one consistent snapshot:
//!
//! ```text
//! fetch settings, snapshot, rules   (bounded by the tick interval)
//!   → normalize (carry missing nodes as offline, overlay locks)
//!   → cancel jobs touching offline nodes
//!   → score + recommend
//!   → mode gate → orchestrator admission
//!   → publish status + recommendations
//! ```
//!
//! A failed or slow fetch skips the tick: the previous recommendations
//! stay visible and the status is marked degraded with `stale_since`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, watch};
use tracing::{debug, info, warn};

use drs_core::{
    AffinityRule, ClusterId, ClusterSnapshot, DrsMode, DrsSettings, JobState, MigrationJob,
    Recommendation, RecommendationId, RecommendationStatus, epoch_secs,
};
use drs_orchestrator::{MigrationError, Orchestrator};
use drs_placement::{Dimension, recommend, score_cluster};

use crate::error::{ControllerError, ControllerResult};
use crate::mode::{Approvals, apply_mode};
use crate::sources::{RuleStore, SettingsStore, SnapshotSource};

/// Externally visible state of one cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub cluster_id: ClusterId,
    pub mode: DrsMode,
    /// Latest health score; `None` until the first successful tick.
    pub score: Option<f64>,
    pub dominant: Dimension,
    pub eligible_nodes: u32,
    pub snapshot_version: u64,
    /// When `score` and the recommendations were computed.
    pub computed_at: Option<u64>,
    /// Set while ticks are being skipped for lack of fresh input.
    pub stale_since: Option<u64>,
    pub degraded: bool,
    pub last_error: Option<String>,
    pub recommendations_proposed: u32,
    pub recommendations_approved: u32,
    pub recommendations_rejected: u32,
    pub recommendations_superseded: u32,
    pub jobs_in_flight: u32,
    pub jobs_succeeded_total: u64,
    pub jobs_failed_total: u64,
    pub jobs_cancelled_total: u64,
    pub ticks_total: u64,
    pub stale_ticks_total: u64,
}

impl ClusterStatus {
    /// Status of a cluster that has not ticked yet.
    pub fn new(cluster_id: &str) -> Self {
        Self {
            cluster_id: cluster_id.to_string(),
            mode: DrsMode::default(),
            score: None,
            dominant: Dimension::None,
            eligible_nodes: 0,
            snapshot_version: 0,
            computed_at: None,
            stale_since: None,
            degraded: false,
            last_error: None,
            recommendations_proposed: 0,
            recommendations_approved: 0,
            recommendations_rejected: 0,
            recommendations_superseded: 0,
            jobs_in_flight: 0,
            jobs_succeeded_total: 0,
            jobs_failed_total: 0,
            jobs_cancelled_total: 0,
            ticks_total: 0,
            stale_ticks_total: 0,
        }
    }

    fn count_recommendations(&mut self, recs: &[Recommendation]) {
        let count = |status: RecommendationStatus| recs.iter().filter(|r| r.status == status).count() as u32;
        self.recommendations_proposed = count(RecommendationStatus::Proposed);
        self.recommendations_approved = count(RecommendationStatus::Approved);
        self.recommendations_rejected = count(RecommendationStatus::Rejected);
        self.recommendations_superseded = count(RecommendationStatus::Superseded);
    }
}

/// Summary of one successful tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub snapshot_version: u64,
    pub score: f64,
    pub recommendations: usize,
    pub admitted_jobs: usize,
    pub cancelled_jobs: usize,
}

struct ClusterView {
    status: ClusterStatus,
    recommendations: Vec<Recommendation>,
    snapshot: Option<ClusterSnapshot>,
    settings: DrsSettings,
    /// Moves the hypervisor refused on rule grounds.
    superseded: HashSet<RecommendationId>,
}

// ── Handle ───────────────────────────────────────────────────────

/// Query and command interface for one cluster. Cheap to clone.
#[derive(Clone)]
pub struct ClusterHandle {
    cluster_id: ClusterId,
    view: Arc<RwLock<ClusterView>>,
    approvals: Arc<Mutex<Approvals>>,
    orchestrator: Orchestrator,
}

impl ClusterHandle {
    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    pub async fn status(&self) -> ClusterStatus {
        let mut status = self.view.read().await.status.clone();
        status.jobs_in_flight = self.orchestrator.in_flight().await;
        status
    }

    /// Recommendations from the most recent successful tick.
    pub async fn recommendations(&self) -> Vec<Recommendation> {
        self.view.read().await.recommendations.clone()
    }

    /// Approve a recommendation for execution on the next tick.
    ///
    /// Approving one member of a move unit approves the whole unit.
    pub async fn approve(&self, rec_id: &str) -> ControllerResult<Vec<Recommendation>> {
        let mut view = self.view.write().await;
        if view.settings.mode == DrsMode::Manual {
            return Err(ControllerError::ManualMode(self.cluster_id.clone()));
        }
        let group = view
            .recommendations
            .iter()
            .find(|r| r.id == rec_id)
            .map(|r| r.group.clone())
            .ok_or_else(|| ControllerError::RecommendationNotFound(rec_id.to_string()))?;

        let mut approvals = self.approvals.lock().await;
        let mut approved = Vec::new();
        for rec in view
            .recommendations
            .iter_mut()
            .filter(|r| r.id == rec_id || (group.is_some() && r.group == group))
        {
            approvals.approve(&rec.id);
            if rec.status != RecommendationStatus::Superseded {
                rec.status = RecommendationStatus::Approved;
            }
            approved.push(rec.clone());
        }
        let recs = view.recommendations.clone();
        view.status.count_recommendations(&recs);

        info!(cluster = %self.cluster_id, recommendation = %rec_id, count = approved.len(), "recommendation approved");
        Ok(approved)
    }

    /// Reject a recommendation; it will not execute while it is regenerated.
    pub async fn reject(&self, rec_id: &str) -> ControllerResult<Recommendation> {
        let mut view = self.view.write().await;
        let rec = view
            .recommendations
            .iter_mut()
            .find(|r| r.id == rec_id)
            .ok_or_else(|| ControllerError::RecommendationNotFound(rec_id.to_string()))?;

        self.approvals.lock().await.reject(&rec.id);
        rec.status = RecommendationStatus::Rejected;
        let rejected = rec.clone();
        let recs = view.recommendations.clone();
        view.status.count_recommendations(&recs);

        info!(cluster = %self.cluster_id, recommendation = %rec_id, "recommendation rejected");
        Ok(rejected)
    }

    pub async fn jobs(&self) -> Vec<MigrationJob> {
        self.orchestrator.jobs().await
    }

    /// Force-cancel a job. `Ok(false)` when it had already finished.
    pub async fn cancel_job(&self, job_id: &str) -> ControllerResult<bool> {
        Ok(self.orchestrator.cancel_job(job_id).await?)
    }
}

// ── Controller ───────────────────────────────────────────────────

/// Drives the tick loop for one cluster.
pub struct ClusterController {
    handle: ClusterHandle,
    snapshots: Arc<dyn SnapshotSource>,
    rules: Arc<dyn RuleStore>,
    settings: Arc<dyn SettingsStore>,
    /// Overrides the tick-interval bound on input fetches.
    fetch_timeout: Option<Duration>,
}

impl ClusterController {
    pub fn new(
        cluster_id: impl Into<ClusterId>,
        snapshots: Arc<dyn SnapshotSource>,
        rules: Arc<dyn RuleStore>,
        settings: Arc<dyn SettingsStore>,
        orchestrator: Orchestrator,
    ) -> Self {
        let cluster_id = cluster_id.into();
        let view = ClusterView {
            status: ClusterStatus::new(&cluster_id),
            recommendations: Vec::new(),
            snapshot: None,
            settings: DrsSettings::default(),
            superseded: HashSet::new(),
        };
        Self {
            handle: ClusterHandle {
                cluster_id,
                view: Arc::new(RwLock::new(view)),
                approvals: Arc::new(Mutex::new(Approvals::default())),
                orchestrator,
            },
            snapshots,
            rules,
            settings,
            fetch_timeout: None,
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    pub fn cluster_id(&self) -> &str {
        &self.handle.cluster_id
    }

    pub fn handle(&self) -> ClusterHandle {
        self.handle.clone()
    }

    /// Run ticks until `shutdown` flips, then cancel in-flight jobs.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(cluster = %self.cluster_id(), "cluster controller started");

        loop {
            if let Err(e) = self.tick().await {
                debug!(cluster = %self.cluster_id(), error = %e, "tick skipped");
            }

            let interval = Duration::from_secs(self.handle.view.read().await.settings.tick_interval_secs.max(1));
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => break,
            }
        }

        let cancelled = self.handle.orchestrator.cancel_all().await;
        info!(cluster = %self.cluster_id(), cancelled, "cluster controller stopped");
    }

    /// Run one tick.
    pub async fn tick(&self) -> ControllerResult<TickReport> {
        let cluster_id = self.cluster_id();
        let orchestrator = &self.handle.orchestrator;

        let bound = match self.fetch_timeout {
            Some(bound) => bound,
            None => Duration::from_secs(self.handle.view.read().await.settings.tick_interval_secs.max(1)),
        };
        let (raw, rules, settings) = match tokio::time::timeout(bound, self.fetch_inputs()).await {
            Ok(Ok(inputs)) => inputs,
            Ok(Err(e)) => {
                self.mark_stale(&e).await;
                return Err(e);
            }
            Err(_) => {
                let e = ControllerError::FetchTimeout(bound);
                self.mark_stale(&e).await;
                return Err(e);
            }
        };

        // ── Normalize ────────────────────────────────────────────
        let previous = self.handle.view.read().await.snapshot.clone();
        let locked = orchestrator.locked_workloads().await;
        let mut snapshot = raw.normalize(previous.as_ref(), &locked);

        let cancelled = orchestrator.cancel_for_offline(&snapshot.offline_nodes()).await;
        if !cancelled.is_empty() {
            warn!(cluster = %cluster_id, jobs = ?cancelled, "cancelled jobs touching offline nodes");
            let locked = orchestrator.locked_workloads().await;
            for workload in &mut snapshot.workloads {
                workload.locked = locked.contains(&workload.id);
            }
        }

        // ── Score + recommend ────────────────────────────────────
        let health = score_cluster(&snapshot, &settings.scoring);
        let mut recs = recommend(&snapshot, &settings, &rules);
        debug!(
            cluster = %cluster_id,
            version = snapshot.version,
            score = health.score,
            dominant = ?health.dominant,
            recommendations = recs.len(),
            "cluster scored"
        );

        // ── Job outcomes ─────────────────────────────────────────
        let outcomes = orchestrator.take_outcomes().await;
        {
            let mut view = self.handle.view.write().await;
            for outcome in &outcomes {
                match outcome.job.state {
                    JobState::Succeeded => view.status.jobs_succeeded_total += 1,
                    JobState::Failed => view.status.jobs_failed_total += 1,
                    JobState::Cancelled => view.status.jobs_cancelled_total += 1,
                    JobState::Queued | JobState::Running => {}
                }
                if let Some(MigrationError::RuleViolation(reason)) = &outcome.failure {
                    warn!(
                        cluster = %cluster_id,
                        recommendation = %outcome.job.recommendation_id,
                        %reason,
                        "migration refused on rule grounds, superseding recommendation"
                    );
                    view.superseded.insert(outcome.job.recommendation_id.clone());
                }
            }
            let current: HashSet<&str> = recs.iter().map(|r| r.id.as_str()).collect();
            view.superseded.retain(|id| current.contains(id.as_str()));
            for rec in &mut recs {
                if view.superseded.contains(&rec.id) {
                    rec.status = RecommendationStatus::Superseded;
                }
            }
        }

        // ── Gate + admit ─────────────────────────────────────────
        let in_flight = orchestrator.in_flight().await;
        let decision = {
            let mut approvals = self.handle.approvals.lock().await;
            let current: HashSet<&str> = recs.iter().map(|r| r.id.as_str()).collect();
            approvals.retain_current(&current);
            apply_mode(recs, &settings, &approvals, in_flight)
        };
        let mut recs = decision.recommendations;

        let mut admitted = 0;
        for unit in &decision.execute {
            match orchestrator.admit(unit, settings.max_concurrent_migrations).await {
                Ok(job_ids) => {
                    admitted += job_ids.len();
                    let mut approvals = self.handle.approvals.lock().await;
                    for rec in unit {
                        approvals.consume(&rec.id);
                    }
                }
                Err(e) => {
                    warn!(cluster = %cluster_id, recommendation = %unit[0].id, error = %e, "admission deferred");
                    for rec in recs.iter_mut().filter(|r| unit.iter().any(|u| u.id == r.id)) {
                        rec.status = RecommendationStatus::Proposed;
                    }
                }
            }
        }

        // ── Publish ──────────────────────────────────────────────
        let report = TickReport {
            snapshot_version: snapshot.version,
            score: health.score,
            recommendations: recs.len(),
            admitted_jobs: admitted,
            cancelled_jobs: cancelled.len(),
        };

        let mut view = self.handle.view.write().await;
        let status = &mut view.status;
        status.mode = settings.mode;
        status.score = Some(health.score);
        status.dominant = health.dominant;
        status.eligible_nodes = health.eligible_nodes;
        status.snapshot_version = snapshot.version;
        status.computed_at = Some(epoch_secs());
        if status.degraded {
            info!(cluster = %cluster_id, "fresh snapshot received, cluster no longer degraded");
        }
        status.stale_since = None;
        status.degraded = false;
        status.last_error = None;
        status.ticks_total += 1;
        status.count_recommendations(&recs);

        view.recommendations = recs;
        view.snapshot = Some(snapshot);
        view.settings = settings;

        Ok(report)
    }

    async fn fetch_inputs(&self) -> ControllerResult<(ClusterSnapshot, Vec<AffinityRule>, DrsSettings)> {
        let cluster_id = self.cluster_id();
        let settings = self.settings.settings(cluster_id).await?;
        let snapshot = self.snapshots.fetch(cluster_id).await?;
        let rules = self.rules.rules(cluster_id).await?;
        Ok((snapshot, rules, settings))
    }

    async fn mark_stale(&self, error: &ControllerError) {
        let mut view = self.handle.view.write().await;
        let status = &mut view.status;
        if status.stale_since.is_none() {
            status.stale_since = Some(epoch_secs());
        }
        status.degraded = true;
        status.last_error = Some(error.to_string());
        status.ticks_total += 1;
        status.stale_ticks_total += 1;
        warn!(
            cluster = %self.handle.cluster_id,
            error = %error,
            stale_since = status.stale_since,
            "stale snapshot, keeping previous recommendations"
        );
    }
}
