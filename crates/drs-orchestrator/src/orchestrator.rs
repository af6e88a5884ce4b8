//! Migration orchestrator — turns approved recommendations into jobs.
//!
//! Each admitted recommendation becomes a `MigrationJob` driven by its
//! own background task:
//!
//! ```text
//! admit ──► queued ──► running ──► succeeded
//!              ▲          │
//!              └─transient┤──────► failed     (permanent, or attempts exhausted)
//!                         └──────► cancelled  (operator, node offline, shutdown)
//! ```
//!
//! The lock table guarantees at most one non-terminal job per workload.
//! Jobs, locks, and the terminal history share one mutex so admission and
//! cancellation see a consistent view.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use drs_core::{ClusterId, JobId, JobState, MigrationJob, Recommendation, WorkloadId, epoch_secs};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::migration::{MigrationApi, MigrationError, MigrationHandle, MigrationStatus, RetryPolicy};

/// Execution tunables.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Delay between status polls of a running migration.
    pub poll_interval: Duration,
    /// Upper bound on one attempt, start included.
    pub job_timeout: Duration,
    /// Attempts per job, first one included.
    pub max_attempts: u32,
    /// Terminal jobs retained for inspection.
    pub history_limit: usize,
    pub retry: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            job_timeout: Duration::from_secs(600),
            max_attempts: 2,
            history_limit: 256,
            retry: RetryPolicy::default(),
        }
    }
}

/// A job that reached a terminal state, reported back to the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub job: MigrationJob,
    /// The final migration error, when the job failed.
    pub failure: Option<MigrationError>,
}

struct JobSlot {
    job: MigrationJob,
    cancel_tx: watch::Sender<bool>,
}

#[derive(Default)]
struct OrchestratorState {
    /// Non-terminal jobs: job_id → slot.
    active: HashMap<JobId, JobSlot>,
    /// workload_id → owning job_id.
    locks: HashMap<WorkloadId, JobId>,
    /// Terminal jobs, oldest first.
    history: VecDeque<MigrationJob>,
    /// Terminal jobs not yet collected by the controller.
    outcomes: Vec<JobOutcome>,
    next_seq: u64,
}

/// How an attempt ended short of success.
enum AttemptEnd {
    Failed(MigrationError),
    Cancelled,
}

/// Tracks and drives migration jobs for one cluster.
#[derive(Clone)]
pub struct Orchestrator {
    cluster_id: ClusterId,
    api: Arc<dyn MigrationApi>,
    config: Arc<OrchestratorConfig>,
    state: Arc<Mutex<OrchestratorState>>,
}

impl Orchestrator {
    pub fn new(cluster_id: impl Into<ClusterId>, api: Arc<dyn MigrationApi>, config: OrchestratorConfig) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            api,
            config: Arc::new(config),
            state: Arc::new(Mutex::new(OrchestratorState::default())),
        }
    }

    // ── Admission ────────────────────────────────────────────────

    /// Admit a move unit: every recommendation in `unit` becomes a job,
    /// or none does.
    ///
    /// Fails when any member is already locked or when the unit would
    /// push the number of non-terminal jobs above `limit`.
    pub async fn admit(&self, unit: &[Recommendation], limit: u32) -> OrchestratorResult<Vec<JobId>> {
        if unit.is_empty() {
            return Err(OrchestratorError::EmptyUnit);
        }

        let mut state = self.state.lock().await;

        let mut seen = HashSet::new();
        for rec in unit {
            if !seen.insert(rec.workload_id.as_str()) {
                return Err(OrchestratorError::DuplicateWorkload(rec.workload_id.clone()));
            }
            if state.locks.contains_key(&rec.workload_id) {
                return Err(OrchestratorError::WorkloadLocked(rec.workload_id.clone()));
            }
        }

        let in_flight = state.active.len() as u32;
        if in_flight.saturating_add(unit.len() as u32) > limit {
            return Err(OrchestratorError::ConcurrencyLimit { in_flight, limit });
        }

        let mut job_ids = Vec::with_capacity(unit.len());
        for rec in unit {
            state.next_seq += 1;
            let job_id = format!("{}-job-{:06}", self.cluster_id, state.next_seq);
            let job = MigrationJob {
                id: job_id.clone(),
                recommendation_id: rec.id.clone(),
                workload_id: rec.workload_id.clone(),
                source_node: rec.source_node.clone(),
                target_node: rec.target_node.clone(),
                state: JobState::Queued,
                attempt_count: 0,
                started_at: None,
                ended_at: None,
                error: None,
            };

            let (cancel_tx, cancel_rx) = watch::channel(false);
            state.locks.insert(rec.workload_id.clone(), job_id.clone());
            state.active.insert(
                job_id.clone(),
                JobSlot {
                    job: job.clone(),
                    cancel_tx,
                },
            );

            info!(
                cluster = %self.cluster_id,
                job = %job_id,
                workload = %rec.workload_id,
                source = %rec.source_node,
                target = %rec.target_node,
                "migration job admitted"
            );

            let worker = self.clone();
            tokio::spawn(async move {
                worker.run_job(job, cancel_rx).await;
            });
            job_ids.push(job_id);
        }

        Ok(job_ids)
    }

    // ── Cancellation ─────────────────────────────────────────────

    /// Force-cancel a job. Returns `false` when it had already finished.
    pub async fn cancel_job(&self, job_id: &str) -> OrchestratorResult<bool> {
        let mut state = self.state.lock().await;
        if self.cancel_locked(&mut state, job_id, "cancelled by operator") {
            return Ok(true);
        }
        if state.history.iter().any(|j| j.id == job_id) {
            debug!(cluster = %self.cluster_id, job = %job_id, "cancel of terminal job ignored");
            return Ok(false);
        }
        Err(OrchestratorError::JobNotFound(job_id.to_string()))
    }

    /// Cancel every non-terminal job whose source or target is offline.
    pub async fn cancel_for_offline(&self, offline: &HashSet<&str>) -> Vec<JobId> {
        if offline.is_empty() {
            return Vec::new();
        }
        let mut state = self.state.lock().await;
        let affected: Vec<(JobId, String)> = state
            .active
            .values()
            .filter_map(|slot| {
                let job = &slot.job;
                [job.source_node.as_str(), job.target_node.as_str()]
                    .into_iter()
                    .find(|node| offline.contains(node))
                    .map(|node| (job.id.clone(), node.to_string()))
            })
            .collect();

        let mut cancelled = Vec::new();
        for (job_id, node) in affected {
            if self.cancel_locked(&mut state, &job_id, &format!("node {node} offline")) {
                cancelled.push(job_id);
            }
        }
        cancelled.sort();
        cancelled
    }

    /// Cancel everything still in flight (daemon shutdown).
    pub async fn cancel_all(&self) -> usize {
        let mut state = self.state.lock().await;
        let ids: Vec<JobId> = state.active.keys().cloned().collect();
        ids.iter()
            .filter(|id| self.cancel_locked(&mut state, id, "scheduler shutting down"))
            .count()
    }

    fn cancel_locked(&self, state: &mut OrchestratorState, job_id: &str, reason: &str) -> bool {
        let Some(slot) = state.active.get(job_id) else {
            return false;
        };
        let _ = slot.cancel_tx.send(true);
        let finished = finish_locked(
            state,
            self.config.history_limit,
            job_id,
            JobState::Cancelled,
            Some(reason.to_string()),
            None,
        );
        if let Some(job) = finished {
            info!(cluster = %self.cluster_id, job = %job.id, workload = %job.workload_id, %reason, "migration job cancelled");
        }
        true
    }

    // ── Queries ──────────────────────────────────────────────────

    /// Number of non-terminal jobs.
    pub async fn in_flight(&self) -> u32 {
        self.state.lock().await.active.len() as u32
    }

    /// Workloads owned by a non-terminal job.
    pub async fn locked_workloads(&self) -> HashSet<WorkloadId> {
        self.state.lock().await.locks.keys().cloned().collect()
    }

    /// Active jobs (oldest first), then terminal history (newest first).
    pub async fn jobs(&self) -> Vec<MigrationJob> {
        let state = self.state.lock().await;
        let mut active: Vec<MigrationJob> = state.active.values().map(|s| s.job.clone()).collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        active.extend(state.history.iter().rev().cloned());
        active
    }

    pub async fn job(&self, job_id: &str) -> Option<MigrationJob> {
        let state = self.state.lock().await;
        state
            .active
            .get(job_id)
            .map(|s| s.job.clone())
            .or_else(|| state.history.iter().find(|j| j.id == job_id).cloned())
    }

    /// Drain terminal outcomes not yet seen by the caller.
    pub async fn take_outcomes(&self) -> Vec<JobOutcome> {
        std::mem::take(&mut self.state.lock().await.outcomes)
    }

    // ── Worker ───────────────────────────────────────────────────

    async fn run_job(&self, job: MigrationJob, mut cancel_rx: watch::Receiver<bool>) {
        let max_attempts = self.config.max_attempts.max(1);

        loop {
            let Some(attempt) = self.begin_attempt(&job.id).await else {
                return;
            };
            debug!(cluster = %self.cluster_id, job = %job.id, attempt, "migration attempt started");

            let mut handle = None;
            let result = match tokio::time::timeout(
                self.config.job_timeout,
                self.attempt(&job, &mut handle, &mut cancel_rx),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(AttemptEnd::Failed(MigrationError::Timeout)),
            };

            match result {
                Ok(()) => {
                    if self.finish(&job.id, JobState::Succeeded, None).await {
                        info!(cluster = %self.cluster_id, job = %job.id, workload = %job.workload_id, attempt, "migration succeeded");
                    }
                    return;
                }
                Err(AttemptEnd::Cancelled) => {
                    self.abandon(&job, handle.as_ref()).await;
                    return;
                }
                Err(AttemptEnd::Failed(err)) => {
                    if matches!(err, MigrationError::Timeout) {
                        self.abandon(&job, handle.as_ref()).await;
                    }
                    if self.config.retry.is_transient(&err) && attempt < max_attempts {
                        warn!(
                            cluster = %self.cluster_id,
                            job = %job.id,
                            attempt,
                            kind = err.kind(),
                            error = %err,
                            "transient migration failure, re-queueing"
                        );
                        if !self.requeue(&job.id, &err).await {
                            return;
                        }
                        continue;
                    }
                    warn!(
                        cluster = %self.cluster_id,
                        job = %job.id,
                        workload = %job.workload_id,
                        attempt,
                        kind = err.kind(),
                        error = %err,
                        "migration failed"
                    );
                    self.finish(&job.id, JobState::Failed, Some(err)).await;
                    return;
                }
            }
        }
    }

    async fn attempt(
        &self,
        job: &MigrationJob,
        handle: &mut Option<MigrationHandle>,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> Result<(), AttemptEnd> {
        let started = tokio::select! {
            res = self.api.start_migration(&job.workload_id, &job.source_node, &job.target_node) => res,
            _ = cancelled(cancel_rx) => return Err(AttemptEnd::Cancelled),
        };
        let current = handle.insert(started.map_err(AttemptEnd::Failed)?).clone();

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = cancelled(cancel_rx) => return Err(AttemptEnd::Cancelled),
            }
            match self.api.poll(&current).await {
                MigrationStatus::Running => {
                    debug!(job = %job.id, handle = %current, "migration still running");
                }
                MigrationStatus::Succeeded => return Ok(()),
                MigrationStatus::Failed(err) => return Err(AttemptEnd::Failed(err)),
            }
        }
    }

    /// Ask the hypervisor to stop an attempt we no longer wait on.
    async fn abandon(&self, job: &MigrationJob, handle: Option<&MigrationHandle>) {
        let Some(handle) = handle else {
            return;
        };
        if let Err(e) = self.api.cancel(handle).await {
            warn!(cluster = %self.cluster_id, job = %job.id, %handle, error = %e, "failed to cancel migration");
        }
    }

    async fn begin_attempt(&self, job_id: &str) -> Option<u32> {
        let mut state = self.state.lock().await;
        let slot = state.active.get_mut(job_id)?;
        slot.job.state = JobState::Running;
        slot.job.attempt_count += 1;
        if slot.job.started_at.is_none() {
            slot.job.started_at = Some(epoch_secs());
        }
        Some(slot.job.attempt_count)
    }

    async fn requeue(&self, job_id: &str, err: &MigrationError) -> bool {
        let mut state = self.state.lock().await;
        let Some(slot) = state.active.get_mut(job_id) else {
            return false;
        };
        slot.job.state = JobState::Queued;
        slot.job.error = Some(err.to_string());
        true
    }

    async fn finish(&self, job_id: &str, new_state: JobState, failure: Option<MigrationError>) -> bool {
        let mut state = self.state.lock().await;
        let error = failure.as_ref().map(ToString::to_string);
        finish_locked(&mut state, self.config.history_limit, job_id, new_state, error, failure).is_some()
    }
}

/// Move a job from `active` to history, release its lock, record the outcome.
///
/// Returns `None` when the job was no longer active.
fn finish_locked(
    state: &mut OrchestratorState,
    history_limit: usize,
    job_id: &str,
    new_state: JobState,
    error: Option<String>,
    failure: Option<MigrationError>,
) -> Option<MigrationJob> {
    let slot = state.active.remove(job_id)?;
    let mut job = slot.job;
    job.state = new_state;
    job.ended_at = Some(epoch_secs());
    if new_state == JobState::Succeeded {
        job.error = None;
    } else if error.is_some() {
        job.error = error;
    }

    if state.locks.get(&job.workload_id) == Some(&job.id) {
        state.locks.remove(&job.workload_id);
    }

    state.outcomes.push(JobOutcome {
        job: job.clone(),
        failure,
    });
    if state.outcomes.len() > history_limit {
        let excess = state.outcomes.len() - history_limit;
        state.outcomes.drain(..excess);
    }

    state.history.push_back(job.clone());
    while state.history.len() > history_limit {
        state.history.pop_front();
    }

    Some(job)
}

/// Resolves once the cancel flag is set. Pends forever if the sender is
/// dropped without cancelling.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use drs_core::RecommendationStatus;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Migration API that replays scripted poll results.
    struct ScriptedApi {
        start_failures: Mutex<VecDeque<MigrationError>>,
        polls: Mutex<VecDeque<MigrationStatus>>,
        /// Returned once the script runs dry.
        fallback: MigrationStatus,
        starts: AtomicU32,
        cancels: AtomicU32,
    }

    impl ScriptedApi {
        fn new(polls: Vec<MigrationStatus>, fallback: MigrationStatus) -> Arc<Self> {
            Arc::new(Self {
                start_failures: Mutex::new(VecDeque::new()),
                polls: Mutex::new(polls.into()),
                fallback,
                starts: AtomicU32::new(0),
                cancels: AtomicU32::new(0),
            })
        }

        fn succeeding() -> Arc<Self> {
            Self::new(vec![], MigrationStatus::Succeeded)
        }

        fn hanging() -> Arc<Self> {
            Self::new(vec![], MigrationStatus::Running)
        }
    }

    #[async_trait]
    impl MigrationApi for ScriptedApi {
        async fn start_migration(
            &self,
            workload_id: &str,
            _source: &str,
            _target: &str,
        ) -> Result<MigrationHandle, MigrationError> {
            let n = self.starts.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(err) = self.start_failures.lock().await.pop_front() {
                return Err(err);
            }
            Ok(MigrationHandle(format!("{workload_id}-{n}")))
        }

        async fn poll(&self, _handle: &MigrationHandle) -> MigrationStatus {
            self.polls
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone())
        }

        async fn cancel(&self, _handle: &MigrationHandle) -> Result<(), MigrationError> {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn make_rec(workload: &str, source: &str, target: &str) -> Recommendation {
        Recommendation {
            id: Recommendation::id_for(workload, source, target),
            workload_id: workload.to_string(),
            source_node: source.to_string(),
            target_node: target.to_string(),
            predicted_score_delta: 10.0,
            reasons: vec![],
            status: RecommendationStatus::Approved,
            group: None,
        }
    }

    fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig {
            poll_interval: Duration::from_millis(5),
            job_timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    fn make_orchestrator(api: Arc<ScriptedApi>, config: OrchestratorConfig) -> Orchestrator {
        Orchestrator::new("c1", api, config)
    }

    async fn wait_terminal(orch: &Orchestrator, job_id: &str) -> MigrationJob {
        for _ in 0..600 {
            if let Some(job) = orch.job(job_id).await
                && job.state.is_terminal()
            {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {job_id} never reached a terminal state");
    }

    #[tokio::test]
    async fn successful_job_releases_lock() {
        let api = ScriptedApi::succeeding();
        let orch = make_orchestrator(api.clone(), fast_config());

        let ids = orch.admit(&[make_rec("vm-1", "n1", "n2")], 2).await.unwrap();
        assert!(orch.locked_workloads().await.contains("vm-1"));

        let job = wait_terminal(&orch, &ids[0]).await;
        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.attempt_count, 1);
        assert!(job.started_at.is_some());
        assert!(job.ended_at.is_some());
        assert!(orch.locked_workloads().await.is_empty());
        assert_eq!(orch.in_flight().await, 0);

        let outcomes = orch.take_outcomes().await;
        assert_eq!(outcomes.len(), 1);
        assert!(orch.take_outcomes().await.is_empty());
    }

    #[tokio::test]
    async fn locked_workload_is_not_admitted_twice() {
        let orch = make_orchestrator(ScriptedApi::hanging(), fast_config());

        orch.admit(&[make_rec("vm-1", "n1", "n2")], 4).await.unwrap();
        let err = orch.admit(&[make_rec("vm-1", "n1", "n3")], 4).await.unwrap_err();

        assert_eq!(err, OrchestratorError::WorkloadLocked("vm-1".into()));
        let non_terminal = orch
            .jobs()
            .await
            .into_iter()
            .filter(|j| j.workload_id == "vm-1" && !j.state.is_terminal())
            .count();
        assert_eq!(non_terminal, 1);
        orch.cancel_all().await;
    }

    #[tokio::test]
    async fn concurrency_limit_rejects_whole_unit() {
        let orch = make_orchestrator(ScriptedApi::hanging(), fast_config());
        orch.admit(&[make_rec("vm-1", "n1", "n2")], 2).await.unwrap();

        let unit = [make_rec("web-a", "x", "y"), make_rec("web-b", "x", "y")];
        let err = orch.admit(&unit, 2).await.unwrap_err();

        assert_eq!(err, OrchestratorError::ConcurrencyLimit { in_flight: 1, limit: 2 });
        assert_eq!(orch.in_flight().await, 1);
        let locked = orch.locked_workloads().await;
        assert!(!locked.contains("web-a"));
        assert!(!locked.contains("web-b"));
        orch.cancel_all().await;
    }

    #[tokio::test]
    async fn unit_members_admitted_together() {
        let orch = make_orchestrator(ScriptedApi::hanging(), fast_config());
        let unit = [make_rec("web-a", "x", "y"), make_rec("web-b", "x", "y")];

        let ids = orch.admit(&unit, 2).await.unwrap();

        assert_eq!(ids.len(), 2);
        assert_eq!(orch.in_flight().await, 2);
        assert_eq!(orch.cancel_all().await, 2);
    }

    #[tokio::test]
    async fn empty_or_duplicate_units_are_rejected() {
        let orch = make_orchestrator(ScriptedApi::succeeding(), fast_config());
        assert_eq!(orch.admit(&[], 2).await.unwrap_err(), OrchestratorError::EmptyUnit);

        let dup = [make_rec("vm-1", "n1", "n2"), make_rec("vm-1", "n1", "n3")];
        assert_eq!(
            orch.admit(&dup, 4).await.unwrap_err(),
            OrchestratorError::DuplicateWorkload("vm-1".into())
        );
    }

    #[tokio::test]
    async fn transient_failure_is_retried_once() {
        let api = ScriptedApi::new(
            vec![MigrationStatus::Failed(MigrationError::Network("reset".into()))],
            MigrationStatus::Succeeded,
        );
        let orch = make_orchestrator(api.clone(), fast_config());

        let ids = orch.admit(&[make_rec("vm-1", "n1", "n2")], 2).await.unwrap();
        let job = wait_terminal(&orch, &ids[0]).await;

        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.attempt_count, 2);
        assert_eq!(api.starts.load(Ordering::SeqCst), 2);
        assert!(job.error.is_none());
    }

    #[tokio::test]
    async fn transient_failures_exhaust_attempts() {
        let api = ScriptedApi::new(
            vec![],
            MigrationStatus::Failed(MigrationError::Unreachable("n2".into())),
        );
        let orch = make_orchestrator(api.clone(), fast_config());

        let ids = orch.admit(&[make_rec("vm-1", "n1", "n2")], 2).await.unwrap();
        let job = wait_terminal(&orch, &ids[0]).await;

        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempt_count, 2);
        assert_eq!(api.starts.load(Ordering::SeqCst), 2);
        assert!(orch.locked_workloads().await.is_empty());
    }

    #[tokio::test]
    async fn permanent_failure_is_never_retried() {
        let api = ScriptedApi::new(
            vec![MigrationStatus::Failed(MigrationError::InsufficientResources("mem".into()))],
            MigrationStatus::Succeeded,
        );
        let orch = make_orchestrator(api.clone(), fast_config());

        let ids = orch.admit(&[make_rec("vm-1", "n1", "n2")], 2).await.unwrap();
        let job = wait_terminal(&orch, &ids[0]).await;

        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempt_count, 1);
        assert_eq!(api.starts.load(Ordering::SeqCst), 1);
        assert!(job.error.as_deref().unwrap().contains("insufficient resources"));

        // Stays failed.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(orch.job(&ids[0]).await.unwrap().state, JobState::Failed);
    }

    #[tokio::test]
    async fn start_failure_counts_as_attempt() {
        let api = ScriptedApi::succeeding();
        api.start_failures
            .lock()
            .await
            .push_back(MigrationError::IncompatibleTarget("cpu flags".into()));
        let orch = make_orchestrator(api.clone(), fast_config());

        let ids = orch.admit(&[make_rec("vm-1", "n1", "n2")], 2).await.unwrap();
        let job = wait_terminal(&orch, &ids[0]).await;

        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempt_count, 1);
    }

    #[tokio::test]
    async fn rule_violation_is_reported_in_outcome() {
        let api = ScriptedApi::new(
            vec![MigrationStatus::Failed(MigrationError::RuleViolation("spread-db".into()))],
            MigrationStatus::Succeeded,
        );
        let orch = make_orchestrator(api, fast_config());

        let ids = orch.admit(&[make_rec("db-1", "n1", "n2")], 2).await.unwrap();
        wait_terminal(&orch, &ids[0]).await;

        let outcomes = orch.take_outcomes().await;
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0].failure, Some(MigrationError::RuleViolation(_))));
        assert_eq!(outcomes[0].job.recommendation_id, "rec:db-1:n1:n2");
    }

    #[tokio::test]
    async fn slow_migration_times_out() {
        let api = ScriptedApi::hanging();
        let config = OrchestratorConfig {
            job_timeout: Duration::from_millis(40),
            max_attempts: 1,
            ..fast_config()
        };
        let orch = make_orchestrator(api.clone(), config);

        let ids = orch.admit(&[make_rec("vm-1", "n1", "n2")], 2).await.unwrap();
        let job = wait_terminal(&orch, &ids[0]).await;

        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.as_deref(), Some("timeout"));
        assert!(api.cancels.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn offline_node_cancels_job() {
        let api = ScriptedApi::hanging();
        let orch = make_orchestrator(api.clone(), fast_config());

        let ids = orch.admit(&[make_rec("vm-1", "n1", "n2")], 2).await.unwrap();
        orch.admit(&[make_rec("vm-2", "n3", "n4")], 2).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let cancelled = orch.cancel_for_offline(&HashSet::from(["n2"])).await;
        assert_eq!(cancelled, vec![ids[0].clone()]);

        let job = orch.job(&ids[0]).await.unwrap();
        assert_eq!(job.state, JobState::Cancelled);
        assert_eq!(job.error.as_deref(), Some("node n2 offline"));
        assert!(!orch.locked_workloads().await.contains("vm-1"));
        assert_eq!(orch.in_flight().await, 1);

        // The worker notices and cancels on the hypervisor side.
        for _ in 0..100 {
            if api.cancels.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(api.cancels.load(Ordering::SeqCst), 1);
        orch.cancel_all().await;
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let orch = make_orchestrator(ScriptedApi::hanging(), fast_config());
        let ids = orch.admit(&[make_rec("vm-1", "n1", "n2")], 2).await.unwrap();

        assert_eq!(orch.cancel_job(&ids[0]).await, Ok(true));
        assert_eq!(orch.cancel_job(&ids[0]).await, Ok(false));
        assert_eq!(
            orch.cancel_job("missing").await,
            Err(OrchestratorError::JobNotFound("missing".into()))
        );
        assert_eq!(orch.job(&ids[0]).await.unwrap().state, JobState::Cancelled);
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let config = OrchestratorConfig {
            history_limit: 2,
            ..fast_config()
        };
        let orch = make_orchestrator(ScriptedApi::succeeding(), config);

        let mut last = String::new();
        for i in 0..3 {
            let ids = orch.admit(&[make_rec(&format!("vm-{i}"), "n1", "n2")], 2).await.unwrap();
            wait_terminal(&orch, &ids[0]).await;
            last = ids[0].clone();
        }

        let jobs = orch.jobs().await;
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, last);
    }
}
