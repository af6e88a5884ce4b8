//! REST API handlers.
//!
//! Each handler resolves the cluster through `Drs` and returns JSON
//! responses wrapped in [`ApiResponse`].

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use drs_controller::{ClusterHandle, ClusterStatus, ControllerError, Dimension};
use drs_orchestrator::OrchestratorError;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn controller_error(e: &ControllerError) -> axum::response::Response {
    let status = match e {
        ControllerError::RecommendationNotFound(_)
        | ControllerError::Orchestrator(OrchestratorError::JobNotFound(_)) => StatusCode::NOT_FOUND,
        ControllerError::ManualMode(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status).into_response()
}

fn find_cluster(state: &ApiState, id: &str) -> Result<ClusterHandle, axum::response::Response> {
    state
        .drs
        .cluster(id)
        .ok_or_else(|| error_response("cluster not found", StatusCode::NOT_FOUND).into_response())
}

// ── Clusters ───────────────────────────────────────────────────

/// GET /api/v1/clusters
pub async fn list_clusters(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.drs.statuses().await)
}

/// Health view of one cluster.
#[derive(Debug, serde::Serialize)]
pub struct HealthResponse {
    pub cluster_id: String,
    pub score: Option<f64>,
    pub dominant: Dimension,
    pub eligible_nodes: u32,
    pub computed_at: Option<u64>,
    pub stale_since: Option<u64>,
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl From<ClusterStatus> for HealthResponse {
    fn from(s: ClusterStatus) -> Self {
        Self {
            cluster_id: s.cluster_id,
            score: s.score,
            dominant: s.dominant,
            eligible_nodes: s.eligible_nodes,
            computed_at: s.computed_at,
            stale_since: s.stale_since,
            degraded: s.degraded,
            last_error: s.last_error,
        }
    }
}

/// GET /api/v1/clusters/:id/health
pub async fn get_health(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match find_cluster(&state, &id) {
        Ok(cluster) => ApiResponse::ok(HealthResponse::from(cluster.status().await)).into_response(),
        Err(resp) => resp,
    }
}

// ── Recommendations ────────────────────────────────────────────

/// GET /api/v1/clusters/:id/recommendations
pub async fn list_recommendations(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match find_cluster(&state, &id) {
        Ok(cluster) => ApiResponse::ok(cluster.recommendations().await).into_response(),
        Err(resp) => resp,
    }
}

/// POST /api/v1/clusters/:id/recommendations/:rec/approve
pub async fn approve_recommendation(
    State(state): State<ApiState>,
    Path((id, rec)): Path<(String, String)>,
) -> impl IntoResponse {
    let cluster = match find_cluster(&state, &id) {
        Ok(cluster) => cluster,
        Err(resp) => return resp,
    };
    match cluster.approve(&rec).await {
        Ok(approved) => ApiResponse::ok(approved).into_response(),
        Err(e) => controller_error(&e),
    }
}

/// POST /api/v1/clusters/:id/recommendations/:rec/reject
pub async fn reject_recommendation(
    State(state): State<ApiState>,
    Path((id, rec)): Path<(String, String)>,
) -> impl IntoResponse {
    let cluster = match find_cluster(&state, &id) {
        Ok(cluster) => cluster,
        Err(resp) => return resp,
    };
    match cluster.reject(&rec).await {
        Ok(rejected) => ApiResponse::ok(rejected).into_response(),
        Err(e) => controller_error(&e),
    }
}

// ── Jobs ───────────────────────────────────────────────────────

/// GET /api/v1/clusters/:id/jobs
pub async fn list_jobs(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match find_cluster(&state, &id) {
        Ok(cluster) => ApiResponse::ok(cluster.jobs().await).into_response(),
        Err(resp) => resp,
    }
}

/// POST /api/v1/clusters/:id/jobs/:job/cancel
pub async fn cancel_job(
    State(state): State<ApiState>,
    Path((id, job)): Path<(String, String)>,
) -> impl IntoResponse {
    let cluster = match find_cluster(&state, &id) {
        Ok(cluster) => cluster,
        Err(resp) => return resp,
    };
    match cluster.cancel_job(&job).await {
        Ok(cancelled) => ApiResponse::ok(serde_json::json!({
            "job": job,
            "cancelled": cancelled,
        }))
        .into_response(),
        Err(e) => controller_error(&e),
    }
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let statuses = state.drs.statuses().await;
    let body = drs_metrics::render_prometheus(&statuses);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use drs_controller::{ClusterController, Drs, MemorySource};
    use drs_core::{ClusterSnapshot, DrsMode, DrsSettings, NodeMetrics, NodeStatus, Workload};
    use drs_orchestrator::{DryRunMigrationApi, Orchestrator, OrchestratorConfig};

    fn make_node(id: &str, cpu: f64) -> NodeMetrics {
        NodeMetrics {
            node_id: id.to_string(),
            status: NodeStatus::Online,
            cpu_pct: cpu,
            mem_pct: 50.0,
            workload_count: 1,
            running_workload_count: 1,
            group: None,
        }
    }

    fn make_workload(id: &str, node: &str, cpu: f64) -> Workload {
        Workload {
            id: id.to_string(),
            current_node: node.to_string(),
            cpu_weight: cpu,
            mem_weight: 0.0,
            tags: Default::default(),
            pool: None,
            locked: false,
        }
    }

    async fn ticked_controller(cluster_id: &str, mode: DrsMode) -> ClusterController {
        let source = Arc::new(MemorySource::new());
        source
            .set_snapshot(ClusterSnapshot::new(
                cluster_id,
                1000,
                vec![make_node("n1", 90.0), make_node("n2", 50.0), make_node("n3", 10.0)],
                vec![make_workload("vm-a", "n1", 20.0), make_workload("vm-b", "n1", 30.0)],
            ))
            .await;
        source
            .set_settings(
                cluster_id,
                DrsSettings {
                    mode,
                    min_improvement_pct: 1.0,
                    ..Default::default()
                },
            )
            .await;
        let orchestrator = Orchestrator::new(
            cluster_id,
            Arc::new(DryRunMigrationApi::new(u32::MAX)),
            OrchestratorConfig::default(),
        );
        let controller = ClusterController::new(cluster_id, source.clone(), source.clone(), source, orchestrator);
        controller.tick().await.unwrap();
        controller
    }

    /// "c1" in partial mode and "lab" in manual mode, both ticked once.
    async fn test_state() -> (ApiState, String) {
        let c1 = ticked_controller("c1", DrsMode::Partial).await;
        let rec_id = c1.handle().recommendations().await[0].id.clone();
        let lab = ticked_controller("lab", DrsMode::Manual).await;

        let mut drs = Drs::new();
        drs.add_cluster(c1);
        drs.add_cluster(lab);
        (ApiState { drs }, rec_id)
    }

    #[tokio::test]
    async fn list_clusters_ok() {
        let (state, _) = test_state().await;
        let resp = list_clusters(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_of_unknown_cluster() {
        let (state, _) = test_state().await;
        let resp = get_health(State(state), Path("nope".to_string())).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn approve_in_partial_mode() {
        let (state, rec_id) = test_state().await;
        let resp = approve_recommendation(State(state.clone()), Path(("c1".to_string(), rec_id)))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn approve_unknown_recommendation() {
        let (state, _) = test_state().await;
        let resp = approve_recommendation(State(state), Path(("c1".to_string(), "rec-missing".to_string())))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn approve_refused_in_manual_mode() {
        let (state, _) = test_state().await;
        let rec_id = state.drs.cluster("lab").unwrap().recommendations().await[0].id.clone();
        let resp = approve_recommendation(State(state), Path(("lab".to_string(), rec_id)))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn reject_recommendation_ok() {
        let (state, rec_id) = test_state().await;
        let resp = reject_recommendation(State(state), Path(("c1".to_string(), rec_id)))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn cancel_unknown_job() {
        let (state, _) = test_state().await;
        let resp = cancel_job(State(state), Path(("c1".to_string(), "c1-job-999999".to_string())))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn prometheus_endpoint_returns_text() {
        let (state, _) = test_state().await;
        let resp = prometheus_metrics(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.contains("text/plain"));
    }
}
