//! drs-api — REST API for the DRS.
//!
//! Provides axum route handlers over [`drs_controller::Drs`] for
//! querying cluster health, reviewing recommendations, and managing
//! migration jobs.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/clusters` | List managed clusters with their status |
//! | GET | `/api/v1/clusters/:id/health` | Health score and dominant dimension |
//! | GET | `/api/v1/clusters/:id/recommendations` | Latest recommendations |
//! | POST | `/api/v1/clusters/:id/recommendations/:rec/approve` | Approve (whole move unit) |
//! | POST | `/api/v1/clusters/:id/recommendations/:rec/reject` | Reject |
//! | GET | `/api/v1/clusters/:id/jobs` | Active and recent migration jobs |
//! | POST | `/api/v1/clusters/:id/jobs/:job/cancel` | Force-cancel a job |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;

use axum::Router;
use axum::routing::{get, post};
use drs_controller::Drs;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub drs: Drs,
}

/// Build the complete API router (REST + metrics).
pub fn build_router(drs: Drs) -> Router {
    let api_state = ApiState { drs };

    let api_routes = Router::new()
        .route("/clusters", get(handlers::list_clusters))
        .route("/clusters/{id}/health", get(handlers::get_health))
        .route("/clusters/{id}/recommendations", get(handlers::list_recommendations))
        .route(
            "/clusters/{id}/recommendations/{rec}/approve",
            post(handlers::approve_recommendation),
        )
        .route(
            "/clusters/{id}/recommendations/{rec}/reject",
            post(handlers::reject_recommendation),
        )
        .route("/clusters/{id}/jobs", get(handlers::list_jobs))
        .route("/clusters/{id}/jobs/{job}/cancel", post(handlers::cancel_job))
        .with_state(api_state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::prometheus_metrics).with_state(api_state))
}
