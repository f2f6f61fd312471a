//! WebSocket streaming endpoints.
//!
//! Each endpoint subscribes to one hub scope and pushes its events to the
//! client as JSON text frames. Inbound frames are liveness signals only.

pub mod handler;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;

/// Routes mounted at `/ws`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/instances/{id}/logs", get(handler::instance_logs))
        .route("/jobs/{id}/progress", get(handler::job_progress))
        .route("/dashboard/metrics", get(handler::dashboard_metrics))
}
