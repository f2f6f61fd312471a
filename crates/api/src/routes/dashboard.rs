//! Dashboard aggregate endpoints.

use axum::extract::State;
use axum::{routing::get, Json, Router};

use crate::background::metrics::{self, MetricsSnapshot};
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /stats -- the same aggregate snapshot the metrics stream pushes,
/// sampled on demand.
async fn stats(State(state): State<AppState>) -> Json<DataResponse<MetricsSnapshot>> {
    Json(DataResponse::new(metrics::collect(&state).await))
}

/// Routes mounted at `/dashboard`.
pub fn router() -> Router<AppState> {
    Router::new().route("/stats", get(stats))
}
