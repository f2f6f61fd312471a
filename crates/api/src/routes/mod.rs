pub mod dashboard;
pub mod health;
pub mod instances;
pub mod jobs;

use axum::Router;

use gridpilot_core::types::JobKind;

use crate::state::AppState;
use crate::ws;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /instances                      list, create
/// /instances/{id}                 get, update, delete
/// /instances/{id}/start           start the bot process (POST)
/// /instances/{id}/stop            stop the bot process (POST)
/// /instances/{id}/status          live lifecycle state
/// /instances/{id}/logs            SSE log stream
///
/// /backtest/run                   submit a backtest job (POST, 202)
/// /backtest/jobs                  list backtest jobs
/// /backtest/jobs/{id}             get, cancel (DELETE)
/// /backtest/results/{id}          completed results
/// /optimize/...                   same shape, optimize jobs
///
/// /dashboard/stats                aggregate counts
///
/// /ws/instances/{id}/logs         WebSocket log stream
/// /ws/jobs/{id}/progress          WebSocket progress stream
/// /ws/dashboard/metrics           WebSocket metrics stream
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/instances", instances::router())
        .nest("/backtest", jobs::router(JobKind::Backtest))
        .nest("/optimize", jobs::router(JobKind::Optimize))
        .nest("/dashboard", dashboard::router())
        .nest("/ws", ws::router())
}
