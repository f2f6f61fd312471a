//! Route handlers for background jobs, mounted once per kind
//! (`/backtest`, `/optimize`).
//!
//! The two kinds share one handler set; each mount pins the kind so a
//! backtest job is never visible through the optimize routes and vice
//! versa.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};

use gridpilot_core::error::CoreError;
use gridpilot_core::types::{JobId, JobKind};
use gridpilot_store::models::job::{Job, JobListQuery};

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// Routes mounted at `/backtest` or `/optimize`.
///
/// ```text
/// POST   /run           -> run_job (202)
/// GET    /jobs          -> list_jobs
/// GET    /jobs/{id}     -> get_job
/// DELETE /jobs/{id}     -> cancel_job
/// GET    /results/{id}  -> job_results
/// ```
pub fn router(kind: JobKind) -> Router<AppState> {
    Router::new()
        .route("/run", post(move |state, body| run_job(state, kind, body)))
        .route("/jobs", get(move |state, query| list_jobs(state, kind, query)))
        .route(
            "/jobs/{id}",
            get(move |state, path| get_job(state, kind, path))
                .delete(move |state, path| cancel_job(state, kind, path)),
        )
        .route(
            "/results/{id}",
            get(move |state, path| job_results(state, kind, path)),
        )
}

/// POST /run -- validate, enqueue, and return the Queued job immediately.
async fn run_job(
    State(state): State<AppState>,
    kind: JobKind,
    Json(params): Json<serde_json::Value>,
) -> AppResult<(StatusCode, Json<DataResponse<Job>>)> {
    let job = state.runner.submit(kind, params).await?;
    Ok((StatusCode::ACCEPTED, Json(DataResponse::new(job))))
}

/// GET /jobs -- list this kind's jobs, newest first.
async fn list_jobs(
    State(state): State<AppState>,
    kind: JobKind,
    Query(mut query): Query<JobListQuery>,
) -> Json<DataResponse<Vec<Job>>> {
    query.kind = Some(kind);
    Json(DataResponse::new(state.jobs.list(&query).await))
}

async fn get_job(
    State(state): State<AppState>,
    kind: JobKind,
    Path(id): Path<JobId>,
) -> AppResult<Json<DataResponse<Job>>> {
    let job = require_job(&state, kind, id).await?;
    Ok(Json(DataResponse::new(job)))
}

/// DELETE /jobs/{id} -- cancel a Queued or Running job.
async fn cancel_job(
    State(state): State<AppState>,
    kind: JobKind,
    Path(id): Path<JobId>,
) -> AppResult<Json<DataResponse<Job>>> {
    require_job(&state, kind, id).await?;
    state.runner.cancel(id).await?;

    let job = require_job(&state, kind, id).await?;
    Ok(Json(DataResponse::new(job)))
}

/// GET /results/{id} -- the result payload of a Completed job.
async fn job_results(
    State(state): State<AppState>,
    kind: JobKind,
    Path(id): Path<JobId>,
) -> AppResult<Json<DataResponse<serde_json::Value>>> {
    require_job(&state, kind, id).await?;
    let result = state.runner.get_result(id).await?;
    Ok(Json(DataResponse::new(result)))
}

/// Fetch a job and hide it from the wrong kind's routes.
async fn require_job(state: &AppState, kind: JobKind, id: JobId) -> Result<Job, CoreError> {
    state
        .jobs
        .get(id)
        .await
        .filter(|job| job.kind == kind)
        .ok_or_else(|| CoreError::not_found("Job", id.to_string()))
}
