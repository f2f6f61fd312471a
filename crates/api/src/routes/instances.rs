//! Route handlers for the `/instances` resource.
//!
//! Instance records are static configuration; the live lifecycle state is
//! always read from the supervisor. Start/stop delegate to the supervisor,
//! which owns the one-live-process-per-instance invariant.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream};
use serde_json::json;

use gridpilot_core::error::CoreError;
use gridpilot_engine::SpawnSpec;
use gridpilot_events::ScopeKey;
use gridpilot_store::models::instance::{CreateInstance, Instance, UpdateInstance};

use crate::config::BOT_ENTRY_SCRIPT;
use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// Routes mounted at `/instances`.
///
/// ```text
/// GET    /             -> list_instances
/// POST   /             -> create_instance
/// GET    /{id}         -> get_instance
/// PUT    /{id}         -> update_instance
/// DELETE /{id}         -> delete_instance
/// POST   /{id}/start   -> start_instance
/// POST   /{id}/stop    -> stop_instance
/// GET    /{id}/status  -> instance_status
/// GET    /{id}/logs    -> instance_logs (SSE)
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_instances).post(create_instance))
        .route(
            "/{id}",
            get(get_instance).put(update_instance).delete(delete_instance),
        )
        .route("/{id}/start", post(start_instance))
        .route("/{id}/stop", post(stop_instance))
        .route("/{id}/status", get(instance_status))
        .route("/{id}/logs", get(instance_logs))
}

async fn list_instances(State(state): State<AppState>) -> Json<DataResponse<Vec<Instance>>> {
    Json(DataResponse::new(state.instances.list().await))
}

async fn create_instance(
    State(state): State<AppState>,
    Json(input): Json<CreateInstance>,
) -> AppResult<(StatusCode, Json<DataResponse<Instance>>)> {
    if input.name.trim().is_empty() {
        return Err(CoreError::Validation("name must not be empty".into()).into());
    }
    let instance = state.instances.create(input).await;
    tracing::info!(instance_id = %instance.id, name = %instance.name, "Instance created");
    Ok((StatusCode::CREATED, Json(DataResponse::new(instance))))
}

async fn get_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<DataResponse<Instance>>> {
    let instance = require_instance(&state, &id).await?;
    Ok(Json(DataResponse::new(instance)))
}

async fn update_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<UpdateInstance>,
) -> AppResult<Json<DataResponse<Instance>>> {
    let updated = state
        .instances
        .update(&id, input)
        .await
        .ok_or_else(|| CoreError::not_found("Instance", &id))?;
    Ok(Json(DataResponse::new(updated)))
}

/// Deleting a record also stops its process (if any) and removes its config
/// artifact.
async fn delete_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    require_instance(&state, &id).await?;
    state.supervisor.stop(&id).await?;
    state.supervisor.delete_artifact(&id).await;
    state.instances.delete(&id).await;
    tracing::info!(instance_id = %id, "Instance deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn start_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<DataResponse<serde_json::Value>>> {
    let instance = require_instance(&state, &id).await?;
    state.supervisor.start(&id, spawn_spec(&state, &instance)).await?;

    let status = state.supervisor.status(&id).await;
    Ok(Json(DataResponse::new(json!({ "id": id, "state": status }))))
}

async fn stop_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<DataResponse<serde_json::Value>>> {
    require_instance(&state, &id).await?;
    state.supervisor.stop(&id).await?;

    let status = state.supervisor.status(&id).await;
    Ok(Json(DataResponse::new(json!({ "id": id, "state": status }))))
}

async fn instance_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<DataResponse<serde_json::Value>>> {
    require_instance(&state, &id).await?;
    let status = state.supervisor.status(&id).await;
    let pid = state.supervisor.pid(&id).await;
    Ok(Json(DataResponse::new(json!({
        "id": id,
        "state": status,
        "pid": pid,
    }))))
}

/// GET /{id}/logs -- SSE stream of captured process output and lifecycle
/// events. Ends when the instance's hub scope is closed (process exit) or
/// the consumer disconnects; a 1s keep-alive bounds dead-consumer detection.
async fn instance_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    require_instance(&state, &id).await?;

    let sub = state.hub.subscribe(ScopeKey::InstanceLogs(id)).await;
    let stream = stream::unfold(sub, |mut sub| async move {
        let event = sub.recv().await?;
        let sse = Event::default()
            .event(event.kind.clone())
            .json_data(&event)
            .unwrap_or_else(|_| Event::default().comment("unserializable event"));
        Some((Ok::<_, Infallible>(sse), sub))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(1))))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn require_instance(state: &AppState, id: &str) -> Result<Instance, CoreError> {
    state
        .instances
        .get(id)
        .await
        .ok_or_else(|| CoreError::not_found("Instance", id))
}

/// Build the spawn spec for an instance: the bot entry script under the
/// configured bot directory, with the record's identity fields merged into
/// its opaque config payload.
fn spawn_spec(state: &AppState, instance: &Instance) -> SpawnSpec {
    let mut config = match &instance.config {
        serde_json::Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    config.insert("name".into(), json!(instance.name));
    config.insert("exchange".into(), json!(instance.exchange));
    config.insert("symbol".into(), json!(instance.symbol));
    config.insert("strategy".into(), json!(instance.strategy));

    SpawnSpec {
        program: state.config.python_bin.clone(),
        args: vec![state
            .config
            .bot_dir
            .join(BOT_ENTRY_SCRIPT)
            .display()
            .to_string()],
        working_dir: state.config.bot_dir.clone(),
        config: serde_json::Value::Object(config),
    }
}
