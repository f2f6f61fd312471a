use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures::{Sink, SinkExt, StreamExt};

use gridpilot_core::error::CoreError;
use gridpilot_core::types::JobId;
use gridpilot_events::{ScopeKey, StreamEvent, Subscription};

use crate::error::AppResult;
use crate::state::AppState;

/// GET /ws/instances/{id}/logs -- push captured output and lifecycle events
/// of one instance. The stream ends when the process's scope is closed.
pub async fn instance_logs(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Response> {
    if state.instances.get(&id).await.is_none() {
        return Err(CoreError::not_found("Instance", id).into());
    }

    // Subscribe before the upgrade completes so no event published during
    // the handshake is missed.
    let sub = state.hub.subscribe(ScopeKey::InstanceLogs(id)).await;
    Ok(ws.on_upgrade(move |socket| stream_scope(socket, sub, None)))
}

/// GET /ws/jobs/{id}/progress -- push progress events of one job. The first
/// frame is the job's current snapshot; the stream closes once the job is
/// terminal.
pub async fn job_progress(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> AppResult<Response> {
    if state.jobs.get(id).await.is_none() {
        return Err(CoreError::not_found("Job", id.to_string()).into());
    }

    let sub = state.hub.subscribe(ScopeKey::JobProgress(id)).await;

    // Snapshot *after* subscribing: if the job went terminal in between,
    // the runner has already closed its scope and the subscribe above
    // recreated an empty topic no producer will ever close again. In that
    // case deliver the terminal snapshot directly and drop the topic.
    let job = state
        .jobs
        .get(id)
        .await
        .ok_or_else(|| CoreError::not_found("Job", id.to_string()))?;
    let snapshot = StreamEvent::new(
        "progress",
        serde_json::json!({
            "job_id": job.id,
            "status": job.status,
            "progress": job.progress,
            "error": job.error,
        }),
    );

    if job.status.is_terminal() {
        drop(sub);
        state.hub.close(&ScopeKey::JobProgress(id)).await;
        Ok(ws.on_upgrade(move |socket| send_single(socket, snapshot)))
    } else {
        Ok(ws.on_upgrade(move |socket| stream_scope(socket, sub, Some(snapshot))))
    }
}

/// GET /ws/dashboard/metrics -- push the periodic aggregate metrics samples.
pub async fn dashboard_metrics(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let sub = state.hub.subscribe(ScopeKey::Metrics).await;
    ws.on_upgrade(move |socket| stream_scope(socket, sub, None))
}

// ---------------------------------------------------------------------------
// Socket plumbing
// ---------------------------------------------------------------------------

/// Forward subscription events to the socket until the scope closes or the
/// client goes away.
///
/// Inbound frames are processed only to detect disconnects (Close, stream
/// errors); their content is ignored.
async fn stream_scope(socket: WebSocket, mut sub: Subscription, initial: Option<StreamEvent>) {
    let conn_id = uuid::Uuid::new_v4();
    tracing::debug!(conn_id = %conn_id, scope = %sub.scope(), "WebSocket connected");

    let (mut sink, mut stream) = socket.split();

    if let Some(event) = initial {
        if send_event(&mut sink, &event).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            event = sub.recv() => match event {
                Some(event) => {
                    if send_event(&mut sink, &event).await.is_err() {
                        break;
                    }
                }
                // Scope closed by the producer: tell the client and finish.
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                    break;
                }
            },
        }
    }

    tracing::debug!(conn_id = %conn_id, "WebSocket disconnected");
}

/// Deliver one event and close; used for already-terminal jobs.
async fn send_single(socket: WebSocket, event: StreamEvent) {
    let (mut sink, _stream) = socket.split();
    let _ = send_event(&mut sink, &event).await;
    let _ = sink.send(Message::Close(None)).await;
}

async fn send_event(
    sink: &mut (impl Sink<Message, Error = axum::Error> + Unpin),
    event: &StreamEvent,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize stream event");
            return Ok(());
        }
    };
    sink.send(Message::Text(text.into())).await
}
