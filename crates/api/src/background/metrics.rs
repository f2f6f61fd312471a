//! Periodic dashboard metrics publisher.
//!
//! Samples aggregate counts from the supervisor and the stores and publishes
//! them to the hub's metrics scope on a fixed interval, so dashboard
//! subscribers get a push stream without polling the HTTP API.

use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use gridpilot_events::{ScopeKey, StreamEvent};

use crate::state::AppState;

/// One aggregate metrics sample.
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    /// Total instance records.
    pub instances: usize,
    /// Instances with a live supervised process.
    pub running_instances: usize,
    /// Jobs waiting to start.
    pub queued_jobs: usize,
    /// Jobs currently executing.
    pub running_jobs: usize,
    /// Open hub scopes (live streams).
    pub open_streams: usize,
}

/// Sample the current aggregate counts.
pub async fn collect(state: &AppState) -> MetricsSnapshot {
    let (queued_jobs, running_jobs) = state.jobs.active_counts().await;
    MetricsSnapshot {
        instances: state.instances.count().await,
        running_instances: state.supervisor.running_count().await,
        queued_jobs,
        running_jobs,
        open_streams: state.hub.scope_count().await,
    }
}

/// Spawn the metrics publisher task. Runs until `cancel` is tripped.
pub fn start(state: AppState, cancel: CancellationToken) -> JoinHandle<()> {
    let period = Duration::from_secs(state.config.metrics_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancel.cancelled() => break,
            }

            let snapshot = collect(&state).await;
            let payload = match serde_json::to_value(&snapshot) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize metrics snapshot");
                    continue;
                }
            };
            state
                .hub
                .publish(&ScopeKey::Metrics, StreamEvent::new("metrics", payload))
                .await;
        }
        tracing::info!("Metrics publisher stopped");
    })
}
