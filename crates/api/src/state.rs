use std::sync::Arc;

use gridpilot_engine::{JobRunner, Supervisor};
use gridpilot_events::StatusHub;
use gridpilot_store::{InstanceStore, JobStore};

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via
/// `State<AppState>`.
///
/// Cheap to clone; every field is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Process supervisor for live bot instances.
    pub supervisor: Arc<Supervisor>,
    /// Background job runner (backtests, optimizations).
    pub runner: Arc<JobRunner>,
    /// Authoritative job state store.
    pub jobs: Arc<JobStore>,
    /// Instance configuration records.
    pub instances: Arc<InstanceStore>,
    /// Live-status fan-out hub.
    pub hub: Arc<StatusHub>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Wire up a complete application state from configuration.
    pub fn new(config: ServerConfig) -> Self {
        let hub = Arc::new(StatusHub::default());
        let jobs = Arc::new(JobStore::new());
        let supervisor = Arc::new(Supervisor::new(
            Arc::clone(&hub),
            config.supervisor_config(),
        ));
        let runner = JobRunner::new(Arc::clone(&jobs), Arc::clone(&hub), config.tool_config());

        Self {
            supervisor,
            runner,
            jobs,
            instances: Arc::new(InstanceStore::new()),
            hub,
            config: Arc::new(config),
        }
    }
}
