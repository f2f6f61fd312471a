//! Asynchronous job execution.
//!
//! [`JobRunner`] accepts backtest/optimize submissions, returns immediately,
//! and performs the work on a dedicated task by delegating to the external
//! tool for the job's kind. Every state change is written through the
//! [`JobStore`] before it is published to the hub, so API readers and
//! stream subscribers can never observe a state the store does not hold.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use gridpilot_core::artifact;
use gridpilot_core::error::CoreError;
use gridpilot_core::params::validate_params;
use gridpilot_core::progress::PROGRESS_STARTED;
use gridpilot_core::types::{JobId, JobKind, JobStatus};
use gridpilot_events::{ScopeKey, StatusHub, StreamEvent};
use gridpilot_store::job_store::CancelOutcome;
use gridpilot_store::models::job::Job;
use gridpilot_store::JobStore;

use crate::executor::{run_tool, ToolInvocation, ToolRun};

// ---------------------------------------------------------------------------
// ToolConfig
// ---------------------------------------------------------------------------

/// Paths of the external computation tools.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    /// Interpreter used to launch the tool scripts.
    pub python: PathBuf,
    /// Directory containing `backtest.py` / `optimize.py`; also the tools'
    /// working directory.
    pub bot_dir: PathBuf,
    /// Directory for per-job parameter artifacts.
    pub artifact_dir: PathBuf,
}

// ---------------------------------------------------------------------------
// JobRunner
// ---------------------------------------------------------------------------

pub struct JobRunner {
    store: Arc<JobStore>,
    hub: Arc<StatusHub>,
    tools: ToolConfig,
    /// Cancellation token per in-flight job, tripped by [`cancel`].
    ///
    /// [`cancel`]: JobRunner::cancel
    cancellations: RwLock<HashMap<JobId, CancellationToken>>,
}

impl JobRunner {
    pub fn new(store: Arc<JobStore>, hub: Arc<StatusHub>, tools: ToolConfig) -> Arc<Self> {
        Arc::new(Self {
            store,
            hub,
            tools,
            cancellations: RwLock::new(HashMap::new()),
        })
    }

    /// Validate and enqueue a job, returning it in `Queued` state.
    ///
    /// Never blocks on the job's actual work: execution happens on a
    /// spawned task.
    pub async fn submit(
        self: &Arc<Self>,
        kind: JobKind,
        params: serde_json::Value,
    ) -> Result<Job, CoreError> {
        validate_params(kind, &params)?;

        let job = self.store.create(kind, params).await;
        let token = CancellationToken::new();
        self.cancellations.write().await.insert(job.id, token.clone());

        let runner = Arc::clone(self);
        let job_id = job.id;
        tokio::spawn(async move {
            runner.run_job(job_id, kind, token).await;
        });

        tracing::info!(job_id = %job.id, kind = %kind, "Job submitted");
        Ok(job)
    }

    /// Request cancellation of a Queued or Running job.
    ///
    /// The terminal `Cancelled` status is written first (first-writer-wins
    /// against a racing completion); the executing task observes it at its
    /// next checkpoint and stops promptly.
    pub async fn cancel(&self, job_id: JobId) -> Result<(), CoreError> {
        match self.store.cancel(job_id).await {
            CancelOutcome::Cancelled => {
                if let Some(token) = self.cancellations.read().await.get(&job_id) {
                    token.cancel();
                }
                tracing::info!(job_id = %job_id, "Job cancelled");
                Ok(())
            }
            CancelOutcome::AlreadyTerminal(status) => Err(CoreError::Conflict(format!(
                "job is already {status} and cannot be cancelled"
            ))),
            CancelOutcome::NotFound => Err(CoreError::not_found("Job", job_id.to_string())),
        }
    }

    /// Fetch a completed job's result payload.
    pub async fn get_result(&self, job_id: JobId) -> Result<serde_json::Value, CoreError> {
        let job = self
            .store
            .get(job_id)
            .await
            .ok_or_else(|| CoreError::not_found("Job", job_id.to_string()))?;

        if job.status != JobStatus::Completed {
            return Err(CoreError::NotReady { job_id });
        }
        job.result
            .ok_or_else(|| CoreError::Internal("completed job has no result".into()))
    }

    // -- execution ----------------------------------------------------------

    async fn run_job(self: Arc<Self>, job_id: JobId, kind: JobKind, token: CancellationToken) {
        if !self.store.mark_running(job_id, PROGRESS_STARTED).await {
            // Cancelled while still queued; nothing ran.
            self.finish_stream(job_id).await;
            self.cancellations.write().await.remove(&job_id);
            return;
        }
        self.publish_progress(job_id).await;

        let outcome = self.execute(job_id, kind, &token).await;

        match outcome {
            Ok(ToolRun::Finished {
                exit_code: 0,
                result: Some(result),
                ..
            }) => {
                // CAS: loses silently if a cancellation won the race.
                if self.store.complete(job_id, result).await {
                    tracing::info!(job_id = %job_id, "Job completed");
                }
            }
            Ok(ToolRun::Finished {
                exit_code: 0,
                result: None,
                ..
            }) => {
                self.fail(job_id, "tool produced no parsable result").await;
            }
            Ok(ToolRun::Finished {
                exit_code, stderr, ..
            }) => {
                let detail = stderr.lines().last().unwrap_or("").trim();
                let message = if detail.is_empty() {
                    format!("tool exited with code {exit_code}")
                } else {
                    format!("tool exited with code {exit_code}: {detail}")
                };
                self.fail(job_id, message).await;
            }
            Ok(ToolRun::Cancelled) => {
                tracing::info!(job_id = %job_id, "Job execution stopped after cancellation");
            }
            Err(e) => {
                self.fail(job_id, e.to_string()).await;
            }
        }

        artifact::remove_config_artifact(&self.tools.artifact_dir, &artifact_name(job_id)).await;
        self.cancellations.write().await.remove(&job_id);
        self.finish_stream(job_id).await;
    }

    async fn execute(
        &self,
        job_id: JobId,
        kind: JobKind,
        token: &CancellationToken,
    ) -> Result<ToolRun, CoreError> {
        let params = self
            .store
            .get(job_id)
            .await
            .map(|j| j.params)
            .ok_or_else(|| CoreError::Internal("job disappeared from store".into()))?;

        let artifact_path = artifact::write_config_artifact(
            &self.tools.artifact_dir,
            &artifact_name(job_id),
            &params,
        )
        .await?;

        let script = self.tools.bot_dir.join(kind.tool_script());
        let inv = ToolInvocation {
            program: self.tools.python.clone(),
            args: vec![
                script.display().to_string(),
                "--config".into(),
                artifact_path.display().to_string(),
            ],
            working_dir: self.tools.bot_dir.clone(),
        };

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let exec = run_tool(inv, token.clone(), progress_tx);
        tokio::pin!(exec);

        let outcome = loop {
            tokio::select! {
                outcome = &mut exec => break outcome,
                Some(p) = progress_rx.recv() => self.checkpoint(job_id, p, token).await,
            }
        };
        // Flush reports that raced with tool completion.
        while let Ok(p) = progress_rx.try_recv() {
            self.checkpoint(job_id, p, token).await;
        }

        outcome
    }

    /// One progress checkpoint: observe the cancellation flag, persist the
    /// (monotonic, clamped) progress, then fan it out.
    async fn checkpoint(&self, job_id: JobId, progress: u8, token: &CancellationToken) {
        if self.store.status(job_id).await == Some(JobStatus::Cancelled) {
            token.cancel();
            return;
        }
        if self.store.update_progress(job_id, progress).await.is_some() {
            self.publish_progress(job_id).await;
        }
    }

    /// Publish the job's current store state to its progress scope.
    async fn publish_progress(&self, job_id: JobId) {
        if let Some(job) = self.store.get(job_id).await {
            self.hub
                .publish(
                    &ScopeKey::JobProgress(job_id),
                    StreamEvent::new(
                        "progress",
                        serde_json::json!({
                            "job_id": job.id,
                            "status": job.status,
                            "progress": job.progress,
                            "error": job.error,
                        }),
                    ),
                )
                .await;
        }
    }

    async fn fail(&self, job_id: JobId, message: impl Into<String>) {
        let message = message.into();
        if self.store.fail(job_id, message.clone()).await {
            tracing::warn!(job_id = %job_id, error = %message, "Job failed");
        }
    }

    /// Publish the terminal snapshot and close the progress scope: the last
    /// event a subscriber sees is the terminal state, then the stream ends.
    async fn finish_stream(&self, job_id: JobId) {
        self.publish_progress(job_id).await;
        self.hub.close(&ScopeKey::JobProgress(job_id)).await;
    }
}

fn artifact_name(job_id: JobId) -> String {
    format!("job-{job_id}")
}
