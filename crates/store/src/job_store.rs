//! The authoritative job state store.
//!
//! All job mutation flows through [`JobStore`] methods, each of which takes
//! the single write lock, checks the current status, and applies the whole
//! update in one step. Readers therefore only ever observe states that are
//! reachable by the transition rules — never a torn record, and never a
//! terminal status that is later overwritten.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use gridpilot_core::types::{JobId, JobKind, JobStatus};

use crate::models::job::{Job, JobListQuery};

/// Outcome of a cancel request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was Queued or Running and is now Cancelled.
    Cancelled,
    /// The job was already in the given terminal state; nothing changed.
    AlreadyTerminal(JobStatus),
    /// No job with that id exists.
    NotFound,
}

/// Concurrency-safe, in-memory job store.
///
/// Designed to be shared via `Arc<JobStore>` between the HTTP layer and the
/// job runner. Terminal transitions are compare-and-set against the current
/// status under the write lock: the first terminal writer wins and later
/// writers are told so via a `false` return.
pub struct JobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Create a new job in `Queued` state with progress 0.
    pub async fn create(&self, kind: JobKind, params: serde_json::Value) -> Job {
        let job = Job {
            id: Uuid::new_v4(),
            kind,
            status: JobStatus::Queued,
            progress: 0,
            params,
            result: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.jobs.write().await.insert(job.id, job.clone());
        job
    }

    /// Fetch a job by id.
    pub async fn get(&self, id: JobId) -> Option<Job> {
        self.jobs.read().await.get(&id).cloned()
    }

    /// Current status of a job, if it exists. Used by the runner as its
    /// cancellation checkpoint probe.
    pub async fn status(&self, id: JobId) -> Option<JobStatus> {
        self.jobs.read().await.get(&id).map(|j| j.status)
    }

    /// List jobs matching the query, newest first.
    pub async fn list(&self, query: &JobListQuery) -> Vec<Job> {
        let jobs = self.jobs.read().await;
        let mut matched: Vec<Job> = jobs
            .values()
            .filter(|j| query.kind.is_none_or(|k| j.kind == k))
            .filter(|j| query.status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matched.truncate(query.effective_limit());
        matched
    }

    /// Counts of `(queued, running)` jobs, for aggregate metrics.
    pub async fn active_counts(&self) -> (usize, usize) {
        let jobs = self.jobs.read().await;
        let queued = jobs.values().filter(|j| j.status == JobStatus::Queued).count();
        let running = jobs.values().filter(|j| j.status == JobStatus::Running).count();
        (queued, running)
    }

    /// CAS `Queued -> Running` with the given initial progress.
    ///
    /// Returns `false` if the job is missing or no longer Queued (e.g. it
    /// was cancelled before the runner picked it up).
    pub async fn mark_running(&self, id: JobId, initial_progress: u8) -> bool {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Queued => {
                job.status = JobStatus::Running;
                job.progress = initial_progress.min(99);
                true
            }
            _ => false,
        }
    }

    /// Record a progress checkpoint for a Running job.
    ///
    /// Progress is clamped to `0..=99` (100 is reserved for the terminal
    /// `complete` write) and is monotonic: a lower value than the current
    /// one is ignored. Returns the progress actually stored, or `None` if
    /// the job is not Running.
    pub async fn update_progress(&self, id: JobId, progress: u8) -> Option<u8> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Running => {
                job.progress = job.progress.max(progress.min(99));
                Some(job.progress)
            }
            _ => None,
        }
    }

    /// Terminal CAS `Running -> Completed` with the result payload.
    ///
    /// Sets progress to 100 and stamps `completed_at`. Returns `false` if
    /// the job is missing or not Running (e.g. already Cancelled) — the
    /// earlier terminal write stands.
    pub async fn complete(&self, id: JobId, result: serde_json::Value) -> bool {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Running => {
                job.status = JobStatus::Completed;
                job.progress = 100;
                job.result = Some(result);
                job.completed_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    /// Terminal CAS `{Queued, Running} -> Failed` with an error message.
    pub async fn fail(&self, id: JobId, error: impl Into<String>) -> bool {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&id) {
            Some(job) if !job.status.is_terminal() => {
                job.status = JobStatus::Failed;
                job.error = Some(error.into());
                job.completed_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    /// Terminal CAS `{Queued, Running} -> Cancelled`.
    pub async fn cancel(&self, id: JobId) -> CancelOutcome {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&id) {
            Some(job) if !job.status.is_terminal() => {
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(Utc::now());
                CancelOutcome::Cancelled
            }
            Some(job) => CancelOutcome::AlreadyTerminal(job.status),
            None => CancelOutcome::NotFound,
        }
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
