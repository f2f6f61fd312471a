//! Job entity model and DTOs.

use serde::{Deserialize, Serialize};
use gridpilot_core::types::{JobId, JobKind, JobStatus, Timestamp};

/// A background job record.
///
/// Invariants maintained by [`JobStore`](crate::JobStore):
/// - `progress` is monotonically non-decreasing while `status == Running`;
/// - `progress == 100` iff `status == Completed`;
/// - `result` is set iff `Completed`; `error` is set iff `Failed`;
/// - `completed_at` is set iff the status is terminal;
/// - terminal statuses are final (first writer wins).
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub progress: u8,
    pub params: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

/// Query parameters for listing jobs.
#[derive(Debug, Default, Deserialize)]
pub struct JobListQuery {
    /// Filter by job kind.
    pub kind: Option<JobKind>,
    /// Filter by status.
    pub status: Option<JobStatus>,
    /// Maximum number of results. Defaults to 50, capped at 200.
    pub limit: Option<usize>,
}

impl JobListQuery {
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(50).min(200)
    }
}
