//! Core identifier and lifecycle-state types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier of a supervised instance (user-assigned, opaque).
pub type EntityId = String;

/// Identifier of an asynchronous job.
pub type JobId = Uuid;

/// UTC timestamp used throughout the workspace.
pub type Timestamp = DateTime<Utc>;

// ---------------------------------------------------------------------------
// ProcessState
// ---------------------------------------------------------------------------

/// Lifecycle state of a supervised external process.
///
/// Transitions: `Stopped → Starting → Running → Stopping → Stopped` on the
/// happy path. An unexpected exit forces `Running → Failed` (non-zero exit)
/// or `Running → Stopped` (clean exit) and releases the supervisor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl ProcessState {
    /// Whether a new start request must be rejected in this state.
    ///
    /// Only `Stopped` and `Failed` entities may be (re)started.
    pub fn blocks_start(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// JobKind / JobStatus
// ---------------------------------------------------------------------------

/// The kind of background computation a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Backtest,
    Optimize,
}

impl JobKind {
    /// Name of the external tool script that performs this kind of work,
    /// relative to the configured bot directory.
    pub fn tool_script(self) -> &'static str {
        match self {
            Self::Backtest => "backtest.py",
            Self::Optimize => "optimize.py",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Backtest => f.write_str("backtest"),
            Self::Optimize => f.write_str("optimize"),
        }
    }
}

/// Lifecycle status of a job.
///
/// `Completed`, `Failed`, and `Cancelled` are terminal: once written, no
/// further mutation is permitted (first terminal writer wins).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ExitReason
// ---------------------------------------------------------------------------

/// Why a supervised process exited, recorded by the exit monitor for later
/// inspection through `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "reason")]
pub enum ExitReason {
    /// The process exited with code zero.
    Clean,
    /// The process exited with a non-zero code (carried when known).
    Error { code: Option<i32> },
}

impl ExitReason {
    /// The lifecycle state an exited entity reports.
    pub fn final_state(self) -> ProcessState {
        match self {
            Self::Clean => ProcessState::Stopped,
            Self::Error { .. } => ProcessState::Failed,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_start_covers_live_states() {
        assert!(ProcessState::Starting.blocks_start());
        assert!(ProcessState::Running.blocks_start());
        assert!(ProcessState::Stopping.blocks_start());
        assert!(!ProcessState::Stopped.blocks_start());
        assert!(!ProcessState::Failed.blocks_start());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn exit_reason_maps_to_final_state() {
        assert_eq!(ExitReason::Clean.final_state(), ProcessState::Stopped);
        assert_eq!(
            ExitReason::Error { code: Some(1) }.final_state(),
            ProcessState::Failed
        );
    }

    #[test]
    fn states_serialize_lowercase() {
        assert_eq!(
            serde_json::to_string(&ProcessState::Running).unwrap(),
            "\"running\""
        );
        assert_eq!(
            serde_json::to_string(&JobStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
    }
}
