//! The gridpilot supervision engine.
//!
//! - [`supervisor::Supervisor`] owns the live bot processes: start, stop,
//!   status, and per-process exit monitoring.
//! - [`runner::JobRunner`] executes backtest/optimization jobs off the
//!   request path, persisting every transition through the job store.
//! - [`executor`] is the shared child-process plumbing both delegate to.

pub mod executor;
pub mod runner;
pub mod supervisor;

pub use runner::{JobRunner, ToolConfig};
pub use supervisor::{SpawnSpec, Supervisor, SupervisorConfig};
