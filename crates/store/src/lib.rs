//! In-memory stores for gridpilot.
//!
//! [`JobStore`] is the single source of truth for job state: every mutation
//! goes through it and becomes visible to readers atomically. The instance
//! record store is a stand-in for the external CRUD collaborator that holds
//! static bot configuration; the supervisor never depends on its internals.

pub mod instance_store;
pub mod job_store;
pub mod models;

pub use instance_store::InstanceStore;
pub use job_store::JobStore;
