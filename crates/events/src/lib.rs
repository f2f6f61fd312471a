//! Live-status fan-out for gridpilot.
//!
//! [`StatusHub`] broadcasts process log lines, job progress, and aggregate
//! metrics to any number of subscribers per scope, without ever blocking the
//! producers.

pub mod hub;

pub use hub::{ScopeKey, StatusHub, StreamEvent, Subscription};
