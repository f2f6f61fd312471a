//! Domain types and pure logic shared across the gridpilot workspace.
//!
//! Everything here is free of I/O except [`artifact`], which performs the
//! atomic config-file writes handed to external executables. The process
//! supervisor and job runner live in `gridpilot-engine`; HTTP concerns live
//! in `gridpilot-api`.

pub mod artifact;
pub mod error;
pub mod params;
pub mod progress;
pub mod types;

pub use error::CoreError;
