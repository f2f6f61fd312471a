//! Gridpilot API server library.
//!
//! Exposes the building blocks (config, state, error handling, routes,
//! WebSocket streaming) so integration tests and the binary entrypoint can
//! both assemble the same application.

pub mod background;
pub mod config;
pub mod error;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;
pub mod ws;
