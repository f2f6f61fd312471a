//! Background tasks that run alongside the HTTP server.

pub mod metrics;
