//! Instance (bot configuration) record model and DTOs.

use serde::{Deserialize, Serialize};
use gridpilot_core::types::{EntityId, Timestamp};

/// A configured trading-bot instance.
///
/// This is the static configuration record; the live lifecycle state is
/// owned by the supervisor and computed on read, never persisted here.
#[derive(Debug, Clone, Serialize)]
pub struct Instance {
    pub id: EntityId,
    pub name: String,
    pub exchange: String,
    pub symbol: String,
    pub strategy: String,
    /// Opaque bot configuration (risk/exposure parameters etc.), merged into
    /// the spawn artifact on start.
    pub config: serde_json::Value,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for creating an instance record.
#[derive(Debug, Deserialize)]
pub struct CreateInstance {
    pub name: String,
    pub exchange: String,
    pub symbol: String,
    pub strategy: String,
    #[serde(default)]
    pub config: Option<serde_json::Value>,
}

/// DTO for updating an instance record. Absent fields are left unchanged.
#[derive(Debug, Deserialize)]
pub struct UpdateInstance {
    pub name: Option<String>,
    pub exchange: Option<String>,
    pub symbol: Option<String>,
    pub strategy: Option<String>,
    pub config: Option<serde_json::Value>,
}
