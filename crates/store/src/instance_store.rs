//! Instance record CRUD.
//!
//! Stand-in for the external configuration-record collaborator. The
//! supervisor only ever sees the snapshot handed to it at start time, so
//! this store can be swapped for a persistent one without touching the
//! engine.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use gridpilot_core::types::EntityId;

use crate::models::instance::{CreateInstance, Instance, UpdateInstance};

pub struct InstanceStore {
    instances: RwLock<HashMap<EntityId, Instance>>,
}

impl InstanceStore {
    pub fn new() -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
        }
    }

    pub async fn create(&self, input: CreateInstance) -> Instance {
        let now = Utc::now();
        let instance = Instance {
            id: Uuid::new_v4().to_string(),
            name: input.name,
            exchange: input.exchange,
            symbol: input.symbol,
            strategy: input.strategy,
            config: input.config.unwrap_or_else(|| serde_json::json!({})),
            created_at: now,
            updated_at: now,
        };
        self.instances
            .write()
            .await
            .insert(instance.id.clone(), instance.clone());
        instance
    }

    pub async fn get(&self, id: &str) -> Option<Instance> {
        self.instances.read().await.get(id).cloned()
    }

    /// List all instances, newest first.
    pub async fn list(&self) -> Vec<Instance> {
        let mut all: Vec<Instance> = self.instances.read().await.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    pub async fn count(&self) -> usize {
        self.instances.read().await.len()
    }

    /// Apply a partial update. Returns the updated record, or `None` if the
    /// instance does not exist.
    pub async fn update(&self, id: &str, input: UpdateInstance) -> Option<Instance> {
        let mut instances = self.instances.write().await;
        let instance = instances.get_mut(id)?;
        if let Some(name) = input.name {
            instance.name = name;
        }
        if let Some(exchange) = input.exchange {
            instance.exchange = exchange;
        }
        if let Some(symbol) = input.symbol {
            instance.symbol = symbol;
        }
        if let Some(strategy) = input.strategy {
            instance.strategy = strategy;
        }
        if let Some(config) = input.config {
            instance.config = config;
        }
        instance.updated_at = Utc::now();
        Some(instance.clone())
    }

    /// Delete a record. Returns `true` if it existed.
    pub async fn delete(&self, id: &str) -> bool {
        self.instances.write().await.remove(id).is_some()
    }
}

impl Default for InstanceStore {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
