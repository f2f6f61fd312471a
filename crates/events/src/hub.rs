//! Scope-keyed publish/subscribe hub backed by `tokio::sync::broadcast`.
//!
//! Each scope owns one broadcast channel. Publishing never blocks: a slow
//! subscriber lags and loses its *oldest* buffered events (bounded
//! staleness) while other subscribers of the same or different scopes are
//! unaffected. A scope is explicitly closed by its producer once the
//! underlying job or process reaches a terminal state, which ends every
//! subscriber stream for that scope.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::RwLock;
use uuid::Uuid;

use gridpilot_core::types::EntityId;

/// Default per-subscriber buffer capacity.
const DEFAULT_CAPACITY: usize = 100;

// ---------------------------------------------------------------------------
// ScopeKey / StreamEvent
// ---------------------------------------------------------------------------

/// Identifier partitioning the event-stream namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeKey {
    /// Captured output and lifecycle events of one supervised instance.
    InstanceLogs(EntityId),
    /// Progress events of one job.
    JobProgress(Uuid),
    /// Aggregate dashboard metrics.
    Metrics,
}

impl std::fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InstanceLogs(id) => write!(f, "instance:{id}"),
            Self::JobProgress(id) => write!(f, "job:{id}"),
            Self::Metrics => f.write_str("metrics"),
        }
    }
}

/// One event delivered to subscribers of a scope.
#[derive(Debug, Clone, Serialize)]
pub struct StreamEvent {
    /// Event kind, e.g. `"log"`, `"state"`, `"progress"`, `"metrics"`.
    pub kind: String,
    /// Event-specific JSON payload.
    pub payload: serde_json::Value,
    /// When the event was published (UTC).
    pub timestamp: DateTime<Utc>,
}

impl StreamEvent {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            timestamp: Utc::now(),
        }
    }

    /// A captured process output line.
    pub fn log(line: impl Into<String>) -> Self {
        Self::new("log", serde_json::json!({ "line": line.into() }))
    }
}

// ---------------------------------------------------------------------------
// StatusHub
// ---------------------------------------------------------------------------

/// In-process fan-out hub, shared via `Arc<StatusHub>`.
pub struct StatusHub {
    topics: RwLock<HashMap<ScopeKey, broadcast::Sender<StreamEvent>>>,
    capacity: usize,
}

impl StatusHub {
    /// Create a hub with a specific per-subscriber buffer capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Publish an event to every current subscriber of `scope`.
    ///
    /// Non-blocking. With zero subscribers the event is silently dropped;
    /// a topic whose last subscriber has disconnected is pruned here so
    /// abandoned scopes do not accumulate.
    pub async fn publish(&self, scope: &ScopeKey, event: StreamEvent) {
        let delivered = {
            let topics = self.topics.read().await;
            match topics.get(scope) {
                Some(tx) => tx.send(event).is_ok(),
                None => return,
            }
        };

        if !delivered {
            let mut topics = self.topics.write().await;
            if topics.get(scope).is_some_and(|tx| tx.receiver_count() == 0) {
                topics.remove(scope);
                tracing::debug!(scope = %scope, "Pruned idle hub scope");
            }
        }
    }

    /// Register a new subscriber for `scope`.
    ///
    /// Events published from this point on are buffered (up to the hub
    /// capacity) until the subscriber consumes them.
    pub async fn subscribe(&self, scope: ScopeKey) -> Subscription {
        let mut topics = self.topics.write().await;
        let tx = topics
            .entry(scope.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        Subscription {
            rx: tx.subscribe(),
            scope,
            connected_at: Utc::now(),
        }
    }

    /// Close a scope, ending every subscriber stream for it.
    ///
    /// Called by producers when the underlying job reaches a terminal state
    /// or the process is confirmed stopped. Idempotent.
    pub async fn close(&self, scope: &ScopeKey) {
        if self.topics.write().await.remove(scope).is_some() {
            tracing::debug!(scope = %scope, "Closed hub scope");
        }
    }

    /// Number of currently open scopes (diagnostics and tests).
    pub async fn scope_count(&self) -> usize {
        self.topics.read().await.len()
    }
}

impl Default for StatusHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// A live consumer of one scope's events.
///
/// Dropping the subscription unsubscribes; the hub notices on its next
/// publish to the scope and releases the topic if nobody else is listening.
pub struct Subscription {
    rx: broadcast::Receiver<StreamEvent>,
    scope: ScopeKey,
    /// When this subscriber connected.
    pub connected_at: DateTime<Utc>,
}

impl Subscription {
    /// Receive the next event, or `None` once the scope has been closed.
    ///
    /// If this subscriber fell behind, the oldest buffered events were
    /// dropped; reception resumes with the oldest still-buffered event.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(dropped)) => {
                    tracing::debug!(scope = %self.scope, dropped, "Subscriber lagged; dropped oldest events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn scope(&self) -> &ScopeKey {
        &self.scope
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope() -> ScopeKey {
        ScopeKey::InstanceLogs("e1".into())
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_block_or_error() {
        let hub = StatusHub::default();
        hub.publish(&scope(), StreamEvent::log("nobody listening")).await;
    }

    #[tokio::test]
    async fn subscriber_receives_published_events_in_order() {
        let hub = StatusHub::default();
        let mut sub = hub.subscribe(scope()).await;

        hub.publish(&scope(), StreamEvent::log("one")).await;
        hub.publish(&scope(), StreamEvent::log("two")).await;

        assert_eq!(sub.recv().await.unwrap().payload["line"], "one");
        assert_eq!(sub.recv().await.unwrap().payload["line"], "two");
    }

    #[tokio::test]
    async fn scopes_are_isolated() {
        let hub = StatusHub::default();
        let mut logs = hub.subscribe(ScopeKey::InstanceLogs("e1".into())).await;
        let mut metrics = hub.subscribe(ScopeKey::Metrics).await;

        hub.publish(&ScopeKey::Metrics, StreamEvent::new("metrics", json!({"jobs": 1})))
            .await;

        assert_eq!(metrics.recv().await.unwrap().kind, "metrics");
        // The logs subscriber saw nothing; its channel is still empty.
        assert!(tokio::time::timeout(
            std::time::Duration::from_millis(50),
            logs.recv()
        )
        .await
        .is_err());
    }

    #[tokio::test]
    async fn close_ends_subscriber_streams() {
        let hub = StatusHub::default();
        let mut sub = hub.subscribe(scope()).await;

        hub.publish(&scope(), StreamEvent::log("last")).await;
        hub.close(&scope()).await;
        // Closing again is a no-op.
        hub.close(&scope()).await;

        // Buffered event is still delivered, then the stream ends.
        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn slow_subscriber_loses_oldest_but_does_not_stall_publisher() {
        let hub = StatusHub::new(4);
        let mut slow = hub.subscribe(scope()).await;
        let mut fast = hub.subscribe(scope()).await;

        // Publish far more than the buffer while `slow` reads nothing.
        // None of these sends may block.
        for i in 0..32 {
            hub.publish(&scope(), StreamEvent::log(format!("line-{i}"))).await;
            // Fast subscriber keeps up and sees every event.
            assert_eq!(
                fast.recv().await.unwrap().payload["line"],
                format!("line-{i}")
            );
        }

        // The slow subscriber resumes with recent events only: the first
        // event it sees is one of the last `capacity` published.
        let first_seen = slow.recv().await.unwrap();
        let line = first_seen.payload["line"].as_str().unwrap().to_string();
        let idx: usize = line.trim_start_matches("line-").parse().unwrap();
        assert!(idx >= 28, "slow subscriber saw stale event {line}");
    }

    #[tokio::test]
    async fn idle_scope_is_pruned_on_next_publish() {
        let hub = StatusHub::default();
        let sub = hub.subscribe(scope()).await;
        assert_eq!(hub.scope_count().await, 1);

        drop(sub);
        hub.publish(&scope(), StreamEvent::log("into the void")).await;
        assert_eq!(hub.scope_count().await, 0);
    }
}
