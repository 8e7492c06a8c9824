//! Message bus plumbing
//!
//! Redis pub/sub is the nervous system of the control plane. This crate
//! provides:
//! - The channel name constants shared by every service
//! - `EventBus`: the publishing seam (Redis in production, in-memory in
//!   tests)
//! - `subscribe`: a reconnecting subscriber loop that bridges bus messages
//!   into an mpsc channel
//!
//! Publish failures never propagate to callers: attack handling and cluster
//! operations must keep working while the bus is down, so failures are
//! logged, the connection is dropped, and the next publish reconnects.

pub mod channels;
mod subscriber;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use serde::Serialize;
use tracing::{info, warn};

pub use subscriber::{subscribe, BusMessage};

/// Connect timeout for publisher connections
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Publishing side of the bus
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a JSON event. Failures are logged and swallowed.
    async fn publish(&self, channel: &str, event: &serde_json::Value);

    /// Whether the bus currently answers, for health endpoints.
    async fn healthy(&self) -> bool;
}

/// Serialize and publish a typed event.
pub async fn publish_event<T: Serialize + Sync>(bus: &dyn EventBus, channel: &str, event: &T) {
    match serde_json::to_value(event) {
        Ok(value) => bus.publish(channel, &value).await,
        Err(e) => warn!("failed to serialize event for channel {channel}: {e}"),
    }
}

/// Redis-backed publisher with a lazily created multiplexed connection.
/// Any failure drops the connection so the next publish reconnects.
pub struct RedisBus {
    url: String,
    conn: tokio::sync::Mutex<Option<MultiplexedConnection>>,
}

impl RedisBus {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            conn: tokio::sync::Mutex::new(None),
        }
    }

    /// Clone the live connection, creating it first if needed. The lock is
    /// released before any network round-trip on the returned handle.
    async fn connection(&self) -> Option<MultiplexedConnection> {
        {
            let guard = self.conn.lock().await;
            if let Some(conn) = guard.as_ref() {
                return Some(conn.clone());
            }
        }

        let client = match redis::Client::open(self.url.as_str()) {
            Ok(client) => client,
            Err(e) => {
                warn!("invalid bus URL {}: {e}", self.url);
                return None;
            }
        };

        match tokio::time::timeout(CONNECT_TIMEOUT, client.get_multiplexed_tokio_connection())
            .await
        {
            Ok(Ok(conn)) => {
                info!("bus publisher connected to {}", self.url);
                let mut guard = self.conn.lock().await;
                *guard = Some(conn.clone());
                Some(conn)
            }
            Ok(Err(e)) => {
                warn!("bus unavailable: {e}");
                None
            }
            Err(_) => {
                warn!("bus connect timed out after {CONNECT_TIMEOUT:?}");
                None
            }
        }
    }

    async fn reset(&self) {
        let mut guard = self.conn.lock().await;
        *guard = None;
    }
}

#[async_trait]
impl EventBus for RedisBus {
    async fn publish(&self, channel: &str, event: &serde_json::Value) {
        let Some(mut conn) = self.connection().await else {
            return;
        };

        let payload = event.to_string();
        let result: redis::RedisResult<i64> = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut conn)
            .await;

        if let Err(e) = result {
            warn!("bus publish to {channel} failed: {e}");
            self.reset().await;
        }
    }

    async fn healthy(&self) -> bool {
        let Some(mut conn) = self.connection().await else {
            return false;
        };

        let result: redis::RedisResult<String> =
            redis::cmd("PING").query_async(&mut conn).await;
        match result {
            Ok(_) => true,
            Err(e) => {
                warn!("bus ping failed: {e}");
                self.reset().await;
                false
            }
        }
    }
}

/// Recording bus for tests: stores every published event in order.
#[derive(Default)]
pub struct MemoryBus {
    events: Mutex<Vec<(String, serde_json::Value)>>,
    down: AtomicBool,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// All published `(channel, event)` pairs in publish order.
    pub fn events(&self) -> Vec<(String, serde_json::Value)> {
        self.events.lock().unwrap().clone()
    }

    /// Events published on a single channel, in order.
    pub fn events_on(&self, channel: &str) -> Vec<serde_json::Value> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(ch, _)| ch == channel)
            .map(|(_, event)| event.clone())
            .collect()
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn publish(&self, channel: &str, event: &serde_json::Value) {
        if self.down.load(Ordering::SeqCst) {
            return;
        }
        self.events
            .lock()
            .unwrap()
            .push((channel.to_string(), event.clone()));
    }

    async fn healthy(&self) -> bool {
        !self.down.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_bus_records_in_order() {
        let bus = MemoryBus::new();
        bus.publish(channels::ATTACK_DETECTED, &serde_json::json!({"n": 1}))
            .await;
        bus.publish(channels::ROUTING_UPDATE, &serde_json::json!({"n": 2}))
            .await;
        bus.publish(channels::ATTACK_DETECTED, &serde_json::json!({"n": 3}))
            .await;

        assert_eq!(bus.events().len(), 3);
        let attacks = bus.events_on(channels::ATTACK_DETECTED);
        assert_eq!(attacks.len(), 2);
        assert_eq!(attacks[1]["n"], 3);
    }

    #[tokio::test]
    async fn memory_bus_drops_while_down() {
        let bus = MemoryBus::new();
        bus.set_down(true);
        bus.publish(channels::POD_STATUS, &serde_json::json!({}))
            .await;
        assert!(!bus.healthy().await);
        assert!(bus.events().is_empty());
    }
}
