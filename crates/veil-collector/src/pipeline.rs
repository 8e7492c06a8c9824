//! Event ingestion and fan-out pipeline
//!
//! Producer tasks (bus subscriber, pod watcher, snapshot loop) submit raw
//! JSON events through a thread-safe sender; one cooperative dispatcher
//! serializes each event once and forwards it to every connected WebSocket
//! client. A failed send closes only that client's slot.
//!
//! The locally-originated id window suppresses echo: pod events the
//! collector itself re-publishes on the bus come back through the
//! subscriber and must not be dispatched twice.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use dashmap::DashMap;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info};
use uuid::Uuid;

use veil_cluster::WatchEvent;
use veil_core::{utc_now, PodUpdateEvent};

/// Size of the recent-events ring served by `/api/events/recent`
pub const MAX_RECENT_EVENTS: usize = 200;

/// Size of the locally-originated event id window
pub const LOCAL_EVENT_ID_WINDOW: usize = 2000;

/// Bounded FIFO of event ids with a companion set for O(1) membership.
/// Oldest ids fall out of both structures together.
#[derive(Default)]
pub struct LocalEventIds {
    inner: Mutex<(VecDeque<String>, HashSet<String>)>,
}

impl LocalEventIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, event_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        let (order, members) = &mut *inner;
        if !members.insert(event_id.to_string()) {
            return;
        }
        order.push_back(event_id.to_string());
        while order.len() > LOCAL_EVENT_ID_WINDOW {
            if let Some(oldest) = order.pop_front() {
                members.remove(&oldest);
            }
        }
    }

    pub fn contains(&self, event_id: &str) -> bool {
        self.inner.lock().unwrap().1.contains(event_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fan-out hub: submit queue, recent ring, client registry.
pub struct EventPipeline {
    sender: UnboundedSender<serde_json::Value>,
    recent: Mutex<VecDeque<serde_json::Value>>,
    clients: DashMap<Uuid, UnboundedSender<String>>,
}

impl EventPipeline {
    /// Build the pipeline plus the receiver its dispatcher consumes.
    pub fn new() -> (Self, UnboundedReceiver<serde_json::Value>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender,
                recent: Mutex::new(VecDeque::with_capacity(MAX_RECENT_EVENTS)),
                clients: DashMap::new(),
            },
            receiver,
        )
    }

    /// Thread-safe, non-blocking submit from any producer task.
    pub fn submit(&self, event: serde_json::Value) {
        if self.sender.send(event).is_err() {
            debug!("dispatcher gone; event dropped");
        }
    }

    /// Attach a WebSocket client; returns its slot id and message stream.
    pub fn register_client(&self) -> (Uuid, UnboundedReceiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.clients.insert(id, tx);
        info!("client connected; active_clients={}", self.clients.len());
        (id, rx)
    }

    pub fn remove_client(&self, id: &Uuid) {
        self.clients.remove(id);
        info!("client disconnected; active_clients={}", self.clients.len());
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Recent events in insertion order, newest last.
    pub fn recent_events(&self) -> Vec<serde_json::Value> {
        self.recent.lock().unwrap().iter().cloned().collect()
    }

    pub fn recent_count(&self) -> usize {
        self.recent.lock().unwrap().len()
    }

    /// Record and fan out one event. Serializes once; a dead client slot is
    /// removed without touching the others.
    pub fn broadcast(&self, event: serde_json::Value) {
        {
            let mut recent = self.recent.lock().unwrap();
            recent.push_back(event.clone());
            while recent.len() > MAX_RECENT_EVENTS {
                recent.pop_front();
            }
        }

        if self.clients.is_empty() {
            return;
        }

        let serialized = event.to_string();
        let mut dead = Vec::new();
        for entry in self.clients.iter() {
            if entry.value().send(serialized.clone()).is_err() {
                dead.push(*entry.key());
            }
        }
        for id in dead {
            self.clients.remove(&id);
        }
    }

    /// The cooperative dispatcher: drains the submit queue forever.
    pub async fn dispatch_loop(&self, mut receiver: UnboundedReceiver<serde_json::Value>) {
        while let Some(event) = receiver.recv().await {
            self.broadcast(event);
        }
    }
}

/// Normalize a bus payload into the unified event shape: guarantee
/// `timestamp`, `channel`, and `event_type` keys exist.
pub fn normalize_bus_event(channel: &str, payload: serde_json::Value) -> serde_json::Value {
    let mut map = match payload {
        serde_json::Value::Object(map) => map,
        other => {
            let mut map = serde_json::Map::new();
            map.insert("message".to_string(), other);
            map
        }
    };

    if !map.contains_key("timestamp") {
        map.insert("timestamp".to_string(), serde_json::json!(utc_now()));
    }
    if !map.contains_key("channel") {
        map.insert("channel".to_string(), serde_json::json!(channel));
    }
    if !map.contains_key("event_type") {
        let event_type = map
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or(channel)
            .to_string();
        map.insert("event_type".to_string(), serde_json::json!(event_type));
    }

    serde_json::Value::Object(map)
}

/// Synthesize the `pod_update` event for one cluster watch event, with a
/// fresh event id for echo suppression.
pub fn pod_update_event(watch: &WatchEvent, source: &str) -> PodUpdateEvent {
    let pod = &watch.object;
    let status = pod
        .status
        .as_ref()
        .map(|s| s.phase.clone())
        .unwrap_or_else(|| "Unknown".to_string());

    PodUpdateEvent {
        event_id: Uuid::new_v4().to_string(),
        event_type: "pod_update".to_string(),
        watch_type: watch.kind.as_str().to_string(),
        pod_name: pod.metadata.name.clone(),
        namespace: pod.metadata.namespace.clone(),
        status,
        labels: pod.metadata.labels.clone(),
        ip: pod.status.as_ref().and_then(|s| s.pod_ip.clone()),
        node: pod.spec.node_name.clone(),
        timestamp: utc_now(),
        source: source.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_ids_window_evicts_oldest() {
        let ids = LocalEventIds::new();
        for i in 0..LOCAL_EVENT_ID_WINDOW + 5 {
            ids.mark(&format!("id-{i}"));
        }
        assert_eq!(ids.len(), LOCAL_EVENT_ID_WINDOW);
        assert!(!ids.contains("id-0"));
        assert!(!ids.contains("id-4"));
        assert!(ids.contains("id-5"));
        assert!(ids.contains(&format!("id-{}", LOCAL_EVENT_ID_WINDOW + 4)));
    }

    #[test]
    fn marking_twice_is_idempotent() {
        let ids = LocalEventIds::new();
        ids.mark("same");
        ids.mark("same");
        assert_eq!(ids.len(), 1);
    }

    #[test]
    fn recent_ring_is_bounded_and_ordered() {
        let (pipeline, _rx) = EventPipeline::new();
        for i in 0..MAX_RECENT_EVENTS + 10 {
            pipeline.broadcast(serde_json::json!({ "n": i }));
        }
        let recent = pipeline.recent_events();
        assert_eq!(recent.len(), MAX_RECENT_EVENTS);
        // Insertion order, newest last.
        assert_eq!(recent[0]["n"], 10);
        assert_eq!(recent[MAX_RECENT_EVENTS - 1]["n"], MAX_RECENT_EVENTS + 9);
    }

    #[tokio::test]
    async fn dead_client_slot_is_closed_others_survive() {
        let (pipeline, _rx) = EventPipeline::new();
        let (_id_a, mut rx_a) = pipeline.register_client();
        let (_id_b, rx_b) = pipeline.register_client();
        assert_eq!(pipeline.client_count(), 2);

        // Client B goes away without unregistering.
        drop(rx_b);
        pipeline.broadcast(serde_json::json!({ "event_type": "test" }));

        assert_eq!(pipeline.client_count(), 1);
        let received = rx_a.recv().await.unwrap();
        assert!(received.contains("test"));
    }

    #[test]
    fn normalize_fills_missing_keys_only() {
        let event = normalize_bus_event(
            "attack_detected",
            serde_json::json!({ "type": "attack_detected", "confidence": 0.9 }),
        );
        assert_eq!(event["event_type"], "attack_detected");
        assert_eq!(event["channel"], "attack_detected");
        assert!(event["timestamp"].is_string());

        let kept = normalize_bus_event(
            "pod_status",
            serde_json::json!({ "event_type": "pod_update", "timestamp": "t0" }),
        );
        assert_eq!(kept["event_type"], "pod_update");
        assert_eq!(kept["timestamp"], "t0");

        let wrapped = normalize_bus_event("routing_update", serde_json::json!("plain"));
        assert_eq!(wrapped["message"], "plain");
        assert_eq!(wrapped["event_type"], "routing_update");
    }
}
