//! Attacker routing table
//!
//! Mirrors the routing state announced on `routing_update` so topology
//! snapshots can draw attacker-route edges. Forward map (IP -> route) and
//! inverse index (attack id -> IP) stay consistent under one lock.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;

use veil_core::utc_now;

#[derive(Debug, Clone, Serialize)]
pub struct RouteEntry {
    pub target_endpoint: String,
    pub updated_at: String,
    pub attack_id: Option<String>,
}

#[derive(Default)]
struct RoutesInner {
    by_ip: HashMap<String, RouteEntry>,
    ip_by_attack: HashMap<String, String>,
}

#[derive(Default)]
pub struct RoutingTable {
    inner: Mutex<RoutesInner>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one `routing_update` event. Unknown shapes are ignored.
    pub fn apply(&self, event: &serde_json::Value) {
        let event_type = event
            .get("type")
            .or_else(|| event.get("event_type"))
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let attack_id = event.get("attack_id").and_then(|v| v.as_str());
        let attacker_ip = event.get("attacker_ip").and_then(|v| v.as_str());

        match event_type {
            "add_route" => {
                let Some(ip) = attacker_ip else { return };
                let Some(frontend) = event.get("frontend_service").and_then(|v| v.as_str())
                else {
                    return;
                };

                let mut inner = self.inner.lock().unwrap();
                inner.by_ip.insert(
                    ip.to_string(),
                    RouteEntry {
                        target_endpoint: frontend.to_string(),
                        updated_at: event
                            .get("timestamp")
                            .and_then(|v| v.as_str())
                            .map(str::to_string)
                            .unwrap_or_else(utc_now),
                        attack_id: attack_id.map(str::to_string),
                    },
                );
                if let Some(id) = attack_id {
                    inner.ip_by_attack.insert(id.to_string(), ip.to_string());
                }
            }
            "remove_route" => {
                let mut inner = self.inner.lock().unwrap();
                if let Some(ip) = attacker_ip {
                    inner.by_ip.remove(ip);
                } else if let Some(id) = attack_id {
                    if let Some(mapped) = inner.ip_by_attack.get(id).cloned() {
                        inner.by_ip.remove(&mapped);
                    }
                }
                if let Some(id) = attack_id {
                    inner.ip_by_attack.remove(id);
                }
            }
            _ => {}
        }
    }

    /// Snapshot of the forward map.
    pub fn routes(&self) -> HashMap<String, RouteEntry> {
        self.inner.lock().unwrap().by_ip.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().by_ip.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Map a `<service>.<namespace>.svc...:<port>` endpoint to its topology
/// node id.
pub fn endpoint_to_service_id(endpoint: &str) -> Option<String> {
    let host = endpoint.split(':').next()?;
    let mut parts = host.split('.');
    let service = parts.next()?;
    let namespace = parts.next()?;
    if service.is_empty() || namespace.is_empty() {
        return None;
    }
    Some(format!("service:{namespace}:{service}"))
}
