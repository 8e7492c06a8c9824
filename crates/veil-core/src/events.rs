//! Wire event types
//!
//! Every message published on the bus is one of the shapes below. Field
//! names are part of the external contract shared with the traffic-router
//! and the dashboard; they must not drift.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Attack classification assigned by the traffic analyzer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackType {
    Sqli,
    Xss,
    PathTraversal,
    BruteForce,
    /// Scanner identified by its user-agent
    ReconScanner,
    /// Scanner identified by request-rate behavior
    ReconScanning,
    DirEnum,
}

impl AttackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqli => "sqli",
            Self::Xss => "xss",
            Self::PathTraversal => "path_traversal",
            Self::BruteForce => "brute_force",
            Self::ReconScanner => "recon_scanner",
            Self::ReconScanning => "recon_scanning",
            Self::DirEnum => "dir_enum",
        }
    }
}

impl std::fmt::Display for AttackType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compact request identification carried inside findings and attack events
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestSummary {
    pub method: String,
    pub path: String,
    pub source_ip: String,
    pub user_agent: String,
}

/// A single detection result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub attack_type: AttackType,
    /// Rounded to two decimals on the wire
    pub confidence: f64,
    pub source_ip: String,
    /// The matched signature label or rate-trigger description
    pub evidence: String,
    pub timestamp: String,
    pub raw_request_summary: RequestSummary,
}

/// Published on `attack_detected` when at least one finding clears the
/// confidence threshold. `attack_type`/`confidence`/`evidence` come from the
/// highest-confidence finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackEvent {
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub attack_type: AttackType,
    pub confidence: f64,
    pub source_ip: String,
    pub evidence: String,
    pub findings_count: usize,
    pub all_findings: Vec<Finding>,
    pub request: RequestSummary,
    /// Upstream emitters may pre-assign an attack id; the controller
    /// generates one otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attack_id: Option<String>,
}

/// Lifecycle event subtype published on `decoy_spawned`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecoyEventKind {
    DecoySpawned,
    DecoyEvicted,
    DecoyExpired,
}

/// Published on `decoy_spawned` for every set lifecycle transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoyLifecycleEvent {
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: DecoyEventKind,
    /// Short attack id shared by every resource of the set
    pub attack_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attacker_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attack_type: Option<String>,
    pub decoy_pods: Vec<String>,
    pub decoy_services: Vec<String>,
    pub pods_ready: bool,
    /// Present on eviction and expiry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Published on `routing_update`, consumed by the traffic-router
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoutingUpdate {
    AddRoute {
        timestamp: String,
        attacker_ip: String,
        attack_id: String,
        frontend_service: String,
        api_service: String,
        db_service: String,
    },
    RemoveRoute {
        timestamp: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attack_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attacker_ip: Option<String>,
        reason: String,
    },
}

/// Published on `pod_status` by the collector for every cluster watch event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodUpdateEvent {
    pub event_id: String,
    pub event_type: String,
    /// ADDED, MODIFIED, or DELETED
    pub watch_type: String,
    pub pod_name: String,
    pub namespace: String,
    pub status: String,
    pub labels: HashMap<String, String>,
    pub ip: Option<String>,
    pub node: Option<String>,
    pub timestamp: String,
    pub source: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attack_type_wire_names() {
        let json = serde_json::to_string(&AttackType::PathTraversal).unwrap();
        assert_eq!(json, "\"path_traversal\"");
        let parsed: AttackType = serde_json::from_str("\"recon_scanner\"").unwrap();
        assert_eq!(parsed, AttackType::ReconScanner);
    }

    #[test]
    fn attack_event_uses_type_key() {
        let event = AttackEvent {
            timestamp: "2024-01-01T00:00:00Z".to_string(),
            kind: "attack_detected".to_string(),
            attack_type: AttackType::Sqli,
            confidence: 0.95,
            source_ip: "1.2.3.4".to_string(),
            evidence: "sql tautology".to_string(),
            findings_count: 1,
            all_findings: vec![],
            request: RequestSummary::default(),
            attack_id: None,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "attack_detected");
        assert_eq!(value["attack_type"], "sqli");
        assert!(value.get("attack_id").is_none());
    }

    #[test]
    fn routing_update_round_trip() {
        let update = RoutingUpdate::AddRoute {
            timestamp: "2024-01-01T00:00:00Z".to_string(),
            attacker_ip: "1.2.3.4".to_string(),
            attack_id: "deadbeef".to_string(),
            frontend_service: "decoy-fe-deadbeef.decoy-pool.svc.cluster.local:8080".to_string(),
            api_service: "decoy-api-deadbeef.decoy-pool.svc.cluster.local:5000".to_string(),
            db_service: "decoy-db-deadbeef.decoy-pool.svc.cluster.local:5432".to_string(),
        };
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["type"], "add_route");

        let removal: RoutingUpdate = serde_json::from_value(serde_json::json!({
            "type": "remove_route",
            "timestamp": "2024-01-01T00:00:00Z",
            "attack_id": "deadbeef",
            "reason": "ttl_expired",
        }))
        .unwrap();
        match removal {
            RoutingUpdate::RemoveRoute { attack_id, attacker_ip, .. } => {
                assert_eq!(attack_id.as_deref(), Some("deadbeef"));
                assert!(attacker_ip.is_none());
            }
            RoutingUpdate::AddRoute { .. } => panic!("expected remove_route"),
        }
    }
}
