//! Topology graph snapshots
//!
//! A snapshot is a full rebuild over the monitored namespaces, never an
//! incremental patch: nodes for every pod and service, edges for service
//! selectors, the static service dependency map, and live attacker routes.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::warn;

use veil_cluster::ClusterApi;
use veil_core::utc_now;

use crate::routes::{endpoint_to_service_id, RoutingTable};

/// Static service-to-service relationships of the deployment, as
/// `(source_namespace, source_service, target_namespace, target_service)`.
pub const KNOWN_SERVICE_CONNECTIONS: [(&str, &str, &str, &str); 9] = [
    ("ecommerce-real", "frontend", "ecommerce-real", "product-service"),
    ("ecommerce-real", "frontend", "ecommerce-real", "cart-service"),
    ("ecommerce-real", "product-service", "ecommerce-real", "postgres"),
    ("ecommerce-real", "cart-service", "ecommerce-real", "postgres"),
    ("deception-gateway", "traffic-router", "deception-gateway", "traffic-analyzer"),
    ("deception-gateway", "traffic-router", "ecommerce-real", "frontend"),
    ("deception-gateway", "traffic-analyzer", "monitoring", "redis"),
    ("deception-gateway", "deception-controller", "monitoring", "redis"),
    ("monitoring", "event-collector", "monitoring", "redis"),
];

/// The router service every attacker-route edge originates from
const ROUTER_SERVICE_ID: &str = "service:deception-gateway:traffic-router";

pub fn pod_node_id(namespace: &str, name: &str) -> String {
    format!("pod:{namespace}:{name}")
}

pub fn service_node_id(namespace: &str, name: &str) -> String {
    format!("service:{namespace}:{name}")
}

/// Role shown on the dashboard, inferred from labels and namespace.
pub fn infer_role(namespace: &str, labels: &HashMap<String, String>) -> &'static str {
    if labels.get("role").map(String::as_str) == Some("decoy") || namespace == "decoy-pool" {
        return "decoy";
    }
    match namespace {
        "deception-gateway" => "gateway",
        "monitoring" => "monitoring",
        _ => "real",
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub id: String,
    pub name: String,
    pub namespace: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub role: String,
    pub status: String,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attacker_ip: Option<String>,
}

/// Build one graph snapshot event. Namespaces whose listing fails are
/// logged and skipped; the snapshot is emitted regardless.
pub async fn build_snapshot(
    cluster: &dyn ClusterApi,
    namespaces: &[String],
    routes: &RoutingTable,
) -> serde_json::Value {
    let mut nodes: Vec<GraphNode> = Vec::new();
    let mut pod_count = 0usize;
    let mut service_count = 0usize;
    let mut pods_by_namespace = HashMap::new();
    let mut all_services = Vec::new();

    for namespace in namespaces {
        let pods = match cluster.list_pods(namespace, None).await {
            Ok(pods) => pods,
            Err(e) => {
                warn!("snapshot pod list failed for {namespace}: {e}");
                continue;
            }
        };
        let services = match cluster.list_services(namespace, None).await {
            Ok(services) => services,
            Err(e) => {
                warn!("snapshot service list failed for {namespace}: {e}");
                continue;
            }
        };

        pod_count += pods.len();
        service_count += services.len();

        for pod in &pods {
            nodes.push(GraphNode {
                id: pod_node_id(namespace, &pod.metadata.name),
                name: pod.metadata.name.clone(),
                namespace: namespace.clone(),
                kind: "pod".to_string(),
                role: infer_role(namespace, &pod.metadata.labels).to_string(),
                status: pod
                    .status
                    .as_ref()
                    .map(|s| s.phase.clone())
                    .unwrap_or_else(|| "Unknown".to_string()),
                labels: pod.metadata.labels.clone(),
            });
        }
        for service in &services {
            nodes.push(GraphNode {
                id: service_node_id(namespace, &service.metadata.name),
                name: service.metadata.name.clone(),
                namespace: namespace.clone(),
                kind: "service".to_string(),
                role: infer_role(namespace, &service.metadata.labels).to_string(),
                status: if service.metadata.deletion_timestamp.is_some() {
                    "Terminating".to_string()
                } else {
                    "Active".to_string()
                },
                labels: service.metadata.labels.clone(),
            });
        }

        pods_by_namespace.insert(namespace.clone(), pods);
        all_services.extend(services);
    }

    let node_ids: HashSet<String> = nodes.iter().map(|n| n.id.clone()).collect();
    let mut edges: Vec<GraphEdge> = Vec::new();
    let mut edge_keys: HashSet<(String, String, String, String)> = HashSet::new();

    let mut add_edge = |edges: &mut Vec<GraphEdge>,
                        source: String,
                        target: String,
                        kind: &str,
                        attacker_ip: Option<String>| {
        let key = (
            source.clone(),
            target.clone(),
            kind.to_string(),
            attacker_ip.clone().unwrap_or_default(),
        );
        if !edge_keys.insert(key) {
            return;
        }
        edges.push(GraphEdge {
            source,
            target,
            kind: kind.to_string(),
            attacker_ip,
        });
    };

    // Service -> pod edges: the pod's labels must be a superset of the
    // service's selector, within the same namespace.
    for service in &all_services {
        let selector = &service.spec.selector;
        if selector.is_empty() {
            continue;
        }
        let namespace = &service.metadata.namespace;
        let service_id = service_node_id(namespace, &service.metadata.name);

        if let Some(pods) = pods_by_namespace.get(namespace) {
            for pod in pods {
                let matches = selector
                    .iter()
                    .all(|(k, v)| pod.metadata.labels.get(k) == Some(v));
                if matches {
                    add_edge(
                        &mut edges,
                        service_id.clone(),
                        pod_node_id(namespace, &pod.metadata.name),
                        "service_selector",
                        None,
                    );
                }
            }
        }
    }

    // Static dependency edges, only where both endpoints exist.
    for (src_ns, src_name, dst_ns, dst_name) in KNOWN_SERVICE_CONNECTIONS {
        let source = service_node_id(src_ns, src_name);
        let target = service_node_id(dst_ns, dst_name);
        if node_ids.contains(&source) && node_ids.contains(&target) {
            add_edge(&mut edges, source, target, "service_dependency", None);
        }
    }

    // Attacker-route edges from the router to each routed decoy frontend.
    for (attacker_ip, route) in routes.routes() {
        let Some(target) = endpoint_to_service_id(&route.target_endpoint) else {
            continue;
        };
        if node_ids.contains(ROUTER_SERVICE_ID) && node_ids.contains(&target) {
            add_edge(
                &mut edges,
                ROUTER_SERVICE_ID.to_string(),
                target,
                "attacker_route",
                Some(attacker_ip),
            );
        }
    }

    serde_json::json!({
        "event_type": "graph_snapshot",
        "timestamp": utc_now(),
        "nodes": nodes,
        "edges": edges,
        "summary": {
            "namespaces": namespaces,
            "pod_count": pod_count,
            "service_count": service_count,
        },
    })
}
