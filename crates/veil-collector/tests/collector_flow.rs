//! Collector pipeline tests: bus ingestion, echo suppression, routing
//! table maintenance, topology snapshots, and the pod watch loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use veil_bus::{channels, BusMessage, MemoryBus};
use veil_cluster::{
    ClusterApi, MemoryCluster, ObjectMeta, Pod, Service, ServicePort, ServiceSpec,
};
use veil_collector::{
    build_snapshot, ingest_bus_message, CollectorState, EventPipeline, LocalEventIds,
    RoutingTable,
};
use veil_core::{BusConfig, ClusterConfig, CollectorConfig};

fn test_config() -> CollectorConfig {
    CollectorConfig {
        rest_port: 0,
        websocket_port: 0,
        graph_interval_seconds: 5,
        monitored_namespaces: vec![
            "ecommerce-real".to_string(),
            "deception-gateway".to_string(),
            "decoy-pool".to_string(),
            "monitoring".to_string(),
        ],
        bus: BusConfig {
            url: "redis://unused".to_string(),
        },
        cluster: ClusterConfig {
            base_url: "http://unused".to_string(),
        },
    }
}

fn collector_state(cluster: Arc<MemoryCluster>, bus: Arc<MemoryBus>) -> Arc<CollectorState> {
    let (pipeline, dispatch_rx) = EventPipeline::new();
    let state = Arc::new(CollectorState {
        config: test_config(),
        pipeline: Arc::new(pipeline),
        routes: Arc::new(RoutingTable::new()),
        local_ids: Arc::new(LocalEventIds::new()),
        cluster,
        bus,
    });

    let dispatcher = state.pipeline.clone();
    tokio::spawn(async move { dispatcher.dispatch_loop(dispatch_rx).await });
    state
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within deadline");
}

fn labeled_pod(namespace: &str, name: &str, labels: &[(&str, &str)]) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: name.to_string(),
            namespace: namespace.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn selector_service(namespace: &str, name: &str, selector: &[(&str, &str)]) -> Service {
    Service {
        metadata: ObjectMeta {
            name: name.to_string(),
            namespace: namespace.to_string(),
            ..Default::default()
        },
        spec: ServiceSpec {
            selector: selector
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ports: vec![ServicePort {
                port: 8080,
                target_port: Some(8080),
                name: None,
            }],
            service_type: Some("ClusterIP".to_string()),
        },
    }
}

#[tokio::test]
async fn bus_events_flow_into_recent_ring() {
    let state = collector_state(Arc::new(MemoryCluster::new()), Arc::new(MemoryBus::new()));

    ingest_bus_message(
        &state,
        BusMessage {
            channel: channels::ATTACK_DETECTED.to_string(),
            payload: serde_json::json!({ "type": "attack_detected", "source_ip": "1.2.3.4" }),
        },
    );

    let pipeline = state.pipeline.clone();
    wait_until(move || pipeline.recent_count() == 1).await;

    let recent = state.pipeline.recent_events();
    assert_eq!(recent[0]["event_type"], "attack_detected");
    assert_eq!(recent[0]["channel"], "attack_detected");
    assert!(recent[0]["timestamp"].is_string());
}

#[tokio::test]
async fn locally_originated_events_are_dropped() {
    let state = collector_state(Arc::new(MemoryCluster::new()), Arc::new(MemoryBus::new()));
    state.local_ids.mark("echo-1");

    ingest_bus_message(
        &state,
        BusMessage {
            channel: channels::POD_STATUS.to_string(),
            payload: serde_json::json!({ "event_id": "echo-1", "event_type": "pod_update" }),
        },
    );
    ingest_bus_message(
        &state,
        BusMessage {
            channel: channels::POD_STATUS.to_string(),
            payload: serde_json::json!({ "event_id": "fresh-1", "event_type": "pod_update" }),
        },
    );

    let pipeline = state.pipeline.clone();
    wait_until(move || pipeline.recent_count() == 1).await;
    assert_eq!(state.pipeline.recent_events()[0]["event_id"], "fresh-1");
}

#[tokio::test]
async fn routing_updates_feed_table_and_snapshot_edges() {
    let cluster = Arc::new(MemoryCluster::new());
    cluster
        .create_service(
            "deception-gateway",
            &selector_service("deception-gateway", "traffic-router", &[]),
        )
        .await
        .unwrap();
    cluster
        .create_service(
            "decoy-pool",
            &selector_service("decoy-pool", "decoy-fe-aaaa1111", &[("app", "decoy-fe-aaaa1111")]),
        )
        .await
        .unwrap();

    let state = collector_state(cluster.clone(), Arc::new(MemoryBus::new()));

    ingest_bus_message(
        &state,
        BusMessage {
            channel: channels::ROUTING_UPDATE.to_string(),
            payload: serde_json::json!({
                "type": "add_route",
                "attacker_ip": "6.6.6.6",
                "attack_id": "aaaa1111",
                "frontend_service": "decoy-fe-aaaa1111.decoy-pool.svc.cluster.local:8080",
                "api_service": "decoy-api-aaaa1111.decoy-pool.svc.cluster.local:5000",
                "db_service": "decoy-db-aaaa1111.decoy-pool.svc.cluster.local:5432",
            }),
        },
    );
    assert_eq!(state.routes.len(), 1);

    let snapshot = build_snapshot(
        state.cluster.as_ref(),
        &state.config.monitored_namespaces,
        &state.routes,
    )
    .await;

    let edges = snapshot["edges"].as_array().unwrap();
    let attacker_edges: Vec<_> = edges
        .iter()
        .filter(|e| e["type"] == "attacker_route")
        .collect();
    assert_eq!(attacker_edges.len(), 1);
    assert_eq!(
        attacker_edges[0]["source"],
        "service:deception-gateway:traffic-router"
    );
    assert_eq!(
        attacker_edges[0]["target"],
        "service:decoy-pool:decoy-fe-aaaa1111"
    );
    assert_eq!(attacker_edges[0]["attacker_ip"], "6.6.6.6");

    // Route removal erases the edge on the next rebuild.
    ingest_bus_message(
        &state,
        BusMessage {
            channel: channels::ROUTING_UPDATE.to_string(),
            payload: serde_json::json!({
                "type": "remove_route",
                "attack_id": "aaaa1111",
                "reason": "ttl_expired",
            }),
        },
    );
    let snapshot = build_snapshot(
        state.cluster.as_ref(),
        &state.config.monitored_namespaces,
        &state.routes,
    )
    .await;
    assert!(snapshot["edges"]
        .as_array()
        .unwrap()
        .iter()
        .all(|e| e["type"] != "attacker_route"));
}

#[tokio::test]
async fn snapshot_builds_selector_and_dependency_edges() {
    let cluster = Arc::new(MemoryCluster::new());
    cluster
        .create_pod(
            "ecommerce-real",
            &labeled_pod("ecommerce-real", "frontend-1", &[("app", "frontend")]),
        )
        .await
        .unwrap();
    cluster
        .create_service(
            "ecommerce-real",
            &selector_service("ecommerce-real", "frontend", &[("app", "frontend")]),
        )
        .await
        .unwrap();
    cluster
        .create_service(
            "ecommerce-real",
            &selector_service("ecommerce-real", "product-service", &[("app", "products")]),
        )
        .await
        .unwrap();

    let routes = RoutingTable::new();
    let snapshot = build_snapshot(
        cluster.as_ref(),
        &test_config().monitored_namespaces,
        &routes,
    )
    .await;

    assert_eq!(snapshot["event_type"], "graph_snapshot");
    assert_eq!(snapshot["summary"]["pod_count"], 1);
    assert_eq!(snapshot["summary"]["service_count"], 2);

    let nodes = snapshot["nodes"].as_array().unwrap();
    assert!(nodes
        .iter()
        .any(|n| n["id"] == "pod:ecommerce-real:frontend-1" && n["role"] == "real"));

    let edges = snapshot["edges"].as_array().unwrap();
    assert!(edges.iter().any(|e| {
        e["type"] == "service_selector"
            && e["source"] == "service:ecommerce-real:frontend"
            && e["target"] == "pod:ecommerce-real:frontend-1"
    }));
    // No selector match for product-service; the static dependency edge
    // connects the two service nodes instead.
    assert!(edges.iter().any(|e| {
        e["type"] == "service_dependency"
            && e["source"] == "service:ecommerce-real:frontend"
            && e["target"] == "service:ecommerce-real:product-service"
    }));
}

#[tokio::test]
async fn pod_watch_synthesizes_and_republishes_without_echo() {
    let cluster = Arc::new(MemoryCluster::new());
    let bus = Arc::new(MemoryBus::new());
    let state = collector_state(cluster.clone(), bus.clone());

    let watcher = tokio::spawn(veil_collector::service::pod_watch_loop(state.clone()));
    // Give the watcher a beat to subscribe before mutating the cluster.
    tokio::time::sleep(Duration::from_millis(50)).await;

    cluster
        .create_pod(
            "decoy-pool",
            &labeled_pod("decoy-pool", "decoy-fe-test", &[("role", "decoy")]),
        )
        .await
        .unwrap();

    let pipeline = state.pipeline.clone();
    wait_until(move || pipeline.recent_count() >= 1).await;

    let recent = state.pipeline.recent_events();
    let update = &recent[0];
    assert_eq!(update["event_type"], "pod_update");
    assert_eq!(update["watch_type"], "ADDED");
    assert_eq!(update["pod_name"], "decoy-fe-test");
    assert_eq!(update["source"], "event-collector");

    let event_id = update["event_id"].as_str().unwrap();
    assert!(state.local_ids.contains(event_id));

    // Re-published on the bus for other subscribers.
    let published = bus.events_on(channels::POD_STATUS);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0]["event_id"], event_id);

    // The echo comes back through the subscriber and is dropped.
    ingest_bus_message(
        &state,
        BusMessage {
            channel: channels::POD_STATUS.to_string(),
            payload: published[0].clone(),
        },
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(state.pipeline.recent_count(), 1);

    watcher.abort();
}
