//! Deception controller HTTP service and task wiring
//!
//! Endpoints:
//! - `GET /status` — counters, active sets, live pod count, caps
//! - `GET /health` — cluster + bus connectivity
//!
//! Tasks: one bus subscriber feeding a single consumer (preserving receive
//! order per attacker), one TTL sweeper, the HTTP server.

use std::sync::Arc;

use axum::{extract::State, response::Json, routing::get, Router};
use chrono::Utc;
use tracing::{info, warn};

use veil_bus::{channels, subscribe, EventBus};
use veil_cluster::ClusterApi;
use veil_core::{http::service_node, AttackEvent, ControllerConfig};

use crate::controller::{DeceptionController, MAX_DECOY_PODS, MAX_DECOY_SETS, TTL_CHECK_INTERVAL};

pub const SERVICE_NAME: &str = "deception-controller";

pub type SharedController = Arc<DeceptionController>;

pub fn router(controller: SharedController) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/health", get(health))
        .with_state(controller)
        .layer(axum::middleware::from_fn_with_state(
            SERVICE_NAME,
            service_node,
        ))
}

async fn status(State(controller): State<SharedController>) -> Json<serde_json::Value> {
    let counters = controller.counters();
    let active = controller.active_sets();
    let current_pods = controller.live_decoy_pod_count().await;
    let started_at = controller.started_at();

    Json(serde_json::json!({
        "service": SERVICE_NAME,
        "total_attacks_received": counters.total_attacks_received,
        "total_spawned_sets": counters.total_spawned_sets,
        "total_cleaned_sets": counters.total_cleaned_sets,
        "total_duplicate_skipped": counters.total_duplicate_skipped,
        "total_evictions": counters.total_evictions,
        "started_at": started_at.to_rfc3339(),
        "uptime_seconds": (Utc::now() - started_at).num_seconds(),
        "active_decoy_sets": active,
        "current_decoy_pods": current_pods,
        "caps": {
            "max_decoy_pods": MAX_DECOY_PODS,
            "max_decoy_sets": MAX_DECOY_SETS,
        },
    }))
}

async fn health(State(controller): State<SharedController>) -> Json<serde_json::Value> {
    let cluster_connected = controller.cluster().ping().await;
    let redis_connected = controller.bus().healthy().await;

    Json(serde_json::json!({
        "status": if cluster_connected { "healthy" } else { "degraded" },
        "service": SERVICE_NAME,
        "cluster_connected": cluster_connected,
        "redis_connected": redis_connected,
    }))
}

/// Run the controller: subscriber, consumer, sweeper, HTTP server.
pub async fn run(
    config: ControllerConfig,
    cluster: Arc<dyn ClusterApi>,
    bus: Arc<dyn EventBus>,
) -> anyhow::Result<()> {
    let controller = Arc::new(DeceptionController::new(config.clone(), cluster, bus));

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(subscribe(
        config.bus.url.clone(),
        vec![channels::ATTACK_DETECTED.to_string()],
        tx,
    ));

    let consumer = controller.clone();
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            match serde_json::from_value::<AttackEvent>(message.payload) {
                Ok(event) => consumer.handle_attack(&event).await,
                Err(e) => warn!("undecodable attack event: {e}"),
            }
        }
    });

    let sweeper = controller.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(TTL_CHECK_INTERVAL).await;
            sweeper.sweep_expired().await;
        }
    });

    let app = router(controller);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!("deception controller listening on 0.0.0.0:{}", config.port);
    axum::serve(listener, app).await?;

    Ok(())
}
