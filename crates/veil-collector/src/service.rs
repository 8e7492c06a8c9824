//! Event collector service
//!
//! REST surface on one port (`/api/events/recent`, `/health`), the
//! WebSocket stream on a second, and the background tasks that feed the
//! pipeline: bus subscriber, cluster pod watcher, topology snapshot loop,
//! and the dispatcher.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use veil_bus::{channels, publish_event, subscribe, BusMessage, EventBus};
use veil_cluster::ClusterApi;
use veil_core::{http::service_node, CollectorConfig};

use crate::pipeline::{normalize_bus_event, pod_update_event, EventPipeline, LocalEventIds};
use crate::routes::RoutingTable;
use crate::topology::build_snapshot;

pub const SERVICE_NAME: &str = "event-collector";

/// Backoff after a failed watch connection
const WATCH_RETRY_BACKOFF: Duration = Duration::from_secs(3);

pub struct CollectorState {
    pub config: CollectorConfig,
    pub pipeline: Arc<EventPipeline>,
    pub routes: Arc<RoutingTable>,
    pub local_ids: Arc<LocalEventIds>,
    pub cluster: Arc<dyn ClusterApi>,
    pub bus: Arc<dyn EventBus>,
}

pub type SharedState = Arc<CollectorState>;

pub fn rest_router(state: SharedState) -> Router {
    Router::new()
        .route("/api/events/recent", get(recent_events))
        .route("/health", get(health))
        .with_state(state)
        .layer(axum::middleware::from_fn_with_state(
            SERVICE_NAME,
            service_node,
        ))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

pub fn ws_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn recent_events(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let events = state.pipeline.recent_events();
    Json(serde_json::json!({
        "service": SERVICE_NAME,
        "count": events.len(),
        "events": events,
    }))
}

async fn health(State(state): State<SharedState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "websocket_port": state.config.websocket_port,
        "rest_port": state.config.rest_port,
        "connected_clients": state.pipeline.client_count(),
        "recent_events": state.pipeline.recent_count(),
    }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// One task per client: forward pipeline output until either side closes.
async fn handle_socket(socket: WebSocket, state: SharedState) {
    let (client_id, mut outbox) = state.pipeline.register_client();
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            outgoing = outbox.recv() => {
                match outgoing {
                    Some(text) => {
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // The stream is one-way; inbound frames are drained only
                    // to notice disconnects.
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.pipeline.remove_client(&client_id);
}

/// Process one bus message: maintain the routing table, drop echoes of our
/// own pod events, forward the rest.
pub fn ingest_bus_message(state: &CollectorState, message: BusMessage) {
    let event = normalize_bus_event(&message.channel, message.payload);

    if message.channel == channels::ROUTING_UPDATE {
        state.routes.apply(&event);
    }

    if let Some(event_id) = event.get("event_id").and_then(|v| v.as_str()) {
        if state.local_ids.contains(event_id) {
            return;
        }
    }

    state.pipeline.submit(event);
}

/// Watch cluster pods forever: synthesize `pod_update` events, mark them
/// locally originated, fan out, and re-publish on the bus.
pub async fn pod_watch_loop(state: SharedState) {
    loop {
        let (watch_tx, mut watch_rx) = tokio::sync::mpsc::unbounded_channel();
        let cluster = state.cluster.clone();
        let streamer = tokio::spawn(async move { cluster.watch_pods(watch_tx).await });

        while let Some(watch_event) = watch_rx.recv().await {
            let update = pod_update_event(&watch_event, SERVICE_NAME);
            state.local_ids.mark(&update.event_id);

            match serde_json::to_value(&update) {
                Ok(value) => state.pipeline.submit(value),
                Err(e) => warn!("pod update serialization failed: {e}"),
            }
            publish_event(state.bus.as_ref(), channels::POD_STATUS, &update).await;
        }

        match streamer.await {
            // Server-side timeout closed a healthy stream; reconnect now.
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("pod watch error: {e}; retrying in {WATCH_RETRY_BACKOFF:?}");
                tokio::time::sleep(WATCH_RETRY_BACKOFF).await;
            }
            Err(e) => {
                warn!("pod watch task failed: {e}; retrying in {WATCH_RETRY_BACKOFF:?}");
                tokio::time::sleep(WATCH_RETRY_BACKOFF).await;
            }
        }
    }
}

/// Emit topology snapshots on a fixed cadence, compensating for build time.
pub async fn snapshot_loop(state: SharedState) {
    let interval = Duration::from_secs(state.config.graph_interval_seconds.max(1));
    loop {
        let started = Instant::now();
        let snapshot = build_snapshot(
            state.cluster.as_ref(),
            &state.config.monitored_namespaces,
            &state.routes,
        )
        .await;
        state.pipeline.submit(snapshot);

        let delay = interval
            .saturating_sub(started.elapsed())
            .max(Duration::from_secs(1));
        tokio::time::sleep(delay).await;
    }
}

/// Run the collector: dispatcher, subscriber, watcher, snapshotter, and the
/// two HTTP servers.
pub async fn run(
    config: CollectorConfig,
    cluster: Arc<dyn ClusterApi>,
    bus: Arc<dyn EventBus>,
) -> anyhow::Result<()> {
    let (pipeline, dispatch_rx) = EventPipeline::new();
    let state = Arc::new(CollectorState {
        config: config.clone(),
        pipeline: Arc::new(pipeline),
        routes: Arc::new(RoutingTable::new()),
        local_ids: Arc::new(LocalEventIds::new()),
        cluster,
        bus,
    });

    let dispatcher = state.pipeline.clone();
    tokio::spawn(async move { dispatcher.dispatch_loop(dispatch_rx).await });

    let (bus_tx, mut bus_rx) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(subscribe(
        config.bus.url.clone(),
        channels::ALL.iter().map(|c| c.to_string()).collect(),
        bus_tx,
    ));
    let ingest_state = state.clone();
    tokio::spawn(async move {
        while let Some(message) = bus_rx.recv().await {
            ingest_bus_message(&ingest_state, message);
        }
    });

    tokio::spawn(pod_watch_loop(state.clone()));
    tokio::spawn(snapshot_loop(state.clone()));

    let ws_app = ws_router(state.clone());
    let ws_listener =
        tokio::net::TcpListener::bind(("0.0.0.0", config.websocket_port)).await?;
    info!(
        "event collector websocket listening on 0.0.0.0:{}",
        config.websocket_port
    );
    tokio::spawn(async move {
        if let Err(e) = axum::serve(ws_listener, ws_app).await {
            warn!("websocket server stopped: {e}");
        }
    });

    let rest_app = rest_router(state);
    let rest_listener = tokio::net::TcpListener::bind(("0.0.0.0", config.rest_port)).await?;
    info!("event collector rest listening on 0.0.0.0:{}", config.rest_port);
    axum::serve(rest_listener, rest_app).await?;

    Ok(())
}
