//! VEIL event collector
//!
//! The observability plane of the control plane: merges every bus channel
//! with a cluster-wide pod watch (with echo suppression), mirrors the
//! attacker routing table, rebuilds topology snapshots on a fixed cadence,
//! and fans the unified event stream out to dashboard WebSocket clients.

pub mod pipeline;
pub mod routes;
pub mod service;
pub mod topology;

pub use pipeline::{
    normalize_bus_event, pod_update_event, EventPipeline, LocalEventIds, LOCAL_EVENT_ID_WINDOW,
    MAX_RECENT_EVENTS,
};
pub use routes::{endpoint_to_service_id, RouteEntry, RoutingTable};
pub use service::{ingest_bus_message, rest_router, run, ws_router, CollectorState, SERVICE_NAME};
pub use topology::{build_snapshot, infer_role, KNOWN_SERVICE_CONNECTIONS};
