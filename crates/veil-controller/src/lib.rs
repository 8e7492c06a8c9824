//! VEIL deception controller
//!
//! The cluster operator of the control plane: consumes attack events,
//! materializes decoy pod sets under a strict capacity budget, gates
//! routing on readiness, and reaps sets whose TTL has passed.

pub mod controller;
pub mod service;
pub mod templates;

pub use controller::{
    ActiveSet, ControllerCounters, DeceptionController, Tuning, MAX_DECOY_PODS, MAX_DECOY_SETS,
    POD_READY_TIMEOUT, READY_POLL_INTERVAL, TTL_CHECK_INTERVAL,
};
pub use service::{router, run, SERVICE_NAME};
pub use templates::{create_decoy_set, sanitize_ip, service_endpoints, DecoySet, DecoySetParams};
