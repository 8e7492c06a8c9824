//! VEIL foundation crate
//!
//! Shared building blocks for the deception control plane services:
//! - Environment-driven configuration for each service
//! - Wire event types published on the message bus
//! - The ambient HTTP layer (error shape, service-node header, request log)

pub mod config;
pub mod events;
pub mod http;

pub use config::{AnalyzerConfig, BusConfig, ClusterConfig, CollectorConfig, ControllerConfig};
pub use events::{
    AttackEvent, AttackType, DecoyEventKind, DecoyLifecycleEvent, Finding, PodUpdateEvent,
    RequestSummary, RoutingUpdate,
};
pub use http::ApiError;

/// Round a confidence score to two decimal places for wire output.
pub fn round_confidence(confidence: f64) -> f64 {
    (confidence * 100.0).round() / 100.0
}

/// Current time as an ISO-8601 UTC string, the timestamp format every
/// published event uses.
pub fn utc_now() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_rounds_to_two_decimals() {
        assert_eq!(round_confidence(0.956), 0.96);
        assert_eq!(round_confidence(0.6), 0.6);
        assert_eq!(round_confidence(0.684_999), 0.68);
    }
}
