//! Bus channel names

/// Attack verdicts from the traffic analyzer
pub const ATTACK_DETECTED: &str = "attack_detected";

/// Decoy set lifecycle events from the deception controller
pub const DECOY_SPAWNED: &str = "decoy_spawned";

/// Attacker activity reported by decoy replicas
pub const DECOY_INTERACTION: &str = "decoy_interaction";

/// Routing table changes consumed by the traffic-router
pub const ROUTING_UPDATE: &str = "routing_update";

/// Pod watch events re-published by the event collector
pub const POD_STATUS: &str = "pod_status";

/// Every channel, in the order the collector subscribes to them
pub const ALL: [&str; 5] = [
    ATTACK_DETECTED,
    DECOY_SPAWNED,
    DECOY_INTERACTION,
    ROUTING_UPDATE,
    POD_STATUS,
];
