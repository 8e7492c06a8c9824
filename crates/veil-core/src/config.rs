//! Environment-driven configuration
//!
//! Each service reads its configuration from the environment at startup,
//! with the same variable names and defaults across the whole control plane.
//! CLI flags in the binaries may override individual fields afterwards.

use std::str::FromStr;

/// Read an environment variable, falling back to a default.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read and parse an environment variable, falling back to a default on
/// absence or parse failure.
pub fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Message bus connection settings
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Redis URL (`REDIS_URL`)
    pub url: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: env_or(
                "REDIS_URL",
                "redis://redis.monitoring.svc.cluster.local:6379",
            ),
        }
    }
}

/// Container orchestrator API settings
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Base URL of the orchestrator's REST surface (`CLUSTER_API_URL`)
    pub base_url: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            base_url: env_or("CLUSTER_API_URL", "http://127.0.0.1:8001"),
        }
    }
}

/// Traffic analyzer configuration
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// HTTP listen port (`PORT`)
    pub port: u16,
    /// Findings at or below this confidence are not reported
    /// (`CONFIDENCE_THRESHOLD`, strict greater-than)
    pub confidence_threshold: f64,
    pub bus: BusConfig,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            port: env_parse("PORT", 8085),
            confidence_threshold: env_parse("CONFIDENCE_THRESHOLD", 0.6),
            bus: BusConfig::default(),
        }
    }
}

/// Deception controller configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// HTTP listen port (`PORT`)
    pub port: u16,
    /// Namespace decoy sets are created in (`DECOY_NAMESPACE`)
    pub decoy_namespace: String,
    /// Default time-to-live for a decoy set (`DECOY_TTL_MINUTES`)
    pub ttl_minutes: u64,
    pub bus: BusConfig,
    pub cluster: ClusterConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            port: env_parse("PORT", 8086),
            decoy_namespace: env_or("DECOY_NAMESPACE", "decoy-pool"),
            ttl_minutes: env_parse("DECOY_TTL_MINUTES", 10),
            bus: BusConfig::default(),
            cluster: ClusterConfig::default(),
        }
    }
}

/// Event collector configuration
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// REST listen port (`REST_PORT`)
    pub rest_port: u16,
    /// WebSocket listen port (`WEBSOCKET_PORT`)
    pub websocket_port: u16,
    /// Seconds between topology snapshots (`GRAPH_INTERVAL_SECONDS`)
    pub graph_interval_seconds: u64,
    /// Namespaces included in topology snapshots (`MONITORED_NAMESPACES`,
    /// comma-separated)
    pub monitored_namespaces: Vec<String>,
    pub bus: BusConfig,
    pub cluster: ClusterConfig,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        let namespaces = env_or(
            "MONITORED_NAMESPACES",
            "ecommerce-real,deception-gateway,decoy-pool,monitoring",
        );
        Self {
            rest_port: env_parse("REST_PORT", 8091),
            websocket_port: env_parse("WEBSOCKET_PORT", 8090),
            graph_interval_seconds: env_parse("GRAPH_INTERVAL_SECONDS", 5),
            monitored_namespaces: namespaces
                .split(',')
                .map(str::trim)
                .filter(|ns| !ns.is_empty())
                .map(str::to_string)
                .collect(),
            bus: BusConfig::default(),
            cluster: ClusterConfig::default(),
        }
    }
}
