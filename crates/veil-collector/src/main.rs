//! Event Collector - Main Entry Point
//!
//! Merges bus and cluster event streams and serves them to dashboard
//! clients over WebSocket, with a REST surface for recent history.

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use veil_bus::RedisBus;
use veil_cluster::HttpCluster;
use veil_core::CollectorConfig;

#[derive(Parser, Debug)]
#[command(name = "veil-collector")]
#[command(about = "VEIL event collector - unified event stream and topology snapshots")]
#[command(version)]
struct Args {
    /// REST port (overrides REST_PORT)
    #[arg(long)]
    rest_port: Option<u16>,

    /// WebSocket port (overrides WEBSOCKET_PORT)
    #[arg(long)]
    websocket_port: Option<u16>,

    /// Orchestrator API URL (overrides CLUSTER_API_URL)
    #[arg(long)]
    cluster_url: Option<String>,

    /// Bus URL (overrides REDIS_URL)
    #[arg(long)]
    bus_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("veil_collector=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config = CollectorConfig::default();
    if let Some(rest_port) = args.rest_port {
        config.rest_port = rest_port;
    }
    if let Some(websocket_port) = args.websocket_port {
        config.websocket_port = websocket_port;
    }
    if let Some(cluster_url) = args.cluster_url {
        config.cluster.base_url = cluster_url;
    }
    if let Some(bus_url) = args.bus_url {
        config.bus.url = bus_url;
    }

    info!(
        "📡 starting event collector (websocket={}, rest={}, namespaces={:?})",
        config.websocket_port, config.rest_port, config.monitored_namespaces
    );

    let cluster = Arc::new(HttpCluster::new(&config.cluster.base_url)?);
    let bus = Arc::new(RedisBus::new(config.bus.url.clone()));
    veil_collector::run(config, cluster, bus).await
}
