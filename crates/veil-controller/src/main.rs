//! Deception Controller - Main Entry Point
//!
//! Subscribes to attack events and manages decoy set lifecycle against the
//! cluster. A reachable orchestrator endpoint is the one hard startup
//! requirement; everything else degrades gracefully.

use std::sync::Arc;

use anyhow::bail;
use clap::Parser;
use tracing::info;

use veil_bus::RedisBus;
use veil_cluster::{ClusterApi, HttpCluster};
use veil_core::ControllerConfig;

#[derive(Parser, Debug)]
#[command(name = "veil-controller")]
#[command(about = "VEIL deception controller - spawns and reaps decoy pod sets")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,

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
                .add_directive("veil_controller=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config = ControllerConfig::default();
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(cluster_url) = args.cluster_url {
        config.cluster.base_url = cluster_url;
    }
    if let Some(bus_url) = args.bus_url {
        config.bus.url = bus_url;
    }

    info!(
        "🛡️ starting deception controller (namespace={}, ttl={}m)",
        config.decoy_namespace, config.ttl_minutes
    );

    let cluster = Arc::new(HttpCluster::new(&config.cluster.base_url)?);
    if !cluster.ping().await {
        bail!(
            "cluster API unreachable at {}; cannot operate without cluster access",
            config.cluster.base_url
        );
    }
    info!("cluster API reachable at {}", config.cluster.base_url);

    let bus = Arc::new(RedisBus::new(config.bus.url.clone()));
    veil_controller::run(config, cluster, bus).await
}
