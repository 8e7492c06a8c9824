//! Traffic Analyzer - Main Entry Point
//!
//! HTTP service that classifies mirrored requests and publishes attack
//! events on the bus.

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use veil_bus::RedisBus;
use veil_core::AnalyzerConfig;

#[derive(Parser, Debug)]
#[command(name = "veil-analyzer")]
#[command(about = "VEIL traffic analyzer - pattern and rate based attack classifier")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,

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
                .add_directive("veil_analyzer=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config = AnalyzerConfig::default();
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(bus_url) = args.bus_url {
        config.bus.url = bus_url;
    }

    info!(
        "🔍 starting traffic analyzer (port={}, threshold={})",
        config.port, config.confidence_threshold
    );

    let bus = Arc::new(RedisBus::new(config.bus.url.clone()));
    veil_analyzer::run(config, bus).await
}
