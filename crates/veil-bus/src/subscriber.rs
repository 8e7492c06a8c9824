//! Reconnecting bus subscriber
//!
//! Owns a dedicated pub/sub connection (publishing and subscribing cannot
//! share one), forwards every message into an mpsc sender, and reconnects
//! with a fixed backoff on any error. No read timeout is applied: an idle
//! bus is healthy.

use std::time::Duration;

use anyhow::Context;
use futures_util::StreamExt;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

/// Backoff between reconnect attempts
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Connect timeout for subscriber connections
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// One message received from the bus
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub channel: String,
    /// Parsed JSON payload; non-JSON payloads arrive as `{"message": <text>}`
    pub payload: serde_json::Value,
}

/// Subscribe to `channel_names` forever, forwarding into `sender`. Returns
/// only once the receiving side has been dropped.
pub async fn subscribe(url: String, channel_names: Vec<String>, sender: UnboundedSender<BusMessage>) {
    loop {
        if sender.is_closed() {
            return;
        }

        if let Err(e) = subscribe_once(&url, &channel_names, &sender).await {
            warn!("bus subscription error: {e}; retrying in {RECONNECT_BACKOFF:?}");
        }

        tokio::time::sleep(RECONNECT_BACKOFF).await;
    }
}

async fn subscribe_once(
    url: &str,
    channel_names: &[String],
    sender: &UnboundedSender<BusMessage>,
) -> anyhow::Result<()> {
    let client = redis::Client::open(url).context("invalid bus URL")?;
    let conn = tokio::time::timeout(CONNECT_TIMEOUT, client.get_async_connection())
        .await
        .context("bus connect timed out")?
        .context("bus connect failed")?;

    let mut pubsub = conn.into_pubsub();
    for channel in channel_names {
        pubsub.subscribe(channel.as_str()).await?;
    }
    info!("subscribed to bus channels: {}", channel_names.join(", "));

    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let channel = msg.get_channel_name().to_string();
        let payload = match msg.get_payload::<String>() {
            Ok(text) => parse_payload(&text),
            Err(e) => {
                warn!("undecodable payload on {channel}: {e}");
                continue;
            }
        };

        if sender.send(BusMessage { channel, payload }).is_err() {
            // Receiver gone; the outer loop will observe the closed sender.
            return Ok(());
        }
    }

    Ok(())
}

/// Best-effort JSON parse; plain-text payloads are wrapped rather than lost.
fn parse_payload(text: &str) -> serde_json::Value {
    serde_json::from_str(text)
        .unwrap_or_else(|_| serde_json::json!({ "message": text }))
}
