//! Stream command handler: prints events as JSON lines until stopped.

use anyhow::{Context, Result};
use tracing::{info, warn};
use yfwire::config::StreamConfig;
use yfwire::stream::{StreamEvent, StreamingClient};

/// Connects, subscribes to `symbols`, and prints every event.
///
/// Stops after `count` price updates, or on Ctrl-C.
pub async fn run_stream_command(config: StreamConfig, symbols: &[String], count: Option<usize>) -> Result<()> {
    let client = StreamingClient::new(config).context("Invalid stream configuration")?;
    let bridge = client.bridge();

    client.connect().await.context("Failed to connect to the streaming endpoint")?;
    client.subscribe(symbols).await.context("Failed to subscribe")?;
    info!(symbols = ?client.subscribed_symbols(), "streaming");

    let mut prices = 0usize;
    loop {
        tokio::select! {
            event = bridge.next() => {
                println!("{}", serde_json::to_string(&event)?);
                if matches!(event, StreamEvent::Price(_)) {
                    prices += 1;
                    if count.is_some_and(|limit| prices >= limit) {
                        break;
                    }
                }
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(error) = result {
                    warn!(error = %error, "failed to listen for Ctrl-C");
                }
                break;
            }
        }
    }

    client.disconnect().await;
    info!(prices, "stream finished");
    Ok(())
}
