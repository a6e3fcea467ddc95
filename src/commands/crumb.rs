//! Crumb command handler.

use anyhow::{Context, Result, bail};
use tracing::info;
use yfwire::config::ClientConfig;
use yfwire::transport::Transport;

/// Obtains a crumb (trying both strategies) and prints it.
pub async fn run_crumb_command(config: &ClientConfig) -> Result<()> {
    let transport = Transport::new(config).context("Failed to build HTTP transport")?;
    let Some(crumb) = transport.auth().get_crumb().await else {
        bail!("Could not obtain a crumb with either strategy");
    };
    info!(strategy = %transport.auth().strategy(), "crumb obtained");
    println!("{crumb}");
    Ok(())
}
