//! Get command handler: one request through the authenticated transport.

use anyhow::{Context, Result};
use reqwest::Method;
use yfwire::config::ClientConfig;
use yfwire::transport::Transport;

/// Fetches `url` and prints the body, pretty-printed when `json` is set.
pub async fn run_get_command(config: &ClientConfig, url: &str, json: bool) -> Result<()> {
    let transport = Transport::new(config).context("Failed to build HTTP transport")?;
    let response = transport
        .request(Method::GET, url, None, None)
        .await
        .with_context(|| format!("Request to {url} failed"))?;

    if json {
        let value: serde_json::Value = response.json().context("Response body is not JSON")?;
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        print!("{}", response.text());
    }
    Ok(())
}
