//! Config command handler: show effective configuration.

use yfwire::config::{ClientConfig, StreamConfig};

use crate::app_config::LoadedConfig;

pub fn run_show_config_command(loaded: &LoadedConfig, client: &ClientConfig, stream: &StreamConfig) {
    let resolved_path = loaded
        .path
        .as_ref()
        .map_or_else(|| "<unresolved>".to_string(), |path| path.display().to_string());
    println!("config_path = {resolved_path}");
    println!(
        "config_file = {}",
        if loaded.loaded_from_file() {
            "loaded"
        } else {
            "not found (using defaults)"
        }
    );
    println!("timeout_secs = {}", client.timeout.as_secs());
    println!("retries = {}", client.retries);
    println!("retry_delay_ms = {}", client.retry_delay.as_millis());
    println!("pacing_delay_ms = {}", client.pacing_delay.as_millis());
    println!("user_agent = {}", client.user_agent);
    println!(
        "cookie_jar = {}",
        client
            .cookie_jar
            .resolved_path()
            .map_or_else(|| "disabled".to_string(), |path| path.display().to_string())
    );
    println!(
        "proxy = {}",
        if client.proxy.is_some() { "configured" } else { "none" }
    );
    println!("strategy = {}", client.strategy);
    println!("crumb_endpoint = {}", client.endpoints.crumb);
    println!("stream_url = {}", stream.url);
    println!("auto_reconnect = {}", stream.auto_reconnect);
    println!("reconnect_interval_ms = {}", stream.reconnect_interval.as_millis());
    println!("max_reconnect_attempts = {}", stream.max_reconnect_attempts);
    println!("heartbeat_interval_secs = {}", stream.heartbeat_interval.as_secs());
    println!("connection_timeout_secs = {}", stream.connection_timeout.as_secs());
    println!("resubscribe_on_reconnect = {}", stream.resubscribe_on_reconnect);
}
