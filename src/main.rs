//! CLI entry point for yfwire.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;
use yfwire::config::{ClientConfig, ProxyConfig, StreamConfig};

mod app_config;
mod cli;
mod commands;

use app_config::{LoadedConfig, load_config};
use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // Logs go to stderr; stdout carries command output.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?cli, "CLI arguments parsed");

    let loaded = load_config(cli.config.as_deref())?;
    let (client_config, stream_config) = resolve_settings(&cli, &loaded);
    client_config.validate().context("Invalid client configuration")?;

    match &cli.command {
        Command::Crumb => commands::run_crumb_command(&client_config).await,
        Command::Get { url, json } => commands::run_get_command(&client_config, url, *json).await,
        Command::Stream { symbols, count, url } => {
            let mut stream_config = stream_config;
            if let Some(url) = url {
                stream_config.url.clone_from(url);
            }
            commands::run_stream_command(stream_config, symbols, *count).await
        }
        Command::ShowConfig => {
            commands::run_show_config_command(&loaded, &client_config, &stream_config);
            Ok(())
        }
    }
}

/// Library defaults, then file values, then CLI flags.
fn resolve_settings(cli: &Cli, loaded: &LoadedConfig) -> (ClientConfig, StreamConfig) {
    let mut client = ClientConfig::default();
    let mut stream = StreamConfig::default();
    if let Some(file) = &loaded.config {
        file.apply(&mut client, &mut stream);
    }

    if let Some(retries) = cli.retries {
        client.retries = retries;
    }
    if let Some(strategy) = cli.strategy {
        client.strategy = strategy;
    }
    if let Some(proxy) = &cli.proxy {
        client.proxy = Some(ProxyConfig::Url(proxy.clone()));
    }
    if let Some(path) = &cli.cookie_jar {
        client.cookie_jar.enabled = true;
        client.cookie_jar.path = Some(path.clone());
    }
    if cli.no_cookie_jar {
        client.cookie_jar.enabled = false;
    }
    (client, stream)
}
