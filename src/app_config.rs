//! Config file loading for CLI defaults.
//!
//! The file is a flat list of `key = value` lines with `#` comments. Strings
//! are double-quoted; durations are integers with the unit in the key name.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use yfwire::auth::Strategy;
use yfwire::config::{ClientConfig, Endpoints, ProxyConfig, StreamConfig};

/// File-level overrides; `None` keeps the library default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileConfig {
    /// Per-attempt HTTP timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Retries after the initial attempt.
    pub retries: Option<u32>,
    /// Base retry delay in milliseconds.
    pub retry_delay_ms: Option<u64>,
    /// Fixed pre-call delay in milliseconds.
    pub pacing_delay_ms: Option<u64>,
    /// User-Agent header.
    pub user_agent: Option<String>,
    /// Persist cookies to disk.
    pub cookie_jar: Option<bool>,
    /// Cookie jar location.
    pub cookie_jar_path: Option<PathBuf>,
    /// Proxy URL.
    pub proxy: Option<String>,
    /// Starting crumb strategy.
    pub strategy: Option<Strategy>,
    /// Base URL replacing every authentication endpoint host.
    pub endpoint_base: Option<String>,
    /// Streaming endpoint.
    pub stream_url: Option<String>,
    /// Reconnect after unexpected closures.
    pub auto_reconnect: Option<bool>,
    /// Base reconnect delay in milliseconds.
    pub reconnect_interval_ms: Option<u64>,
    /// Reconnect attempts before giving up.
    pub max_reconnect_attempts: Option<u32>,
    /// Heartbeat interval in seconds.
    pub heartbeat_interval_secs: Option<u64>,
    /// Handshake bound in seconds.
    pub connection_timeout_secs: Option<u64>,
    /// Re-send subscriptions after reconnecting.
    pub resubscribe_on_reconnect: Option<bool>,
}

impl FileConfig {
    /// Validates values against the ranges the library accepts.
    pub fn validate(&self) -> Result<()> {
        validate_range("timeout_secs", self.timeout_secs, 1, 3600)?;
        validate_range("retries", self.retries.map(u64::from), 0, 20)?;
        validate_range("retry_delay_ms", self.retry_delay_ms, 0, 300_000)?;
        validate_range("pacing_delay_ms", self.pacing_delay_ms, 0, 60_000)?;
        validate_range("reconnect_interval_ms", self.reconnect_interval_ms, 0, 600_000)?;
        validate_range("heartbeat_interval_secs", self.heartbeat_interval_secs, 1, 3600)?;
        validate_range("connection_timeout_secs", self.connection_timeout_secs, 1, 600)?;
        if let Some(user_agent) = &self.user_agent
            && user_agent.trim().is_empty()
        {
            bail!("Invalid config value for `user_agent`: must not be empty");
        }
        Ok(())
    }

    /// Applies every set field onto the library configs.
    pub fn apply(&self, client: &mut ClientConfig, stream: &mut StreamConfig) {
        if let Some(secs) = self.timeout_secs {
            client.timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = self.retries {
            client.retries = retries;
        }
        if let Some(ms) = self.retry_delay_ms {
            client.retry_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.pacing_delay_ms {
            client.pacing_delay = Duration::from_millis(ms);
        }
        if let Some(user_agent) = &self.user_agent {
            client.user_agent.clone_from(user_agent);
        }
        if let Some(enabled) = self.cookie_jar {
            client.cookie_jar.enabled = enabled;
        }
        if let Some(path) = &self.cookie_jar_path {
            client.cookie_jar.path = Some(path.clone());
        }
        if let Some(proxy) = &self.proxy {
            client.proxy = Some(ProxyConfig::Url(proxy.clone()));
        }
        if let Some(strategy) = self.strategy {
            client.strategy = strategy;
        }
        if let Some(base) = &self.endpoint_base {
            client.endpoints = Endpoints::with_base(base);
        }
        if let Some(url) = &self.stream_url {
            stream.url.clone_from(url);
        }
        if let Some(enabled) = self.auto_reconnect {
            stream.auto_reconnect = enabled;
        }
        if let Some(ms) = self.reconnect_interval_ms {
            stream.reconnect_interval = Duration::from_millis(ms);
        }
        if let Some(max) = self.max_reconnect_attempts {
            stream.max_reconnect_attempts = max;
        }
        if let Some(secs) = self.heartbeat_interval_secs {
            stream.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.connection_timeout_secs {
            stream.connection_timeout = Duration::from_secs(secs);
        }
        if let Some(enabled) = self.resubscribe_on_reconnect {
            stream.resubscribe_on_reconnect = enabled;
        }
    }
}

fn validate_range(field: &str, value: Option<u64>, min: u64, max: u64) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(min..=max).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: {min}..={max}");
    }
    Ok(())
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Path that was (or would have been) read.
    pub path: Option<PathBuf>,
    /// Parsed config when the file existed.
    pub config: Option<FileConfig>,
}

impl LoadedConfig {
    /// Whether the values came from disk.
    #[must_use]
    pub fn loaded_from_file(&self) -> bool {
        self.config.is_some()
    }
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/yfwire/config.toml`
/// 2. `$HOME/.config/yfwire/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join("yfwire").join("config.toml"));
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(PathBuf::from(home).join(".config").join("yfwire").join("config.toml"))
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads an explicit config file, or the default one if present.
///
/// An explicit path must exist; a missing default file means defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        let config = load_file_config(path)?;
        return Ok(LoadedConfig {
            path: Some(path.to_path_buf()),
            config: Some(config),
        });
    }

    let path = resolve_default_config_path();
    let config = match path.as_deref() {
        Some(path_ref) if path_ref.exists() => Some(load_file_config(path_ref)?),
        _ => None,
    };
    Ok(LoadedConfig { path, config })
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw).with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let line_number = line_index + 1;

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_number}: expected key = value");
        };
        let key = raw_key.trim();
        let value = raw_value.trim();
        let context = || format!("Invalid `{key}` value on line {line_number}");

        match key {
            "timeout_secs" => cfg.timeout_secs = Some(parse_integer_u64(value).with_context(context)?),
            "retries" => cfg.retries = Some(parse_integer_u32(value).with_context(context)?),
            "retry_delay_ms" => cfg.retry_delay_ms = Some(parse_integer_u64(value).with_context(context)?),
            "pacing_delay_ms" => cfg.pacing_delay_ms = Some(parse_integer_u64(value).with_context(context)?),
            "user_agent" => cfg.user_agent = Some(parse_string_literal(value).with_context(context)?),
            "cookie_jar" => cfg.cookie_jar = Some(parse_boolean(value).with_context(context)?),
            "cookie_jar_path" => {
                cfg.cookie_jar_path = Some(PathBuf::from(parse_string_literal(value).with_context(context)?));
            }
            "proxy" => cfg.proxy = Some(parse_string_literal(value).with_context(context)?),
            "strategy" => {
                let parsed = parse_string_literal(value).with_context(context)?;
                let strategy = parsed
                    .parse::<Strategy>()
                    .map_err(anyhow::Error::msg)
                    .with_context(context)?;
                cfg.strategy = Some(strategy);
            }
            "endpoint_base" => cfg.endpoint_base = Some(parse_string_literal(value).with_context(context)?),
            "stream_url" => cfg.stream_url = Some(parse_string_literal(value).with_context(context)?),
            "auto_reconnect" => cfg.auto_reconnect = Some(parse_boolean(value).with_context(context)?),
            "reconnect_interval_ms" => {
                cfg.reconnect_interval_ms = Some(parse_integer_u64(value).with_context(context)?);
            }
            "max_reconnect_attempts" => {
                cfg.max_reconnect_attempts = Some(parse_integer_u32(value).with_context(context)?);
            }
            "heartbeat_interval_secs" => {
                cfg.heartbeat_interval_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "connection_timeout_secs" => {
                cfg.connection_timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "resubscribe_on_reconnect" => {
                cfg.resubscribe_on_reconnect = Some(parse_boolean(value).with_context(context)?);
            }
            unknown => bail!("Unknown configuration key: '{unknown}' on line {line_number}"),
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

fn parse_integer_u32(raw_value: &str) -> Result<u32> {
    let value = parse_integer_u64(raw_value)?;
    u32::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u32"))
}

fn parse_boolean(raw_value: &str) -> Result<bool> {
    match raw_value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => bail!("Expected 'true' or 'false'"),
    }
}
