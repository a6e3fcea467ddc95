//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use yfwire::auth::Strategy;

/// Authenticated requests and live quotes from Yahoo Finance.
#[derive(Parser, Debug)]
#[command(name = "yfwire")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: $XDG_CONFIG_HOME/yfwire/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Cookie jar location
    #[arg(long, global = true, value_name = "PATH")]
    pub cookie_jar: Option<PathBuf>,

    /// Keep cookies in memory only
    #[arg(long, global = true)]
    pub no_cookie_jar: bool,

    /// Retries after the initial attempt (0-20)
    #[arg(short = 'r', long, global = true, value_parser = clap::value_parser!(u32).range(0..=20))]
    pub retries: Option<u32>,

    /// Starting crumb strategy (basic or consent)
    #[arg(long, global = true)]
    pub strategy: Option<Strategy>,

    /// Proxy URL (http://, https://, or socks5://)
    #[arg(long, global = true)]
    pub proxy: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Obtain a crumb and print it
    Crumb,

    /// Fetch a URL through the authenticated transport
    Get {
        /// URL to fetch
        url: String,

        /// Parse the body as JSON and pretty-print it
        #[arg(long)]
        json: bool,
    },

    /// Stream live price updates as JSON lines
    Stream {
        /// Symbols to subscribe to
        #[arg(required = true)]
        symbols: Vec<String>,

        /// Stop after this many price updates
        #[arg(short = 'n', long)]
        count: Option<usize>,

        /// Streaming endpoint override
        #[arg(long)]
        url: Option<String>,
    },

    /// Print the effective configuration
    ShowConfig,
}
