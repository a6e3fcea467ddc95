//! CLI command handlers.

mod config;
mod crumb;
mod get;
mod stream;

pub use config::run_show_config_command;
pub use crumb::run_crumb_command;
pub use get::run_get_command;
pub use stream::run_stream_command;
