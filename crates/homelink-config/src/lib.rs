//! Configuration system for Homelink.
//!
//! Provides TOML-based configuration with:
//! - Client tunables (`[client]`): request, handshake and shutdown timing
//! - Named MCP server entries (`[[servers]]`): command line and child environment
//! - Config file layering (user config dir + project-local overrides)

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigSource, LoadedConfig, load_config_file, load_config_with_options, user_config_dir,
    user_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
