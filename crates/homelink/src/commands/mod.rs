//! CLI command handlers.

pub mod call;
pub mod check;
pub mod servers;
pub mod tools;

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use homelink_config::{ClientSettings, HomelinkConfig, ServerEntry, load_config_with_options};
use homelink_mcp::{McpClient, McpManager, McpServerConfig};

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
    /// Explicit user config directory.
    pub config_dir: Option<PathBuf>,
}

impl Context {
    /// Load the layered configuration, printing layer warnings to stderr.
    pub fn load_config(&self) -> Result<HomelinkConfig> {
        let loaded = load_config_with_options(None, self.config_dir.as_deref())
            .context("failed to load configuration")?;
        for warning in &loaded.warnings {
            eprintln!("warning: {warning}");
        }
        if self.verbose {
            for path in loaded.loaded_from() {
                eprintln!("config: {}", path.display());
            }
        }
        Ok(loaded.config)
    }

    /// Build a manager holding every enabled server. Nothing is spawned yet.
    pub fn manager(&self) -> Result<McpManager> {
        let config = self.load_config()?;
        let settings = config.client_settings();
        Ok(McpManager::with_configs(
            config
                .enabled_servers()
                .map(|entry| launch_config(entry, &settings))
                .collect(),
        ))
    }

    /// Build a client for a configured, enabled server. Nothing is spawned yet.
    pub fn client_for(&self, name: &str) -> Result<McpClient> {
        let config = self.load_config()?;
        let entry = config.require_server(name)?;
        Ok(McpClient::new(launch_config(entry, &config.client_settings())))
    }
}

/// Translate a config entry plus client tunables into a launch configuration.
pub fn launch_config(entry: &ServerEntry, settings: &ClientSettings) -> McpServerConfig {
    let mut config = McpServerConfig::new(&entry.name, &entry.command)
        .with_args(entry.args.clone())
        .with_transport_mode(&entry.transport_mode)
        .with_log_level(&entry.log_level)
        .with_request_timeout(settings.request_timeout())
        .with_init_timeout(settings.init_timeout())
        .with_shutdown_grace(settings.shutdown_grace());
    if let Some(limit) = settings.max_in_flight {
        config = config.with_max_in_flight(limit);
    }
    config
}

/// Print a pretty JSON value to stdout.
pub fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Truncate a string to a maximum number of characters.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
