//! Configuration types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

/// Root configuration structure.
///
/// Maps to the top-level TOML document:
/// ```toml
/// [client]
/// request_timeout_secs = 30
///
/// [[servers]]
/// name = "smartthings"
/// command = "node"
/// args = ["dist/index.js"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HomelinkConfig {
    /// Client tunables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientSettings>,

    /// Configured MCP servers.
    pub servers: Vec<ServerEntry>,
}

impl HomelinkConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string and validate server entries.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// `[client]` is replaced as a whole; servers are merged by name, an
    /// entry in `other` replacing the one with the same name in place.
    pub fn merge(&mut self, other: HomelinkConfig) {
        if other.client.is_some() {
            self.client = other.client;
        }

        for entry in other.servers {
            match self.servers.iter_mut().find(|s| s.name == entry.name) {
                Some(existing) => *existing = entry,
                None => self.servers.push(entry),
            }
        }
    }

    /// Effective client settings.
    pub fn client_settings(&self) -> ClientSettings {
        self.client.clone().unwrap_or_default()
    }

    /// Look up a server entry by name.
    pub fn server(&self, name: &str) -> Option<&ServerEntry> {
        self.servers.iter().find(|s| s.name == name)
    }

    /// Look up a server that must exist and be enabled.
    pub fn require_server(&self, name: &str) -> Result<&ServerEntry> {
        let entry = self
            .server(name)
            .ok_or_else(|| ConfigError::ServerNotFound(name.to_string()))?;
        if !entry.enabled {
            return Err(ConfigError::ServerDisabled(name.to_string()));
        }
        Ok(entry)
    }

    /// Servers with `enabled = true`, in file order.
    pub fn enabled_servers(&self) -> impl Iterator<Item = &ServerEntry> {
        self.servers.iter().filter(|s| s.enabled)
    }

    /// Add or replace a server entry.
    pub fn upsert_server(&mut self, entry: ServerEntry) {
        self.merge(HomelinkConfig {
            client: None,
            servers: vec![entry],
        });
    }

    /// Remove a server entry by name. Returns true if it existed.
    pub fn remove_server(&mut self, name: &str) -> bool {
        let before = self.servers.len();
        self.servers.retain(|s| s.name != name);
        self.servers.len() != before
    }

    fn validate(&self) -> Result<()> {
        for (i, entry) in self.servers.iter().enumerate() {
            if entry.name.trim().is_empty() {
                return Err(ConfigError::MissingField {
                    field: "name".to_string(),
                    context: format!("servers[{i}]"),
                });
            }
            if entry.command.trim().is_empty() {
                return Err(ConfigError::MissingField {
                    field: "command".to_string(),
                    context: format!("servers.{}", entry.name),
                });
            }
            if self.servers[..i].iter().any(|s| s.name == entry.name) {
                return Err(ConfigError::DuplicateServer(entry.name.clone()));
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client Settings
// ─────────────────────────────────────────────────────────────────────────────

/// Client tunables (`[client]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Ceiling for each request, in seconds.
    pub request_timeout_secs: u64,
    /// Ceiling for the initialize handshake, in seconds.
    pub init_timeout_secs: u64,
    /// Wait between SIGTERM and SIGKILL on close, in seconds.
    pub shutdown_grace_secs: u64,
    /// Optional cap on outstanding requests per server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_in_flight: Option<usize>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            init_timeout_secs: 30,
            shutdown_grace_secs: 5,
            max_in_flight: None,
        }
    }
}

impl ClientSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server Entries
// ─────────────────────────────────────────────────────────────────────────────

fn default_transport_mode() -> String {
    "stdio".to_string()
}

fn default_log_level() -> String {
    "error".to_string()
}

fn default_enabled() -> bool {
    true
}

/// Configuration for a single MCP server (`[[servers]]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    /// Unique name for this server.
    pub name: String,
    /// Command to execute to start the server.
    #[serde(default)]
    pub command: String,
    /// Arguments to pass to the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Transport mode handed to the child as `MCP_TRANSPORT`.
    #[serde(default = "default_transport_mode")]
    pub transport_mode: String,
    /// Log level handed to the child as `LOG_LEVEL`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Whether this server is enabled. Defaults to true.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl ServerEntry {
    /// Create a new server entry.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            transport_mode: default_transport_mode(),
            log_level: default_log_level(),
            enabled: true,
        }
    }

    /// Add an argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set the child's log level.
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Set whether the server is enabled.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
