//! Lifecycle management for several named MCP servers.
//!
//! # Example
//!
//! ```rust,ignore
//! use homelink_mcp::{McpManager, McpServerConfig};
//!
//! let mut manager = McpManager::new();
//! manager.add_server(McpServerConfig::new("smartthings", "mcp-smartthings"));
//!
//! manager.connect_all().await;
//! for (server, tool) in manager.all_tools_flat().await {
//!     println!("{server}: {}", tool.name);
//! }
//!
//! manager.shutdown_all().await;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;

use crate::client::{McpClient, McpServerConfig};
use crate::error::{McpError, Result};
use crate::protocol::{ToolDefinition, ToolResult};

/// Manager for multiple MCP server connections.
#[derive(Default)]
pub struct McpManager {
    /// Server configurations (before connection).
    configs: HashMap<String, McpServerConfig>,
    /// Connected and initialized clients.
    clients: HashMap<String, Arc<McpClient>>,
}

impl McpManager {
    /// Create a new empty MCP manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a manager with the given server configurations.
    pub fn with_configs(configs: Vec<McpServerConfig>) -> Self {
        let mut manager = Self::new();
        for config in configs {
            manager.configs.insert(config.name.clone(), config);
        }
        manager
    }

    /// Add a server configuration, replacing one with the same name.
    ///
    /// The server is not started until it is connected.
    pub fn add_server(&mut self, config: McpServerConfig) {
        let name = config.name.clone();
        tracing::debug!(server = %name, "adding MCP server configuration");
        self.configs.insert(name, config);
    }

    /// Close and forget a server. Returns true if it was configured.
    pub async fn remove_server(&mut self, name: &str) -> bool {
        self.shutdown_server(name).await;

        if self.configs.remove(name).is_some() {
            tracing::debug!(server = %name, "removed MCP server configuration");
            true
        } else {
            false
        }
    }

    /// Names of all configured servers, sorted.
    pub fn server_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.configs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Names of all connected servers, sorted.
    pub fn connected_server_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.clients.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Check if a server is configured.
    pub fn has_server(&self, name: &str) -> bool {
        self.configs.contains_key(name)
    }

    /// Check if a server is connected and its session is ready.
    pub fn is_connected(&self, name: &str) -> bool {
        self.clients.get(name).is_some_and(|c| c.is_ready())
    }

    /// Get a connected client by name.
    pub fn get_client(&self, name: &str) -> Option<Arc<McpClient>> {
        self.clients.get(name).cloned()
    }

    /// Connect every configured server that is not already connected.
    ///
    /// Servers are started concurrently. Failures are logged and skipped.
    /// Returns the number of servers connected by this call.
    pub async fn connect_all(&mut self) -> usize {
        let pending: Vec<McpServerConfig> = self
            .configs
            .values()
            .filter(|c| !self.is_connected(&c.name))
            .cloned()
            .collect();

        let attempts = pending.into_iter().map(|config| async move {
            let name = config.name.clone();
            (name, Self::connect_server(config).await)
        });

        let mut connected = 0;
        for (name, outcome) in join_all(attempts).await {
            match outcome {
                Ok(client) => {
                    self.clients.insert(name.clone(), Arc::new(client));
                    connected += 1;
                    tracing::info!(server = %name, "MCP server connected");
                }
                Err(e) => {
                    tracing::error!(server = %name, error = %e, "failed to connect to MCP server");
                }
            }
        }

        tracing::info!(
            connected,
            total = self.configs.len(),
            "MCP server connection complete"
        );

        connected
    }

    async fn connect_server(config: McpServerConfig) -> Result<McpClient> {
        let client = McpClient::new(config);
        client.initialize().await?;
        Ok(client)
    }

    /// Connect a single server by name and return its client.
    ///
    /// A client that is already ready is returned as is; a faulted one is
    /// re-initialized.
    pub async fn connect_server_by_name(&mut self, name: &str) -> Result<Arc<McpClient>> {
        if let Some(client) = self.clients.get(name) {
            if !client.is_ready() {
                client.initialize().await?;
            }
            return Ok(client.clone());
        }

        let config = self
            .configs
            .get(name)
            .ok_or_else(|| McpError::protocol(format!("server '{name}' not configured")))?
            .clone();

        let client = Arc::new(Self::connect_server(config).await?);
        self.clients.insert(name.to_string(), client.clone());
        tracing::info!(server = %name, "MCP server connected");
        Ok(client)
    }

    /// List tools from every connected server, keyed by server name.
    ///
    /// Servers whose listing fails are logged and left out.
    pub async fn list_all_tools(&self) -> HashMap<String, Vec<ToolDefinition>> {
        let listings = self.clients.iter().map(|(name, client)| async move {
            (name.clone(), client.list_tools().await)
        });

        let mut all_tools = HashMap::new();
        for (name, outcome) in join_all(listings).await {
            match outcome {
                Ok(tools) => {
                    tracing::debug!(server = %name, tool_count = tools.len(), "listed tools");
                    all_tools.insert(name, tools);
                }
                Err(e) => {
                    tracing::error!(server = %name, error = %e, "failed to list tools");
                }
            }
        }
        all_tools
    }

    /// Flat `(server, tool)` list across all connected servers, sorted.
    pub async fn all_tools_flat(&self) -> Vec<(String, ToolDefinition)> {
        let mut flat: Vec<(String, ToolDefinition)> = self
            .list_all_tools()
            .await
            .into_iter()
            .flat_map(|(server, tools)| tools.into_iter().map(move |t| (server.clone(), t)))
            .collect();
        flat.sort_by(|a, b| (&a.0, &a.1.name).cmp(&(&b.0, &b.1.name)));
        flat
    }

    /// Total number of tools across all connected servers.
    pub async fn tool_count(&self) -> usize {
        self.list_all_tools().await.values().map(Vec::len).sum()
    }

    /// Call a tool on a connected server.
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResult> {
        let client = self.clients.get(server).ok_or(McpError::NotInitialized)?;
        client.call_tool(tool, arguments).await
    }

    /// Close every connected server. Configurations are kept.
    pub async fn shutdown_all(&mut self) {
        tracing::info!(
            server_count = self.clients.len(),
            "shutting down all MCP servers"
        );

        let closing = self.clients.drain().map(|(name, client)| async move {
            if let Err(e) = client.close().await {
                tracing::warn!(server = %name, error = %e, "error closing MCP server");
            }
        });
        join_all(closing).await;
    }

    /// Close one server. Returns true if it was connected.
    pub async fn shutdown_server(&mut self, name: &str) -> bool {
        let Some(client) = self.clients.remove(name) else {
            return false;
        };
        tracing::info!(server = %name, "shutting down MCP server");
        if let Err(e) = client.close().await {
            tracing::warn!(server = %name, error = %e, "error closing MCP server");
        }
        true
    }

    /// Get the number of configured servers.
    pub fn config_count(&self) -> usize {
        self.configs.len()
    }

    /// Get the number of connected servers.
    pub fn connected_count(&self) -> usize {
        self.clients.len()
    }

    /// Check if any servers are connected.
    pub fn has_connections(&self) -> bool {
        !self.clients.is_empty()
    }
}

impl std::fmt::Debug for McpManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpManager")
            .field("configured", &self.server_names())
            .field("connected", &self.connected_server_names())
            .finish()
    }
}
