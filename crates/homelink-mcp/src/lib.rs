//! MCP (Model Context Protocol) client for Homelink.
//!
//! Homelink talks to device-integration servers (SmartThings and friends) that
//! run as child processes and speak JSON-RPC 2.0 over their stdio streams.
//! This crate spawns and supervises those processes, correlates requests with
//! responses, and exposes a small async facade for the handshake, tool
//! discovery and tool invocation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  McpClient                                                  │
//! │  - initialize, tools/list, tools/call, close                │
//! │  - session state machine and error mapping                  │
//! └─────────────────────────────────────────────────────────────┘
//!          │ register / wait                    ▲ events
//!          ▼                                    │
//! ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │  Correlator              │   │  ProcessSupervisor           │
//! │  - id allocation         │   │  - spawn with piped stdio    │
//! │  - pending map, timeouts │   │  - stdout pump, stderr log   │
//! │  - drain on exit/close   │   │  - SIGTERM, then SIGKILL     │
//! └──────────────────────────┘   └──────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  codec                                                      │
//! │  - one compact JSON object per line, `\n` terminated        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use homelink_mcp::{McpClient, McpServerConfig};
//! use serde_json::json;
//!
//! let config = McpServerConfig::new("smartthings", "mcp-smartthings")
//!     .with_arg("--stdio");
//!
//! let client = McpClient::new(config);
//! let info = client.initialize().await?;
//! println!("Connected to: {} v{}", info.server_info.name, info.server_info.version);
//!
//! for tool in client.list_tools().await? {
//!     println!("Tool: {} - {:?}", tool.name, tool.description);
//! }
//!
//! let result = client.call_tool("turnOn", json!({"deviceId": "abc"})).await?;
//! println!("Result: {:?}", result.text());
//!
//! client.close().await?;
//! ```
//!
//! # Protocol flow
//!
//! 1. Client sends `initialize` with capabilities
//! 2. Server responds with its capabilities
//! 3. Client sends `notifications/initialized`
//! 4. Client can now call `tools/list` and `tools/call`
//!
//! Requests the server sends to the client are answered with
//! "method not found"; server notifications are logged and dropped.

pub mod client;
pub mod codec;
pub mod correlator;
pub mod error;
pub mod manager;
pub mod process;
pub mod protocol;

// Re-export main types
pub use client::{McpClient, McpServerConfig, SessionState};
pub use codec::{FrameDecoder, FrameWriter, encode_frame};
pub use correlator::{Correlator, DrainReason, ResponseHandle};
pub use error::{McpError, Result};
pub use manager::McpManager;
pub use process::{ExitInfo, ProcessEvent, ProcessSupervisor};
pub use protocol::{
    CallToolParams, ContentBlock, InitializeParams, InitializeResult, InputSchema, JsonRpcError,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListToolsResult, ServerCapabilities,
    ServerInfo, ToolDefinition, ToolResult,
};
