//! Error types for MCP operations.

use std::time::Duration;

use thiserror::Error;

/// Result type for MCP operations.
pub type Result<T> = std::result::Result<T, McpError>;

/// Error type for MCP operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// The server process could not be launched.
    #[error("failed to spawn MCP server '{command}': {source}")]
    SpawnFailed {
        /// Command that was launched.
        command: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The `initialize` handshake did not complete in time.
    #[error("initialization timed out after {timeout:?}")]
    InitializationTimeout {
        /// Handshake ceiling that was exceeded.
        timeout: Duration,
    },

    /// The server answered the handshake with an error response.
    #[error("initialization rejected by server ({code}): {message}")]
    InitializationRejected {
        /// Error code from the server.
        code: i64,
        /// Error message from the server.
        message: String,
    },

    /// The handshake failed for any other reason (process died, bad payload).
    #[error("initialization failed: {reason}")]
    InitializationFailed {
        /// Description of the failure.
        reason: String,
    },

    /// Server not initialized.
    #[error("not initialized - call initialize() first")]
    NotInitialized,

    /// No response arrived within the request ceiling.
    #[error("RequestTimeout: {method} (no response after {timeout:?})")]
    RequestTimeout {
        /// Method of the request that timed out.
        method: String,
        /// Ceiling that was exceeded.
        timeout: Duration,
    },

    /// Server returned an error response.
    #[error("{method} failed with server error {code}: {message}")]
    RemoteError {
        /// Method of the failed request.
        method: String,
        /// Error code from the server.
        code: i64,
        /// Error message from the server.
        message: String,
        /// Optional additional data.
        data: Option<serde_json::Value>,
    },

    /// The server process went away while the call was in flight.
    #[error("ProcessExited: {reason}")]
    ProcessExited {
        /// Why the session ended ("process exited", "process error").
        reason: String,
    },

    /// The client was closed while the call was in flight.
    #[error("client closed")]
    ClientClosed,

    /// The in-flight request cap was reached.
    #[error("too many in-flight requests (limit {limit})")]
    TooManyRequests {
        /// Configured cap.
        limit: usize,
    },

    /// JSON-RPC protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Failed to communicate with the MCP server.
    #[error("transport error: {0}")]
    Transport(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl McpError {
    /// Create a spawn failed error.
    pub fn spawn_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::SpawnFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a remote error from an error response.
    pub fn remote(
        method: impl Into<String>,
        code: i64,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self::RemoteError {
            method: method.into(),
            code,
            message: message.into(),
            data,
        }
    }

    /// Create a process exited error.
    pub fn process_exited(reason: impl Into<String>) -> Self {
        Self::ProcessExited {
            reason: reason.into(),
        }
    }

    /// Whether this error ended the whole session rather than one call.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ProcessExited { .. } | Self::ClientClosed | Self::SpawnFailed { .. }
        )
    }
}
