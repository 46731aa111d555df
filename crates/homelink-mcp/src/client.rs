//! MCP client for communicating with a stdio MCP server.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::codec::{FrameDecoder, FrameWriter};
use crate::correlator::{Correlator, DEFAULT_REQUEST_TIMEOUT, DrainReason};
use crate::error::{McpError, Result};
use crate::process::{DEFAULT_SHUTDOWN_GRACE, ProcessEvent, ProcessSupervisor};
use crate::protocol::{
    CallToolParams, IncomingMessage, InitializeParams, InitializeResult, JsonRpcError,
    JsonRpcNotification, JsonRpcRequest, ListToolsResult, METHOD_CALL_TOOL, METHOD_INITIALIZE,
    METHOD_INITIALIZED, METHOD_LIST_TOOLS, ToolDefinition, ToolResult,
};

/// Default ceiling for the `initialize` handshake.
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport mode passed to the child by default.
pub const DEFAULT_TRANSPORT_MODE: &str = "stdio";

/// Log level passed to the child by default.
pub const DEFAULT_CHILD_LOG_LEVEL: &str = "error";

/// Bound on closing stdin during teardown; a writer stuck on a full pipe
/// must not delay the termination signal.
const STDIN_CLOSE_WAIT: Duration = Duration::from_millis(100);

/// Configuration for an MCP server connection.
#[derive(Debug, Clone)]
pub struct McpServerConfig {
    /// Unique name for this server.
    pub name: String,
    /// Command to spawn.
    pub command: String,
    /// Arguments to pass to the command.
    pub args: Vec<String>,
    /// Value of `MCP_TRANSPORT` in the child's environment.
    pub transport_mode: String,
    /// Value of `LOG_LEVEL` in the child's environment.
    pub log_level: String,
    /// Ceiling for each request.
    pub request_timeout: Duration,
    /// Ceiling for the handshake.
    pub init_timeout: Duration,
    /// Grace period between graceful and forced termination.
    pub shutdown_grace: Duration,
    /// Optional cap on concurrently outstanding requests.
    pub max_in_flight: Option<usize>,
}

impl McpServerConfig {
    /// Create a new server config.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            transport_mode: DEFAULT_TRANSPORT_MODE.to_string(),
            log_level: DEFAULT_CHILD_LOG_LEVEL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            init_timeout: DEFAULT_INIT_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            max_in_flight: None,
        }
    }

    /// Add arguments.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Add an argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set the transport mode handed to the child.
    pub fn with_transport_mode(mut self, mode: impl Into<String>) -> Self {
        self.transport_mode = mode.into();
        self
    }

    /// Set the log level handed to the child.
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Set the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the handshake timeout.
    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    /// Set the shutdown grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Cap the number of outstanding requests.
    pub fn with_max_in_flight(mut self, limit: usize) -> Self {
        self.max_in_flight = Some(limit);
        self
    }
}

/// Lifecycle of a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No process, never initialized or rolled back after a failed handshake.
    Uninitialized,
    /// Process spawned, handshake in flight.
    Initializing,
    /// Handshake done; tool calls accepted.
    Ready,
    /// The process exited or errored; re-initialize to continue.
    Faulted,
    /// Closed by the owner.
    Closed,
}

impl SessionState {
    /// Lowercase name, for logs and output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Faulted => "faulted",
            Self::Closed => "closed",
        }
    }

    fn is_live(&self) -> bool {
        matches!(self, Self::Initializing | Self::Ready)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State plus the generation of the session it belongs to, so events from a
/// replaced session can be told apart.
#[derive(Debug)]
struct StateCell {
    generation: u64,
    state: SessionState,
}

/// One spawned process and everything wired to it.
struct Session {
    correlator: Arc<Correlator>,
    writer: Arc<FrameWriter>,
    supervisor: ProcessSupervisor,
    dispatcher: JoinHandle<()>,
}

/// An MCP client connected to a single MCP server.
///
/// All operations take `&self`; share the client behind an [`Arc`] to issue
/// concurrent calls.
pub struct McpClient {
    /// Server configuration.
    config: McpServerConfig,
    /// Session state, shared with the event dispatcher.
    state: Arc<Mutex<StateCell>>,
    /// The live session, if any.
    session: Mutex<Option<Arc<Session>>>,
    /// Handshake result of the live session.
    server_info: Mutex<Option<InitializeResult>>,
    /// Serializes `initialize` calls.
    init_lock: tokio::sync::Mutex<()>,
}

impl McpClient {
    /// Create a client. Nothing is spawned until [`initialize`](Self::initialize).
    pub fn new(config: McpServerConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(StateCell {
                generation: 0,
                state: SessionState::Uninitialized,
            })),
            session: Mutex::new(None),
            server_info: Mutex::new(None),
            init_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Get the server name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Get the server configuration.
    pub fn config(&self) -> &McpServerConfig {
        &self.config
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.state.lock().state
    }

    /// Whether tool calls are currently accepted.
    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// Handshake result of the current session.
    pub fn server_info(&self) -> Option<InitializeResult> {
        self.server_info.lock().clone()
    }

    /// Number of requests waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.session
            .lock()
            .as_ref()
            .map_or(0, |s| s.correlator.pending_count())
    }

    /// Process id of the server, while one is running.
    pub fn pid(&self) -> Option<u32> {
        self.session
            .lock()
            .as_ref()
            .filter(|s| !s.supervisor.has_exited())
            .and_then(|s| s.supervisor.pid())
    }

    /// Spawn the server and perform the MCP handshake.
    ///
    /// Legal from any state but `Ready`, where it returns the existing
    /// handshake result. A leftover faulted session is torn down first. On
    /// failure the partial session is closed and the client rolls back to
    /// `Uninitialized`.
    pub async fn initialize(&self) -> Result<InitializeResult> {
        let _guard = self.init_lock.lock().await;

        if self.state() == SessionState::Ready
            && let Some(info) = self.server_info()
        {
            return Ok(info);
        }

        self.teardown(DrainReason::ClientClosed).await;

        let generation = {
            let mut cell = self.state.lock();
            cell.generation += 1;
            cell.state = SessionState::Initializing;
            cell.generation
        };

        match self.start_session(generation).await {
            Ok(info) => {
                let promoted = {
                    let mut cell = self.state.lock();
                    if cell.generation == generation && cell.state == SessionState::Initializing {
                        cell.state = SessionState::Ready;
                        true
                    } else {
                        false
                    }
                };
                if !promoted {
                    self.rollback(generation).await;
                    return Err(McpError::InitializationFailed {
                        reason: "session ended during initialization".to_string(),
                    });
                }

                tracing::info!(
                    server = %self.config.name,
                    remote = %info.server_info.name,
                    version = %info.server_info.version,
                    protocol = %info.protocol_version,
                    "MCP server initialized"
                );
                *self.server_info.lock() = Some(info.clone());
                Ok(info)
            }
            Err(e) => {
                tracing::warn!(server = %self.config.name, error = %e, "MCP initialization failed");
                self.rollback(generation).await;
                Err(e)
            }
        }
    }

    /// List available tools from the server.
    pub async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen = HashSet::new();

        loop {
            let params = match &cursor {
                Some(cursor) => json!({ "cursor": cursor }),
                None => json!({}),
            };
            let result = self.request(METHOD_LIST_TOOLS, Some(params)).await?;
            let page: ListToolsResult = serde_json::from_value(result)?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if !next.is_empty() => {
                    if !seen.insert(next.clone()) {
                        tracing::warn!(
                            server = %self.config.name,
                            cursor = %next,
                            "tools/list cursor repeated, stopping pagination"
                        );
                        break;
                    }
                    cursor = Some(next);
                }
                _ => break,
            }
        }

        tracing::debug!(
            server = %self.config.name,
            tool_count = tools.len(),
            "listed MCP tools"
        );

        Ok(tools)
    }

    /// Call a tool on the server.
    ///
    /// # Arguments
    /// * `name` - The name of the tool to call
    /// * `arguments` - The arguments to pass to the tool
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };

        let result = self
            .request(METHOD_CALL_TOOL, Some(serde_json::to_value(&params)?))
            .await?;
        let call_result: ToolResult = serde_json::from_value(result)?;

        if call_result.is_error() {
            tracing::warn!(
                server = %self.config.name,
                tool = %name,
                "tool call returned error"
            );
        } else {
            tracing::debug!(
                server = %self.config.name,
                tool = %name,
                "tool call succeeded"
            );
        }

        Ok(call_result)
    }

    /// Close the client: fail every pending call and stop the server.
    ///
    /// Always legal and idempotent.
    pub async fn close(&self) -> Result<()> {
        let previous = {
            let mut cell = self.state.lock();
            std::mem::replace(&mut cell.state, SessionState::Closed)
        };
        self.teardown(DrainReason::ClientClosed).await;
        *self.server_info.lock() = None;

        if previous != SessionState::Closed {
            tracing::info!(server = %self.config.name, from = %previous, "MCP client closed");
        }
        Ok(())
    }

    /// Send a request on the ready session and wait for its result.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let session = self.ready_session()?;
        self.send_request(&session, method, params, None).await
    }

    fn ready_session(&self) -> Result<Arc<Session>> {
        if self.state() != SessionState::Ready {
            return Err(McpError::NotInitialized);
        }
        self.session.lock().clone().ok_or(McpError::NotInitialized)
    }

    async fn send_request(
        &self,
        session: &Session,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let handle = match timeout {
            Some(timeout) => session.correlator.register_with_timeout(method, timeout)?,
            None => session.correlator.register(method)?,
        };
        let request = JsonRpcRequest::new(handle.id(), method, params);

        tracing::debug!(
            server = %self.config.name,
            id = handle.id(),
            method,
            "sending MCP request"
        );

        if let Err(e) = session.writer.send(&request).await {
            session.correlator.forget(handle.id());
            return Err(e);
        }

        handle.wait().await
    }

    async fn start_session(&self, generation: u64) -> Result<InitializeResult> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (supervisor, stdin) = ProcessSupervisor::spawn(&self.config, events_tx)?;

        let correlator = Correlator::new(self.config.request_timeout, self.config.max_in_flight);
        let writer = Arc::new(FrameWriter::new(stdin));
        let dispatcher = Dispatcher {
            server: self.config.name.clone(),
            generation,
            state: self.state.clone(),
            correlator: correlator.clone(),
            writer: writer.clone(),
            decoder: FrameDecoder::new(),
        };
        let session = Arc::new(Session {
            correlator,
            writer,
            supervisor,
            dispatcher: tokio::spawn(dispatcher.run(events_rx)),
        });
        *self.session.lock() = Some(session.clone());

        let params = serde_json::to_value(InitializeParams::default())?;
        let result = self
            .send_request(
                &session,
                METHOD_INITIALIZE,
                Some(params),
                Some(self.config.init_timeout),
            )
            .await
            .map_err(|e| self.handshake_error(e))?;

        let info: InitializeResult =
            serde_json::from_value(result).map_err(|e| McpError::InitializationFailed {
                reason: format!("invalid initialize result: {e}"),
            })?;

        session
            .writer
            .send(&JsonRpcNotification::new(METHOD_INITIALIZED, None))
            .await
            .map_err(|e| McpError::InitializationFailed {
                reason: e.to_string(),
            })?;

        Ok(info)
    }

    fn handshake_error(&self, error: McpError) -> McpError {
        match error {
            McpError::RequestTimeout { .. } => McpError::InitializationTimeout {
                timeout: self.config.init_timeout,
            },
            McpError::RemoteError { code, message, .. } => {
                McpError::InitializationRejected { code, message }
            }
            other => McpError::InitializationFailed {
                reason: other.to_string(),
            },
        }
    }

    /// Undo a failed `initialize`: close the partial session, then return to
    /// `Uninitialized` unless the owner closed the client meanwhile.
    async fn rollback(&self, generation: u64) {
        self.teardown(DrainReason::ClientClosed).await;
        *self.server_info.lock() = None;

        let mut cell = self.state.lock();
        if cell.generation == generation && cell.state != SessionState::Closed {
            cell.state = SessionState::Uninitialized;
        }
    }

    /// Fail pending calls and stop the process of the current session, if any.
    async fn teardown(&self, reason: DrainReason) {
        let Some(session) = self.session.lock().take() else {
            return;
        };

        session.correlator.drain_all(reason);
        if tokio::time::timeout(STDIN_CLOSE_WAIT, session.writer.close())
            .await
            .is_err()
        {
            tracing::debug!(server = %self.config.name, "stdin busy, skipping EOF");
        }
        let exit = session.supervisor.shutdown(self.config.shutdown_grace).await;
        session.dispatcher.abort();

        tracing::debug!(
            server = %self.config.name,
            exit = ?exit,
            "MCP session torn down"
        );
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.correlator.drain_all(DrainReason::ClientClosed);
            session.supervisor.force_kill();
            session.dispatcher.abort();
        }
    }
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("name", &self.config.name)
            .field("command", &self.config.command)
            .field("state", &self.state())
            .finish()
    }
}

/// Consumes process events for one session, in arrival order.
struct Dispatcher {
    server: String,
    generation: u64,
    state: Arc<Mutex<StateCell>>,
    correlator: Arc<Correlator>,
    writer: Arc<FrameWriter>,
    decoder: FrameDecoder,
}

impl Dispatcher {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<ProcessEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                ProcessEvent::Stdout(chunk) => {
                    for frame in self.decoder.feed(&chunk) {
                        self.dispatch(frame);
                    }
                }
                ProcessEvent::StdoutClosed => {
                    tracing::debug!(server = %self.server, "MCP server closed stdout");
                }
                ProcessEvent::StreamError(detail) => {
                    self.fault(DrainReason::ProcessError(detail));
                }
                ProcessEvent::Exited(info) => {
                    let partial = self.decoder.buffered_len();
                    if partial > 0 {
                        tracing::debug!(
                            server = %self.server,
                            bytes = partial,
                            "discarding incomplete frame"
                        );
                    }
                    tracing::debug!(server = %self.server, exit = %info, "MCP server process ended");
                    self.fault(DrainReason::ProcessExited);
                    return;
                }
            }
        }
    }

    fn dispatch(&self, frame: Value) {
        match IncomingMessage::classify(frame) {
            IncomingMessage::Response(response) => {
                let id = response.id;
                match response.into_outcome() {
                    Ok(Ok(result)) => {
                        self.correlator.resolve(id, result);
                    }
                    Ok(Err(error)) => {
                        self.correlator.reject_with(id, |method| {
                            McpError::remote(method, error.code, error.message, error.data)
                        });
                    }
                    Err(malformed) => {
                        tracing::warn!(server = %self.server, id, reason = %malformed, "malformed response");
                        self.correlator
                            .reject(id, McpError::protocol(malformed.to_string()));
                    }
                }
            }
            IncomingMessage::Request { id, method } => {
                tracing::debug!(server = %self.server, method = %method, "rejecting server request");
                let reply = json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": JsonRpcError::new(
                        JsonRpcError::METHOD_NOT_FOUND,
                        format!("method not supported by client: {method}"),
                    ),
                });
                let writer = self.writer.clone();
                let server = self.server.clone();
                tokio::spawn(async move {
                    if let Err(e) = writer.send(&reply).await {
                        tracing::debug!(server = %server, error = %e, "failed to answer server request");
                    }
                });
            }
            IncomingMessage::Notification(notification) => {
                tracing::debug!(
                    server = %self.server,
                    method = %notification.method,
                    "MCP server notification"
                );
            }
            IncomingMessage::Invalid { reason } => {
                tracing::warn!(server = %self.server, reason = %reason, "dropping unrecognized frame");
            }
        }
    }

    fn fault(&self, reason: DrainReason) {
        let faulted = {
            let mut cell = self.state.lock();
            if cell.generation == self.generation && cell.state.is_live() {
                cell.state = SessionState::Faulted;
                true
            } else {
                false
            }
        };
        if faulted {
            tracing::warn!(server = %self.server, reason = ?reason, "MCP session faulted");
        }
        self.correlator.drain_all(reason);
    }
}
