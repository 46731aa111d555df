//! Server process supervision.
//!
//! The child runs with all three stdio streams piped. Three background tasks
//! watch it:
//!
//! - the stdout pump forwards raw chunks as [`ProcessEvent::Stdout`],
//! - the stderr pump logs each diagnostic line,
//! - the monitor owns the [`Child`], reports its exit and performs forced kills.
//!
//! Events are pushed into a channel; the client decides what they mean.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Notify, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::client::McpServerConfig;
use crate::error::{McpError, Result};

/// Environment variable selecting the child's transport mode.
pub const TRANSPORT_ENV: &str = "MCP_TRANSPORT";

/// Environment variable carrying the child's log verbosity.
pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";

/// Time between the graceful and the forced termination signal.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// How long to wait for the exit after the forced signal.
const FORCED_EXIT_WAIT: Duration = Duration::from_secs(2);

/// How long the exit report waits for stdout to drain, so frames written
/// just before exiting are delivered first.
const STDOUT_DRAIN_WAIT: Duration = Duration::from_millis(250);

const STDOUT_CHUNK: usize = 8 * 1024;

/// How the child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExitInfo {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal, if any (unix only).
    pub signal: Option<i32>,
}

impl From<ExitStatus> for ExitInfo {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl std::fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => f.write_str("unknown status"),
        }
    }
}

/// Something observed on the child process.
#[derive(Debug)]
pub enum ProcessEvent {
    /// Raw bytes read from stdout.
    Stdout(Vec<u8>),
    /// Stdout reached EOF.
    StdoutClosed,
    /// Reading stdout or waiting on the process failed.
    StreamError(String),
    /// The process is gone.
    Exited(ExitInfo),
}

/// Handle to a spawned server process.
pub struct ProcessSupervisor {
    name: String,
    pid: Option<u32>,
    exit_rx: watch::Receiver<Option<ExitInfo>>,
    kill: Arc<Notify>,
    pumps: Vec<JoinHandle<()>>,
}

impl ProcessSupervisor {
    /// Launch the server described by `config`.
    ///
    /// The parent environment is inherited; only the transport mode and log
    /// level are overridden. Returns the supervisor and the child's stdin.
    pub fn spawn(
        config: &McpServerConfig,
        events: mpsc::UnboundedSender<ProcessEvent>,
    ) -> Result<(Self, ChildStdin)> {
        tracing::debug!(
            server = %config.name,
            command = %config.command,
            args = ?config.args,
            "spawning MCP server"
        );

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .env(TRANSPORT_ENV, &config.transport_mode)
            .env(LOG_LEVEL_ENV, &config.log_level)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| McpError::spawn_failed(&config.command, e))?;

        let stdin = take_stream(child.stdin.take(), &config.command, "stdin")?;
        let stdout = take_stream(child.stdout.take(), &config.command, "stdout")?;
        let stderr = take_stream(child.stderr.take(), &config.command, "stderr")?;

        let pid = child.id();
        let (exit_tx, exit_rx) = watch::channel(None);
        let kill = Arc::new(Notify::new());
        let (stdout_done_tx, stdout_done_rx) = oneshot::channel();

        let pumps = vec![
            tokio::spawn(pump_stdout(stdout, events.clone(), stdout_done_tx)),
            tokio::spawn(pump_stderr(stderr, config.name.clone())),
        ];
        tokio::spawn(monitor(
            child,
            config.name.clone(),
            kill.clone(),
            exit_tx,
            stdout_done_rx,
            events,
        ));

        tracing::info!(server = %config.name, pid = ?pid, "MCP server spawned");

        Ok((
            Self {
                name: config.name.clone(),
                pid,
                exit_rx,
                kill,
                pumps,
            },
            stdin,
        ))
    }

    /// OS process id, if known.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the process has been reaped.
    pub fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    /// Exit status, once the process has been reaped.
    pub fn exit_info(&self) -> Option<ExitInfo> {
        *self.exit_rx.borrow()
    }

    /// Send the graceful termination signal. No-op once the process is gone.
    pub fn terminate(&self) {
        if self.has_exited() {
            return;
        }

        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;

            let Some(pid) = self.pid else {
                return;
            };
            match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                Ok(()) => tracing::debug!(server = %self.name, pid, "sent SIGTERM"),
                Err(Errno::ESRCH) => {}
                Err(e) => tracing::warn!(server = %self.name, pid, error = %e, "SIGTERM failed"),
            }
        }

        #[cfg(not(unix))]
        self.force_kill();
    }

    /// Send the forced termination signal. No-op once the process is gone.
    pub fn force_kill(&self) {
        if !self.has_exited() {
            self.kill.notify_one();
        }
    }

    /// Wait until the process has been reaped.
    pub async fn wait(&self) -> Option<ExitInfo> {
        let mut exit_rx = self.exit_rx.clone();
        let status = exit_rx.wait_for(Option::is_some).await.ok()?;
        *status
    }

    /// Stop the process: graceful signal first, forced signal after `grace`.
    ///
    /// The grace timer and the exit wait race each other; whichever finishes
    /// first cancels the other, so a clean exit never sees a forced signal.
    pub async fn shutdown(&self, grace: Duration) -> Option<ExitInfo> {
        if let Some(info) = self.exit_info() {
            return Some(info);
        }

        self.terminate();

        let exited = self.wait();
        tokio::pin!(exited);

        tokio::select! {
            info = &mut exited => {
                tracing::debug!(server = %self.name, exit = ?info, "MCP server stopped");
                return info;
            }
            _ = tokio::time::sleep(grace) => {
                tracing::warn!(
                    server = %self.name,
                    grace_ms = grace.as_millis() as u64,
                    "MCP server ignored termination, killing"
                );
                self.force_kill();
            }
        }

        match tokio::time::timeout(FORCED_EXIT_WAIT, exited).await {
            Ok(info) => info,
            Err(_) => {
                tracing::error!(server = %self.name, "MCP server did not exit after kill");
                None
            }
        }
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        self.force_kill();
        for pump in &self.pumps {
            pump.abort();
        }
    }
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("name", &self.name)
            .field("pid", &self.pid)
            .field("exit", &self.exit_info())
            .finish()
    }
}

fn take_stream<T>(stream: Option<T>, command: &str, which: &str) -> Result<T> {
    stream.ok_or_else(|| {
        McpError::spawn_failed(
            command,
            std::io::Error::other(format!("failed to capture {which}")),
        )
    })
}

/// Forwards stdout chunks; `_done` is dropped on return, which tells the
/// monitor that stdout is drained.
async fn pump_stdout(
    mut stdout: ChildStdout,
    events: mpsc::UnboundedSender<ProcessEvent>,
    _done: oneshot::Sender<()>,
) {
    let mut buf = vec![0u8; STDOUT_CHUNK];
    loop {
        let event = match stdout.read(&mut buf).await {
            Ok(0) => {
                let _ = events.send(ProcessEvent::StdoutClosed);
                return;
            }
            Ok(n) => ProcessEvent::Stdout(buf[..n].to_vec()),
            Err(e) => {
                let _ = events.send(ProcessEvent::StreamError(format!("stdout: {e}")));
                return;
            }
        };
        if events.send(event).is_err() {
            return;
        }
    }
}

async fn pump_stderr(stderr: ChildStderr, server: String) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if !line.is_empty() {
                    tracing::debug!(server = %server, line = %line, "MCP server stderr");
                }
            }
            Ok(None) => return,
            Err(e) => {
                tracing::debug!(server = %server, error = %e, "stopped reading MCP server stderr");
                return;
            }
        }
    }
}

async fn monitor(
    mut child: Child,
    server: String,
    kill: Arc<Notify>,
    exit_tx: watch::Sender<Option<ExitInfo>>,
    stdout_done: oneshot::Receiver<()>,
    events: mpsc::UnboundedSender<ProcessEvent>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill.notified() => {
            if let Err(e) = child.start_kill() {
                tracing::debug!(server = %server, error = %e, "kill failed");
            }
            child.wait().await
        }
    };

    let event = match status {
        Ok(status) => {
            let info = ExitInfo::from(status);
            tracing::info!(server = %server, exit = %info, "MCP server exited");
            let _ = exit_tx.send(Some(info));
            ProcessEvent::Exited(info)
        }
        Err(e) => {
            tracing::error!(server = %server, error = %e, "failed to wait on MCP server");
            let _ = exit_tx.send(Some(ExitInfo::default()));
            ProcessEvent::StreamError(format!("wait: {e}"))
        }
    };

    // A grandchild may hold stdout open, so the wait is bounded.
    let _ = tokio::time::timeout(STDOUT_DRAIN_WAIT, stdout_done).await;
    let _ = events.send(event);
}
