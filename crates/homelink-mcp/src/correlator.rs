//! Request/response correlation.
//!
//! Every outgoing request gets an id from a per-session counter and a pending
//! entry holding the caller's completion channel and a timeout task. Removing
//! the entry from the map is the single point where a call is decided: the
//! path that removes it (response, timeout, drain) completes the caller, and
//! every other path finds nothing and does nothing.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::{McpError, Result};

/// Default ceiling for a single request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Why every pending call is being failed at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainReason {
    /// The server process exited.
    ProcessExited,
    /// A stream or wait error on the server process.
    ProcessError(String),
    /// The client was closed by its owner.
    ClientClosed,
}

impl DrainReason {
    fn to_error(&self) -> McpError {
        match self {
            Self::ProcessExited => McpError::process_exited("process exited"),
            Self::ProcessError(detail) => {
                McpError::process_exited(format!("process error: {detail}"))
            }
            Self::ClientClosed => McpError::ClientClosed,
        }
    }
}

struct PendingCall {
    method: String,
    timeout: Duration,
    tx: oneshot::Sender<Result<Value>>,
    timer: JoinHandle<()>,
}

struct Inner {
    next_id: u64,
    pending: HashMap<u64, PendingCall>,
}

/// Tracks in-flight requests for one client session.
pub struct Correlator {
    inner: Mutex<Inner>,
    timeout: Duration,
    max_in_flight: Option<usize>,
}

impl Correlator {
    /// Create a correlator whose ids start at 1.
    pub fn new(timeout: Duration, max_in_flight: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                pending: HashMap::new(),
            }),
            timeout,
            max_in_flight,
        })
    }

    /// Per-request ceiling.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Allocate an id and start tracking a call to `method`.
    ///
    /// Must be called before the request is written, so a fast response can
    /// never arrive ahead of its entry. Requires a Tokio runtime for the
    /// timeout task.
    pub fn register(self: &Arc<Self>, method: &str) -> Result<ResponseHandle> {
        self.register_with_timeout(method, self.timeout)
    }

    /// Like [`register`](Self::register), with a ceiling other than the default.
    pub fn register_with_timeout(
        self: &Arc<Self>,
        method: &str,
        timeout: Duration,
    ) -> Result<ResponseHandle> {
        let (tx, rx) = oneshot::channel();

        let mut inner = self.inner.lock();
        if let Some(limit) = self.max_in_flight
            && inner.pending.len() >= limit
        {
            tracing::warn!(
                method,
                pending = inner.pending.len(),
                limit,
                "too many in-flight requests, refusing call"
            );
            return Err(McpError::TooManyRequests { limit });
        }

        let id = inner.next_id;
        inner.next_id += 1;

        let timer = tokio::spawn(expire_after(Arc::downgrade(self), id, timeout));
        inner.pending.insert(
            id,
            PendingCall {
                method: method.to_string(),
                timeout,
                tx,
                timer,
            },
        );

        tracing::trace!(id, method, pending = inner.pending.len(), "registered request");

        Ok(ResponseHandle {
            id,
            method: method.to_string(),
            rx,
        })
    }

    /// Complete a call with its result. Returns `false` if the id is unknown.
    pub fn resolve(&self, id: u64, result: Value) -> bool {
        self.complete(id, Ok(result))
    }

    /// Fail a call. Returns `false` if the id is unknown.
    pub fn reject(&self, id: u64, error: McpError) -> bool {
        self.complete(id, Err(error))
    }

    /// Fail a call with an error built from its method name.
    pub fn reject_with(&self, id: u64, make: impl FnOnce(&str) -> McpError) -> bool {
        let Some(call) = self.take(id) else {
            tracing::debug!(id, "no pending request for response, ignoring");
            return false;
        };
        call.timer.abort();
        let error = make(&call.method);
        let _ = call.tx.send(Err(error));
        true
    }

    /// Fail every pending call. Returns how many were failed.
    pub fn drain_all(&self, reason: DrainReason) -> usize {
        let drained: Vec<(u64, PendingCall)> = self.inner.lock().pending.drain().collect();
        let count = drained.len();

        for (id, call) in drained {
            call.timer.abort();
            tracing::debug!(id, method = %call.method, reason = ?reason, "failing pending request");
            let _ = call.tx.send(Err(reason.to_error()));
        }

        if count > 0 {
            tracing::info!(count, reason = ?reason, "drained pending requests");
        }
        count
    }

    /// Stop tracking a call without completing it, e.g. when its request
    /// could not be written. Returns `false` if the id is unknown.
    pub fn forget(&self, id: u64) -> bool {
        match self.take(id) {
            Some(call) => {
                call.timer.abort();
                true
            }
            None => false,
        }
    }

    /// Number of calls still waiting.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Ids of calls still waiting, ascending.
    pub fn pending_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.inner.lock().pending.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn take(&self, id: u64) -> Option<PendingCall> {
        self.inner.lock().pending.remove(&id)
    }

    fn complete(&self, id: u64, outcome: Result<Value>) -> bool {
        let Some(call) = self.take(id) else {
            tracing::debug!(id, "no pending request for response, ignoring");
            return false;
        };
        call.timer.abort();
        // The caller may have stopped waiting; that is fine.
        let _ = call.tx.send(outcome);
        true
    }

    fn expire(&self, id: u64) {
        let Some(call) = self.take(id) else {
            return;
        };
        tracing::warn!(
            id,
            method = %call.method,
            timeout_ms = call.timeout.as_millis() as u64,
            "request timed out"
        );
        let _ = call.tx.send(Err(McpError::RequestTimeout {
            method: call.method,
            timeout: call.timeout,
        }));
    }
}

async fn expire_after(correlator: Weak<Correlator>, id: u64, timeout: Duration) {
    tokio::time::sleep(timeout).await;
    if let Some(correlator) = correlator.upgrade() {
        correlator.expire(id);
    }
}

impl Drop for Correlator {
    fn drop(&mut self) {
        for (_, call) in self.inner.get_mut().pending.drain() {
            call.timer.abort();
        }
    }
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("pending", &self.pending_ids())
            .field("timeout", &self.timeout)
            .field("max_in_flight", &self.max_in_flight)
            .finish()
    }
}

/// The caller's side of a pending call.
#[derive(Debug)]
pub struct ResponseHandle {
    id: u64,
    method: String,
    rx: oneshot::Receiver<Result<Value>>,
}

impl ResponseHandle {
    /// Correlation id of the call.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Method of the call.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Wait for the call to be resolved, rejected, timed out, or drained.
    pub async fn wait(self) -> Result<Value> {
        match self.rx.await {
            Ok(outcome) => outcome,
            // Sender dropped without completing: the correlator itself is gone.
            Err(_) => Err(McpError::ClientClosed),
        }
    }
}
