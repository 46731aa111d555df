//! Newline-delimited JSON framing.
//!
//! Every message on the wire is one compact JSON object followed by `\n`.
//! [`FrameDecoder`] reassembles frames from arbitrarily chunked stdout reads;
//! [`encode_frame`] and [`FrameWriter`] produce them for the child's stdin.

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::error::{McpError, Result};

/// Incremental decoder for newline-delimited JSON frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to hold no newline.
    scanned: usize,
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every frame it completed, in stream order.
    ///
    /// Segments that are blank after trimming are skipped. Segments that are
    /// not valid JSON are logged and dropped; the newline already consumed
    /// them, so the following frames stay aligned.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        let mut search_from = self.scanned;
        while let Some(offset) = self.buffer[search_from..].iter().position(|&b| b == b'\n') {
            let end = search_from + offset;
            if let Some(value) = parse_segment(&self.buffer[start..end]) {
                frames.push(value);
            }
            start = end + 1;
            search_from = start;
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();

        frames
    }

    /// Number of bytes waiting for a terminating newline.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

fn parse_segment(segment: &[u8]) -> Option<Value> {
    let text = match std::str::from_utf8(segment) {
        Ok(text) => text.trim(),
        Err(e) => {
            tracing::warn!(error = %e, len = segment.len(), "dropping non-UTF-8 frame");
            return None;
        }
    };
    if text.is_empty() {
        return None;
    }

    match serde_json::from_str(text) {
        Ok(value) => {
            tracing::trace!(json = %text, "received MCP frame");
            Some(value)
        }
        Err(e) => {
            tracing::warn!(error = %e, frame = %truncate(text, 200), "dropping malformed frame");
            None
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Serialize a message as one frame: compact JSON plus a trailing newline.
pub fn encode_frame<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Writes whole frames to the child's input stream.
///
/// The writer is locked for the duration of one frame so concurrent callers
/// never interleave bytes.
pub struct FrameWriter {
    inner: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl FrameWriter {
    /// Wrap a writable stream.
    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            inner: Mutex::new(Box::new(writer)),
        }
    }

    /// Encode and write one message.
    pub async fn send<T: Serialize>(&self, message: &T) -> Result<()> {
        let frame = encode_frame(message)?;
        let mut writer = self.inner.lock().await;
        writer
            .write_all(&frame)
            .await
            .map_err(|e| McpError::transport(format!("failed to write to stdin: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| McpError::transport(format!("failed to flush stdin: {e}")))?;

        tracing::trace!(bytes = frame.len(), "sent MCP frame");
        Ok(())
    }

    /// Close the write half; the child sees EOF on stdin.
    pub async fn close(&self) {
        let mut writer = self.inner.lock().await;
        let _ = writer.shutdown().await;
    }
}

impl std::fmt::Debug for FrameWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameWriter").finish_non_exhaustive()
    }
}
