//! JSON-RPC over stdio transport.
//!
//! Handles low-level communication with MCP server child processes:
//! - Writing JSON-RPC requests to stdin (one JSON object per line)
//! - A reader task that routes responses from stdout to the waiting caller by `id`
//! - Answering requests the server sends us (`ping` → `{}`, anything else → -32601)
//!
//! Several requests may be in flight on one transport at once; each caller
//! waits on its own slot, so a response can never be consumed by the wrong
//! request.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use super::errors::McpError;
use super::types::{error_codes, JsonRpcRequest, JsonRpcResponse};

// ─── Request ID Generator ────────────────────────────────────────────────────

/// Global monotonic request ID counter.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a unique request ID.
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

// ─── Pending Requests ────────────────────────────────────────────────────────

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type SharedWriter = Arc<Mutex<Option<BoxedWriter>>>;
type ResponseSlot = oneshot::Sender<Result<JsonRpcResponse, McpError>>;
type PendingMap = Arc<StdMutex<HashMap<u64, ResponseSlot>>>;

fn lock_pending(pending: &PendingMap) -> MutexGuard<'_, HashMap<u64, ResponseSlot>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes a request's slot when the waiting future finishes or is dropped
/// (e.g. cancelled by a deadline), so abandoned ids do not accumulate.
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock_pending(self.pending).remove(&self.id);
    }
}

/// What a line read from the server turned out to be.
enum Incoming {
    Response(JsonRpcResponse),
    /// A server-initiated request; it expects an answer with the same `id`.
    Request { id: Value, method: String },
    /// A notification (carries `method`, no `id`).
    Notification(String),
    /// Anything else: log output, blank noise, malformed JSON.
    Noise,
}

fn parse_incoming(line: &str) -> Incoming {
    let Ok(value) = serde_json::from_str::<Value>(line) else {
        return Incoming::Noise;
    };
    if let Some(method) = value.get("method").and_then(Value::as_str) {
        return match value.get("id") {
            Some(id) if !id.is_null() => Incoming::Request {
                id: id.clone(),
                method: method.to_string(),
            },
            _ => Incoming::Notification(method.to_string()),
        };
    }
    match serde_json::from_value::<JsonRpcResponse>(value) {
        Ok(resp) => Incoming::Response(resp),
        Err(_) => Incoming::Noise,
    }
}

// ─── Transport ───────────────────────────────────────────────────────────────

/// Bi-directional JSON-RPC transport over a child process's stdio.
pub struct StdioTransport {
    server_name: String,
    /// `None` once the transport has been closed. Shared with the reader
    /// task, which answers server-initiated requests.
    writer: SharedWriter,
    pending: PendingMap,
    /// Set by the reader task when stdout reaches EOF or fails.
    closed: Arc<AtomicBool>,
    reader_task: JoinHandle<()>,
}

impl StdioTransport {
    /// Create a new transport over a writer (child stdin) and reader (child stdout).
    ///
    /// Must be called from within a tokio runtime: it spawns the reader task.
    pub fn new<W, R>(server_name: &str, writer: W, reader: R) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        let pending: PendingMap = Arc::default();
        let closed = Arc::new(AtomicBool::new(false));
        let boxed: BoxedWriter = Box::new(writer);
        let writer: SharedWriter = Arc::new(Mutex::new(Some(boxed)));
        let reader_task = tokio::spawn(read_loop(
            server_name.to_string(),
            BufReader::new(reader),
            Arc::clone(&pending),
            Arc::clone(&closed),
            Arc::clone(&writer),
        ));

        Self {
            server_name: server_name.to_string(),
            writer,
            pending,
            closed,
            reader_task,
        }
    }

    /// Send a JSON-RPC request and wait for the response with the same `id`.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = next_request_id();
        let req = JsonRpcRequest::new(id, method, params);

        let mut json = serde_json::to_string(&req)
            .map_err(|e| self.error(format!("failed to serialize request: {e}")))?;
        json.push('\n');

        let (tx, rx) = oneshot::channel();
        lock_pending(&self.pending).insert(id, tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        // Checked after registering: if the reader stops later it will drain
        // our slot, if it stopped earlier we bail out here.
        if self.closed.load(Ordering::SeqCst) {
            return Err(self.error("server stdout closed (process may have exited)"));
        }

        self.write_line(&json).await?;

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(self.error("transport reader stopped before responding")),
        }
    }

    /// Send a JSON-RPC notification (no response expected).
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let mut notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
        });
        if let Some(params) = params {
            notification["params"] = params;
        }

        let mut json = serde_json::to_string(&notification)
            .map_err(|e| self.error(format!("failed to serialize notification: {e}")))?;
        json.push('\n');

        self.write_line(&json).await
    }

    /// Close the write side (the child sees EOF on stdin).
    ///
    /// Requests already in flight still receive their responses if the
    /// server produces them; new requests fail.
    pub async fn close(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }

    /// Whether the read side has stopped.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn write_line(&self, line: &str) -> Result<(), McpError> {
        write_shared(&self.writer, line)
            .await
            .map_err(|reason| self.error(reason))
    }

    fn error(&self, reason: impl Into<String>) -> McpError {
        McpError::TransportError {
            server: self.server_name.clone(),
            reason: reason.into(),
        }
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        lock_pending(&self.pending).len()
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

/// Write one line to the shared writer, flushing it.
async fn write_shared(writer: &SharedWriter, line: &str) -> Result<(), String> {
    let mut guard = writer.lock().await;
    let writer = guard.as_mut().ok_or("transport is closed")?;

    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|e| format!("failed to write to stdin: {e}"))?;
    writer
        .flush()
        .await
        .map_err(|e| format!("failed to flush stdin: {e}"))?;
    Ok(())
}

/// The answer to a request the server sent us. Only `ping` is supported.
fn reply_to_server_request(id: Value, method: &str) -> Value {
    if method == "ping" {
        return serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": {} });
    }
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": error_codes::METHOD_NOT_FOUND,
            "message": format!("Method not found: {method}"),
        },
    })
}

/// Read lines until EOF, delivering each response to its waiting request.
///
/// On exit every still-waiting request is failed with the reason the read
/// side stopped.
async fn read_loop<R>(
    server: String,
    mut reader: BufReader<R>,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
    writer: SharedWriter,
) where
    R: AsyncRead + Unpin,
{
    let mut line_buf = String::new();

    let reason = loop {
        line_buf.clear();
        match reader.read_line(&mut line_buf).await {
            Ok(0) => break "server stdout closed (process may have exited)".to_string(),
            Ok(_) => {}
            Err(e) => break format!("failed to read from stdout: {e}"),
        }

        let trimmed = line_buf.trim();
        if trimmed.is_empty() {
            continue;
        }

        match parse_incoming(trimmed) {
            Incoming::Response(resp) => {
                let slot = lock_pending(&pending).remove(&resp.id);
                match slot {
                    Some(tx) => {
                        let _ = tx.send(Ok(resp));
                    }
                    None => tracing::debug!(
                        server = %server,
                        id = resp.id,
                        "dropping response with no waiting request"
                    ),
                }
            }
            Incoming::Request { id, method } => {
                tracing::debug!(server = %server, method = %method, "answering server-initiated request");
                let reply = reply_to_server_request(id, &method);
                let writer = Arc::clone(&writer);
                let server = server.clone();
                // Replies go out on their own task so a busy writer never
                // stalls response routing.
                tokio::spawn(async move {
                    let line = format!("{reply}\n");
                    if let Err(reason) = write_shared(&writer, &line).await {
                        tracing::debug!(server = %server, reason = %reason, "could not answer server request");
                    }
                });
            }
            Incoming::Notification(method) => {
                tracing::debug!(server = %server, method = %method, "ignoring server notification");
            }
            Incoming::Noise => {
                tracing::trace!(server = %server, line = %trimmed, "skipping non-JSON-RPC output");
            }
        }
    };

    closed.store(true, Ordering::SeqCst);
    tracing::debug!(server = %server, reason = %reason, "transport reader stopped");

    let waiters: Vec<ResponseSlot> = lock_pending(&pending).drain().map(|(_, tx)| tx).collect();
    for tx in waiters {
        let _ = tx.send(Err(McpError::TransportError {
            server: server.clone(),
            reason: reason.clone(),
        }));
    }
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Extract the result from a JSON-RPC response, converting errors to `McpError`.
pub fn extract_result(response: JsonRpcResponse) -> Result<Value, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    response.result.ok_or(McpError::ServerError {
        code: error_codes::INTERNAL_ERROR,
        message: "response missing both result and error".into(),
        data: None,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
