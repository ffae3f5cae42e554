//! Backend process lifecycle management.
//!
//! Handles spawning, the MCP initialization handshake, and shutting down
//! backend child processes. Each backend runs as a separate OS process
//! communicating via JSON-RPC over stdio; the running process is exposed to
//! the router as a `Session`.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::errors::McpError;
use super::session::{Session, SessionLauncher};
use super::transport::{extract_result, StdioTransport};
use super::types::{
    CallToolResult, CapabilityDefinition, ContentBlock, InitializeResult, ListToolsResult,
    ServerInfo, PROTOCOL_VERSION,
};
use crate::config::BackendDescriptor;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Client name announced in the initialize handshake.
const CLIENT_NAME: &str = "mcp-router";

/// Timeout for graceful shutdown before force-killing.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait for stderr to drain after a failed handshake.
const STDERR_SETTLE_TIMEOUT: Duration = Duration::from_millis(500);

/// Stderr lines retained for failure diagnostics.
const STDERR_TAIL_LINES: usize = 20;

/// Cap on the stderr excerpt attached to error messages.
const STDERR_TAIL_MAX_CHARS: usize = 2000;

// ─── Stderr capture ──────────────────────────────────────────────────────────

/// Rolling window of the most recent stderr lines of a backend.
#[derive(Clone, Default)]
struct StderrTail(Arc<StdMutex<VecDeque<String>>>);

impl StderrTail {
    fn push(&self, line: String) {
        let mut lines = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() == STDERR_TAIL_LINES {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    fn snapshot(&self) -> String {
        let lines = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        let joined = lines.iter().cloned().collect::<Vec<_>>().join("\n");
        if joined.chars().count() > STDERR_TAIL_MAX_CHARS {
            let mut truncated: String = joined.chars().take(STDERR_TAIL_MAX_CHARS).collect();
            truncated.push_str("...(truncated)");
            truncated
        } else {
            joined
        }
    }
}

/// Forward a backend's stderr into the log, keeping the tail for diagnostics.
///
/// Draining continuously keeps a chatty backend from blocking on a full pipe.
fn drain_stderr(server: String, stderr: ChildStderr, tail: StderrTail) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(server = %server, line = %line, "backend stderr");
            tail.push(line);
        }
    })
}

/// Format a stderr suffix for error messages (empty string if no stderr).
fn format_stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(" | stderr: {}", stderr.trim())
    }
}

// ─── ManagedServer ───────────────────────────────────────────────────────────

/// A running backend process with its transport.
pub struct ManagedServer {
    name: String,
    /// The child process handle. `None` once closed.
    process: Mutex<Option<Child>>,
    transport: StdioTransport,
    server_info: Option<ServerInfo>,
    stderr_task: Option<JoinHandle<()>>,
}

impl ManagedServer {
    /// Name and version the backend reported during the handshake, if any.
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    fn protocol_error(&self, what: &str, e: serde_json::Error) -> McpError {
        McpError::TransportError {
            server: self.name.clone(),
            reason: format!("malformed {what} response: {e}"),
        }
    }
}

impl Drop for ManagedServer {
    fn drop(&mut self) {
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}

#[async_trait]
impl Session for ManagedServer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_capabilities(&self) -> Result<Vec<CapabilityDefinition>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        // A backend that hands back a cursor it already gave us would
        // otherwise page forever.
        let mut seen = HashSet::new();

        loop {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let result = extract_result(self.transport.request("tools/list", params).await?)?;
            let page: ListToolsResult = serde_json::from_value(result)
                .map_err(|e| self.protocol_error("tools/list", e))?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if !next.is_empty() && seen.insert(next.clone()) => {
                    cursor = Some(next);
                }
                Some(next) if !next.is_empty() => {
                    tracing::warn!(server = %self.name, cursor = %next, "repeated tools/list cursor, stopping");
                    break;
                }
                _ => break,
            }
        }

        Ok(tools)
    }

    async fn invoke(
        &self,
        capability: &str,
        arguments: Value,
    ) -> Result<Vec<ContentBlock>, McpError> {
        let params = json!({
            "name": capability,
            "arguments": arguments,
        });
        let result = extract_result(self.transport.request("tools/call", Some(params)).await?)?;
        let call: CallToolResult = serde_json::from_value(result)
            .map_err(|e| self.protocol_error("tools/call", e))?;

        if call.is_error {
            return Err(McpError::ToolFailed {
                tool: capability.to_string(),
                message: call.joined_text(),
            });
        }
        Ok(call.content)
    }

    async fn close(&self) {
        // Closing stdin is the MCP stdio shutdown signal.
        self.transport.close().await;

        let child = self.process.lock().await.take();
        let Some(mut child) = child else {
            return;
        };

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(server = %self.name, %status, "backend exited");
            }
            _ => {
                tracing::warn!(server = %self.name, "backend did not exit in time, killing");
                let _ = child.kill().await;
            }
        }
    }
}

// ─── Spawning ────────────────────────────────────────────────────────────────

/// Spawn a backend process and perform the MCP initialization handshake.
///
/// No deadline is applied here; the caller bounds the whole attempt. If the
/// returned future is dropped mid-handshake the child is killed.
pub async fn spawn_server(descriptor: &BackendDescriptor) -> Result<ManagedServer, McpError> {
    let name = descriptor.name.as_str();
    let spec = &descriptor.startup;

    let mut cmd = Command::new(&spec.command);
    cmd.args(&spec.args);
    cmd.envs(&spec.env);
    if let Some(dir) = &spec.cwd {
        cmd.current_dir(dir);
    }

    cmd.stdin(std::process::Stdio::piped());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
        name: name.to_string(),
        reason: format!("{e}"),
    })?;

    let stdin = child.stdin.take().ok_or(McpError::SpawnFailed {
        name: name.to_string(),
        reason: "failed to capture stdin".into(),
    })?;

    let stdout = child.stdout.take().ok_or(McpError::SpawnFailed {
        name: name.to_string(),
        reason: "failed to capture stdout".into(),
    })?;

    let tail = StderrTail::default();
    let stderr_task = child
        .stderr
        .take()
        .map(|stderr| drain_stderr(name.to_string(), stderr, tail.clone()));

    let transport = StdioTransport::new(name, stdin, stdout);

    let init = match initialize(&transport, name).await {
        Ok(init) => init,
        Err(e) => {
            let _ = child.kill().await;
            if let Some(task) = stderr_task {
                let _ = tokio::time::timeout(STDERR_SETTLE_TIMEOUT, task).await;
            }
            let stderr_ctx = tail.snapshot();
            if !stderr_ctx.is_empty() {
                tracing::warn!(
                    server = name,
                    stderr = %stderr_ctx,
                    "backend stderr captured on failure"
                );
            }
            return Err(McpError::InitFailed {
                name: name.to_string(),
                reason: format!("{e}{}", format_stderr_suffix(&stderr_ctx)),
            });
        }
    };

    if let Some(info) = &init.server_info {
        tracing::debug!(
            server = name,
            backend_name = ?info.name,
            backend_version = ?info.version,
            protocol = ?init.protocol_version,
            "handshake complete"
        );
    }

    Ok(ManagedServer {
        name: name.to_string(),
        process: Mutex::new(Some(child)),
        transport,
        server_info: init.server_info,
        stderr_task,
    })
}

/// Perform the MCP initialization handshake.
async fn initialize(
    transport: &StdioTransport,
    server_name: &str,
) -> Result<InitializeResult, McpError> {
    let params = json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": CLIENT_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        },
    });
    let response = transport.request("initialize", Some(params)).await?;
    let result = extract_result(response)?;

    let init_result: InitializeResult =
        serde_json::from_value(result).map_err(|e| McpError::InitFailed {
            name: server_name.to_string(),
            reason: format!("failed to parse initialize response: {e}"),
        })?;

    transport.notify("notifications/initialized", None).await?;
    Ok(init_result)
}

// ─── Launcher ────────────────────────────────────────────────────────────────

/// Launches backends as child processes speaking MCP over stdio.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdioLauncher;

#[async_trait]
impl SessionLauncher for StdioLauncher {
    async fn launch(&self, descriptor: &BackendDescriptor) -> Result<Arc<dyn Session>, McpError> {
        let server = spawn_server(descriptor).await?;
        Ok(Arc::new(server))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
