//! MCP Client error types.

use thiserror::Error;

/// Errors that can occur while talking to a backend MCP server.
#[derive(Debug, Error)]
pub enum McpError {
    /// A server process failed to start.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed { name: String, reason: String },

    /// The initialization handshake failed.
    #[error("server '{name}' initialization failed: {reason}")]
    InitFailed { name: String, reason: String },

    /// JSON-RPC communication error (malformed message, I/O error, closed pipe).
    #[error("transport error for server '{server}': {reason}")]
    TransportError { server: String, reason: String },

    /// Server returned a JSON-RPC error response.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// The tool ran but reported failure (`isError: true`).
    #[error("tool '{tool}' failed: {message}")]
    ToolFailed { tool: String, message: String },
}

impl McpError {
    /// The most specific human-readable message for this error.
    ///
    /// Backend-reported failures yield the backend's own text, without the
    /// router's framing.
    pub fn message(&self) -> String {
        match self {
            McpError::ServerError { message, .. } | McpError::ToolFailed { message, .. } => {
                message.clone()
            }
            other => other.to_string(),
        }
    }
}
