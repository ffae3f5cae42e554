//! Router error types.

use thiserror::Error;

/// Errors raised by the router's call surface and by backend startup.
///
/// Validation errors abort a single `route` call and never touch shared
/// state. Startup errors are logged and the backend is left out of the
/// registry. Background invocation failures are never raised; they are
/// recorded on the task and surfaced by polling.
#[derive(Debug, Error)]
pub enum RouterError {
    /// `action` is not one of the six recognized values.
    #[error("unsupported action: '{action}'")]
    UnsupportedAction { action: String },

    /// No started backend is registered under this name.
    #[error("unknown server: '{name}'")]
    UnknownBackend { name: String },

    /// The backend does not currently advertise this tool.
    #[error("unknown tool '{tool}' on server '{server}'")]
    UnknownCapability { server: String, tool: String },

    /// `tool_arguments` (or another parameter value) could not be used.
    #[error("invalid arguments: {reason}")]
    InvalidArguments { reason: String },

    /// A parameter the chosen action needs was not supplied.
    #[error("action '{action}' requires parameter '{parameter}'")]
    MissingParameter {
        action: &'static str,
        parameter: &'static str,
    },

    /// No background task with this id exists (never spawned, or already retrieved).
    #[error("unknown tool_call_id: '{id}'")]
    UnknownTaskId { id: String },

    /// A backend did not finish starting within its configured timeout.
    #[error("server '{name}' did not start within {timeout_secs}s")]
    BackendStartupTimeout { name: String, timeout_secs: f64 },

    /// A backend failed to start.
    #[error("server '{name}' failed to start: {reason}")]
    BackendStartupFailure { name: String, reason: String },

    /// A background invocation exceeded its deadline. Recorded as the
    /// TIMEOUT message of the task, never returned from `route`.
    #[error("Tool execution exceeded timeout of {timeout_secs} seconds.")]
    InvocationTimeout { tool: String, timeout_secs: f64 },

    /// The backend reported an error for an invocation.
    #[error("tool '{tool}' failed: {message}")]
    InvocationFailure { tool: String, message: String },

    /// The router has shut down and accepts no further calls.
    #[error("router is shut down")]
    ShuttingDown,
}

impl RouterError {
    /// Whether this error came from checking the caller's input.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            RouterError::UnsupportedAction { .. }
                | RouterError::UnknownBackend { .. }
                | RouterError::UnknownCapability { .. }
                | RouterError::InvalidArguments { .. }
                | RouterError::MissingParameter { .. }
                | RouterError::UnknownTaskId { .. }
        )
    }
}
