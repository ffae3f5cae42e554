//! Router data types: actions, route requests, and background task records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::RouterError;
use crate::mcp_client::ContentBlock;

/// Default per-invocation deadline for background execution, in seconds.
pub const DEFAULT_INVOCATION_TIMEOUT_SECS: f64 = 60.0;

fn default_invocation_timeout() -> f64 {
    DEFAULT_INVOCATION_TIMEOUT_SECS
}

// ─── Action ──────────────────────────────────────────────────────────────────

/// The six things a `route` call can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    ListTools,
    GetDescription,
    GetToolSchema,
    ExecuteTool,
    SpawnToolInBackground,
    PollToolResult,
}

impl Action {
    pub const ALL: [Action; 6] = [
        Action::ListTools,
        Action::GetDescription,
        Action::GetToolSchema,
        Action::ExecuteTool,
        Action::SpawnToolInBackground,
        Action::PollToolResult,
    ];

    /// Wire name of the action.
    pub fn as_str(self) -> &'static str {
        match self {
            Action::ListTools => "list_tools",
            Action::GetDescription => "get_description",
            Action::GetToolSchema => "get_tool_schema",
            Action::ExecuteTool => "execute_tool",
            Action::SpawnToolInBackground => "spawn_tool_in_background",
            Action::PollToolResult => "poll_tool_result",
        }
    }
}

impl FromStr for Action {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| RouterError::UnsupportedAction {
                action: s.to_string(),
            })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── RouteRequest ────────────────────────────────────────────────────────────

/// Parameters of one call to the router's single tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRequest {
    pub server_name: String,
    /// Kept as text so an unknown value surfaces as `UnsupportedAction`
    /// rather than a deserialization failure.
    pub action: String,
    #[serde(default)]
    pub tool_name: Option<String>,
    /// JSON-encoded argument object. An inline object is accepted too.
    #[serde(default)]
    pub tool_arguments: Option<Value>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    /// Background deadline in seconds; only used by `spawn_tool_in_background`.
    #[serde(default = "default_invocation_timeout")]
    pub timeout: f64,
}

impl RouteRequest {
    pub fn new(server_name: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            action: action.into(),
            tool_name: None,
            tool_arguments: None,
            tool_call_id: None,
            timeout: DEFAULT_INVOCATION_TIMEOUT_SECS,
        }
    }

    pub fn with_tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    /// Set `tool_arguments` as JSON text, the way external callers send it.
    pub fn with_arguments(mut self, json_text: impl Into<String>) -> Self {
        self.tool_arguments = Some(Value::String(json_text.into()));
        self
    }

    pub fn with_task_id(mut self, tool_call_id: impl Into<String>) -> Self {
        self.tool_call_id = Some(tool_call_id.into());
        self
    }

    pub fn with_timeout(mut self, secs: f64) -> Self {
        self.timeout = secs;
        self
    }
}

// ─── Background tasks ────────────────────────────────────────────────────────

/// Opaque handle to a background invocation. Never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// A fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a background invocation. `Pending` is the only
/// non-terminal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Completed,
    Failed,
    Timeout,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        self != TaskStatus::Pending
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Timeout => "TIMEOUT",
        })
    }
}

/// How a background invocation ended. Converted into exactly one terminal
/// `TaskRecord` state.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed(Vec<ContentBlock>),
    Failed(String),
    TimedOut(String),
}

/// The table entry for one background invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRecord {
    pub status: TaskStatus,
    pub error_message: Option<String>,
    pub results: Option<Vec<ContentBlock>>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn pending() -> Self {
        Self {
            status: TaskStatus::Pending,
            error_message: None,
            results: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Move a pending record into the terminal state described by `outcome`.
    pub(crate) fn resolve(&mut self, outcome: TaskOutcome) {
        let (status, error_message, results) = match outcome {
            TaskOutcome::Completed(blocks) => (TaskStatus::Completed, None, Some(blocks)),
            TaskOutcome::Failed(message) => (TaskStatus::Failed, Some(message), None),
            TaskOutcome::TimedOut(message) => (TaskStatus::Timeout, Some(message), None),
        };
        self.status = status;
        self.error_message = error_message;
        self.results = results;
        self.finished_at = Some(Utc::now());
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
