//! Dispatcher — the router's single entry point.
//!
//! Turns one `RouteRequest` into one of six actions against a registered
//! backend. Validation happens up front, in this order: action, argument
//! parsing, backend lookup, then the parameters the action needs. A failed
//! check returns an error without touching any session or the task table.
//!
//! Capability queries always go to the live session; nothing is cached, so
//! a backend that changes its tool set is reflected on the next call.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use super::errors::RouterError;
use super::registry::SessionRegistry;
use super::tasks::{invoke_and_clean, PollOutcome, TaskManager};
use super::types::{Action, RouteRequest, TaskStatus};
use crate::mcp_client::types::text_block;
use crate::mcp_client::{CapabilityDefinition, ContentBlock, Session};

// ─── Caller guidance ─────────────────────────────────────────────────────────

const LIST_SCHEMA_HINT: &str = "Do not make assumptions about a tool's schema. Once you have found a tool you want to use, call the get_tool_schema action to get its schema; this avoids malformed requests.";

const LIST_DESCRIPTION_HINT: &str =
    "Only use the get_description action if you are unsure what a tool does based on its name.";

const SCHEMA_HINT: &str =
    "if you feel confused, use get_description action to get the tool description";

const SPAWN_HINT: &str =
    "Use poll_tool_result action with the tool_call_id to check the status and retrieve results.";

const PENDING_NOTICE: &str =
    "Status: PENDING. The tool execution is still in progress. Please check back later.";

/// YAML shape of a `get_tool_schema` answer.
#[derive(Serialize)]
struct SchemaView<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

// ─── Dispatcher ──────────────────────────────────────────────────────────────

/// Routes calls to backends and background tasks.
pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
    tasks: Arc<TaskManager>,
}

impl Dispatcher {
    pub fn new(registry: Arc<SessionRegistry>, tasks: Arc<TaskManager>) -> Self {
        Self { registry, tasks }
    }

    /// Execute one call and return its content blocks.
    pub async fn route(&self, request: RouteRequest) -> Result<Vec<ContentBlock>, RouterError> {
        let action: Action = request.action.parse()?;
        let arguments = parse_arguments(request.tool_arguments)?;
        let session = self.registry.get(&request.server_name)?;

        tracing::debug!(server = %request.server_name, %action, "dispatching call");

        match action {
            Action::ListTools => list_tools(session.as_ref()).await,
            Action::GetDescription => {
                let tool = required(action, "tool_name", request.tool_name.as_deref())?;
                describe(session.as_ref(), tool).await
            }
            Action::GetToolSchema => {
                let tool = required(action, "tool_name", request.tool_name.as_deref())?;
                schema(session.as_ref(), tool).await
            }
            Action::ExecuteTool => {
                let tool = required(action, "tool_name", request.tool_name.as_deref())?;
                invoke_and_clean(session.as_ref(), tool, arguments.unwrap_or_else(empty_object))
                    .await
                    .map_err(|e| RouterError::InvocationFailure {
                        tool: tool.to_string(),
                        message: e.message(),
                    })
            }
            Action::SpawnToolInBackground => {
                let tool = required(action, "tool_name", request.tool_name.as_deref())?;
                let timeout = invocation_timeout(request.timeout)?;
                let id = self.tasks.spawn(
                    session,
                    tool.to_string(),
                    arguments.unwrap_or_else(empty_object),
                    timeout,
                )?;
                tracing::info!(
                    tool_call_id = %id,
                    server = %request.server_name,
                    tool,
                    timeout_secs = request.timeout,
                    "spawned background tool call"
                );
                Ok(vec![
                    text_block(format!("tool_call_id: {id}")),
                    text_block(SPAWN_HINT),
                ])
            }
            Action::PollToolResult => {
                let id = required(action, "tool_call_id", request.tool_call_id.as_deref())?;
                self.poll(id)
            }
        }
    }

    fn poll(&self, id: &str) -> Result<Vec<ContentBlock>, RouterError> {
        let record = match self.tasks.poll(id)? {
            PollOutcome::Pending => return Ok(vec![text_block(PENDING_NOTICE)]),
            PollOutcome::Finished(record) => record,
        };

        tracing::debug!(tool_call_id = id, status = %record.status, "background result retrieved");

        if record.status == TaskStatus::Completed {
            return Ok(record.results.unwrap_or_default());
        }
        Ok(vec![text_block(format!(
            "Status: {}. Error Message: {}",
            record.status,
            record.error_message.unwrap_or_default()
        ))])
    }
}

// ─── Actions ─────────────────────────────────────────────────────────────────

async fn list_tools(session: &dyn Session) -> Result<Vec<ContentBlock>, RouterError> {
    let capabilities = query_capabilities(session).await?;
    let mut blocks: Vec<ContentBlock> = capabilities
        .iter()
        .map(|cap| text_block(format!("tool_name: {}", cap.name)))
        .collect();
    blocks.push(text_block(LIST_SCHEMA_HINT));
    blocks.push(text_block(LIST_DESCRIPTION_HINT));
    Ok(blocks)
}

async fn describe(session: &dyn Session, tool: &str) -> Result<Vec<ContentBlock>, RouterError> {
    let capability = find_capability(session, tool).await?;
    Ok(vec![text_block(capability.description.unwrap_or_default())])
}

async fn schema(session: &dyn Session, tool: &str) -> Result<Vec<ContentBlock>, RouterError> {
    let capability = find_capability(session, tool).await?;
    let view = SchemaView {
        name: tool,
        description: SCHEMA_HINT,
        input_schema: &capability.input_schema,
    };
    let text = serde_yaml::to_string(&view).map_err(|e| RouterError::InvocationFailure {
        tool: tool.to_string(),
        message: format!("schema cannot be rendered: {e}"),
    })?;
    Ok(vec![text_block(text)])
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

async fn query_capabilities(
    session: &dyn Session,
) -> Result<Vec<CapabilityDefinition>, RouterError> {
    session
        .list_capabilities()
        .await
        .map_err(|e| RouterError::InvocationFailure {
            tool: "tools/list".to_string(),
            message: e.message(),
        })
}

async fn find_capability(
    session: &dyn Session,
    tool: &str,
) -> Result<CapabilityDefinition, RouterError> {
    query_capabilities(session)
        .await?
        .into_iter()
        .find(|cap| cap.name == tool)
        .ok_or_else(|| RouterError::UnknownCapability {
            server: session.name().to_string(),
            tool: tool.to_string(),
        })
}

fn required<'a>(
    action: Action,
    parameter: &'static str,
    value: Option<&'a str>,
) -> Result<&'a str, RouterError> {
    value.ok_or(RouterError::MissingParameter {
        action: action.as_str(),
        parameter,
    })
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Decode `tool_arguments` into an argument object.
///
/// The wire form is JSON text; an inline object is taken as-is.
fn parse_arguments(raw: Option<Value>) -> Result<Option<Value>, RouterError> {
    let parsed = match raw {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(text)) => {
            serde_json::from_str::<Value>(&text).map_err(|e| RouterError::InvalidArguments {
                reason: format!("tool_arguments is not valid JSON: {e}"),
            })?
        }
        Some(other) => other,
    };

    if parsed.is_object() {
        Ok(Some(parsed))
    } else {
        Err(RouterError::InvalidArguments {
            reason: "tool_arguments must be a JSON object".into(),
        })
    }
}

fn invocation_timeout(secs: f64) -> Result<Duration, RouterError> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(RouterError::InvalidArguments {
            reason: format!("timeout must be a positive number of seconds, got {secs}"),
        });
    }
    Duration::try_from_secs_f64(secs).map_err(|e| RouterError::InvalidArguments {
        reason: format!("timeout {secs} is out of range: {e}"),
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
