//! Text and schema the router advertises about itself.
//!
//! Both the server instructions and the tool description embed the startup
//! summary, so a caller knows which backends are reachable before its first
//! call.

use serde_json::{json, Value};

use super::types::{Action, DEFAULT_INVOCATION_TIMEOUT_SECS};

/// Name of the single tool the router exposes.
pub const ROUTER_TOOL_NAME: &str = "mcp_router";

/// Display title of the router tool.
pub const ROUTER_TOOL_TITLE: &str = "MCP Router Tool";

const SERVERS_PLACEHOLDER: &str = "{servers}";

const SERVER_INSTRUCTIONS: &str = "\
This server gives access to several MCP servers through one tool, `mcp_router`.

1. Discovery: call list_tools to see the tools a server offers.
2. Schema inspection: call get_tool_schema before executing any tool.
3. Execution: use execute_tool for quick operations, spawn_tool_in_background for long ones.
4. Monitoring: poll background calls with poll_tool_result and the returned tool_call_id.

Never execute a tool without first fetching its schema; guessing arguments leads to malformed requests.
Prefer spawn_tool_in_background for anything that may take more than ~30 seconds.

CURRENT LOADED MCP SERVERS:
{servers}
";

const TOOL_DESCRIPTION: &str = "\
Meta-tool for discovering and calling tools on the connected MCP servers.

Actions
-------
- list_tools: list the tools available on `server_name`
- get_description: description of `tool_name` (only when its name is ambiguous)
- get_tool_schema: full input schema of `tool_name`
- execute_tool: run `tool_name` with `tool_arguments` and wait for the result
- spawn_tool_in_background: start `tool_name` and return a `tool_call_id` immediately
- poll_tool_result: status of a background call; returns its result once finished

Parameters
----------
server_name: name of a loaded MCP server (required)
action: one of the actions above (required)
tool_name: required for get_description, get_tool_schema, execute_tool, spawn_tool_in_background
tool_arguments: JSON-encoded object of arguments for execute_tool and spawn_tool_in_background
tool_call_id: required for poll_tool_result
timeout: seconds before a background call is abandoned (default 60)

Workflow
--------
Synchronous: list_tools -> get_tool_schema -> execute_tool.
Background: list_tools -> get_tool_schema -> spawn_tool_in_background -> poll_tool_result until done.

A finished background result is returned exactly once; polling the same
tool_call_id afterwards reports it as unknown.

Current Loaded MCP Servers
--------------------------
{servers}
";

/// Server-level instructions with the startup summary embedded.
pub fn server_instructions(summary: &str) -> String {
    SERVER_INSTRUCTIONS.replace(SERVERS_PLACEHOLDER, summary)
}

/// Description of the `mcp_router` tool with the startup summary embedded.
pub fn tool_description(summary: &str) -> String {
    TOOL_DESCRIPTION.replace(SERVERS_PLACEHOLDER, summary)
}

/// JSON Schema of the `mcp_router` tool's arguments.
pub fn tool_input_schema() -> Value {
    let actions: Vec<&str> = Action::ALL.iter().map(|a| a.as_str()).collect();
    json!({
        "type": "object",
        "properties": {
            "server_name": {"type": "string"},
            "action": {"type": "string", "enum": actions},
            "tool_name": {"type": ["string", "null"], "default": null},
            "tool_arguments": {"type": ["string", "null"], "default": null},
            "tool_call_id": {"type": ["string", "null"], "default": null},
            "timeout": {"type": "number", "default": DEFAULT_INVOCATION_TIMEOUT_SECS},
        },
        "required": ["server_name", "action"],
    })
}

/// Full MCP tool definition of the router tool.
pub fn tool_definition(summary: &str) -> Value {
    json!({
        "name": ROUTER_TOOL_NAME,
        "title": ROUTER_TOOL_TITLE,
        "description": tool_description(summary),
        "inputSchema": tool_input_schema(),
    })
}
