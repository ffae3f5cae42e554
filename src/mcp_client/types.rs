//! Shared types for the MCP client.
//!
//! JSON-RPC 2.0 message types and MCP protocol structures.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// MCP protocol revision spoken to backends.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Content block fields that only matter to the transport and are stripped
/// before results reach the router's caller.
const INTERNAL_CONTENT_FIELDS: [&str; 3] = ["annotations", "meta", "_meta"];

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response message (success or error).
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: String,
    pub id: u64,
    pub result: Option<Value>,
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    pub data: Option<Value>,
}

// ─── MCP Protocol Types ──────────────────────────────────────────────────────

/// A capability (tool) as advertised by `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "inputSchema", alias = "input_schema")]
    pub input_schema: Value,
}

/// One page of a `tools/list` response.
#[derive(Debug, Clone, Deserialize)]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<CapabilityDefinition>,
    #[serde(default, rename = "nextCursor")]
    pub next_cursor: Option<String>,
}

/// A `tools/call` response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<Value>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

impl CallToolResult {
    /// Concatenate the text of every text block, newline separated.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// MCP initialize response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(default, rename = "protocolVersion")]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(default, rename = "serverInfo")]
    pub server_info: Option<ServerInfo>,
}

/// Server info returned in the initialize response.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: Option<String>,
    pub version: Option<String>,
}

// ─── Content Blocks ──────────────────────────────────────────────────────────

/// A content block as carried in tool results. Usually `{type, text}`, but
/// richer kinds (images, resources) from backends pass through unchanged.
pub type ContentBlock = Value;

/// Build a `{"type": "text", "text": ...}` block.
pub fn text_block(text: impl Into<String>) -> ContentBlock {
    serde_json::json!({ "type": "text", "text": text.into() })
}

/// Remove transport-internal metadata from a content block.
pub fn strip_internal_metadata(mut block: ContentBlock) -> ContentBlock {
    if let Some(obj) = block.as_object_mut() {
        for field in INTERNAL_CONTENT_FIELDS {
            obj.remove(field);
        }
    }
    block
}

// ─── Standard Error Codes ────────────────────────────────────────────────────

/// Well-known JSON-RPC error codes.
pub mod error_codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i32 = -32700;
    /// The JSON sent is not a valid Request object.
    pub const INVALID_REQUEST: i32 = -32600;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_rpc_request_serialization() {
        let req = JsonRpcRequest::new(1, "initialize", None);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"id\":1"));
        assert!(json.contains("\"method\":\"initialize\""));
        assert!(!json.contains("params"));
    }

    #[test]
    fn test_json_rpc_error_response() {
        let json = r#"{
            "jsonrpc": "2.0",
            "id": 2,
            "error": {"code": -32601, "message": "Method not found"}
        }"#;
        let resp: JsonRpcResponse = serde_json::from_str(json).unwrap();
        assert!(resp.result.is_none());
        let err = resp.error.unwrap();
        assert_eq!(err.code, error_codes::METHOD_NOT_FOUND);
    }

    #[test]
    fn test_capability_definition_from_wire() {
        let json = r#"{
            "name": "echo",
            "description": "Echo the input",
            "inputSchema": {"type": "object", "properties": {"x": {"type": "integer"}}}
        }"#;
        let def: CapabilityDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(def.name, "echo");
        assert_eq!(def.description.as_deref(), Some("Echo the input"));
        assert_eq!(def.input_schema["properties"]["x"]["type"], "integer");
    }

    #[test]
    fn test_capability_definition_without_description() {
        let def: CapabilityDefinition = serde_json::from_str(r#"{"name": "ping"}"#).unwrap();
        assert!(def.description.is_none());
        assert!(def.input_schema.is_null());
    }

    #[test]
    fn test_list_tools_result_pagination_cursor() {
        let page: ListToolsResult =
            serde_json::from_str(r#"{"tools": [{"name": "a"}], "nextCursor": "p2"}"#).unwrap();
        assert_eq!(page.tools.len(), 1);
        assert_eq!(page.next_cursor.as_deref(), Some("p2"));
    }

    #[test]
    fn test_call_tool_result_joined_text() {
        let result: CallToolResult = serde_json::from_str(
            r#"{"content": [
                {"type": "text", "text": "line one"},
                {"type": "image", "data": "AAAA", "mimeType": "image/png"},
                {"type": "text", "text": "line two"}
            ], "isError": true}"#,
        )
        .unwrap();
        assert!(result.is_error);
        assert_eq!(result.joined_text(), "line one\nline two");
    }

    #[test]
    fn test_strip_internal_metadata() {
        let block = serde_json::json!({
            "type": "text",
            "text": "hi",
            "annotations": {"audience": ["user"]},
            "_meta": {"trace": 1},
            "meta": null
        });
        let cleaned = strip_internal_metadata(block);
        assert_eq!(cleaned, serde_json::json!({"type": "text", "text": "hi"}));
    }

    #[test]
    fn test_strip_leaves_non_objects_alone() {
        let block = serde_json::json!("raw");
        assert_eq!(strip_internal_metadata(block.clone()), block);
    }
}
