//! Hosting server — exposes the router's single tool over MCP stdio.
//!
//! Newline-delimited JSON-RPC 2.0 in both directions. stdout carries
//! protocol messages only; all diagnostics go through `tracing`.
//!
//! Every request runs on its own task, so a long synchronous
//! `execute_tool` does not hold up polls behind it. Responses are funnelled
//! through one writer task and never interleave.

use std::io;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::mcp_client::types::{error_codes, text_block, PROTOCOL_VERSION};
use crate::router::instructions::ROUTER_TOOL_NAME;
use crate::router::{Engine, RouteRequest};

/// Name the router announces in `initialize`.
pub const SERVER_NAME: &str = "mcp-server-orchestrator";

/// A JSON-RPC failure to report back to the client.
#[derive(Debug)]
struct RpcFailure {
    code: i32,
    message: String,
}

impl RpcFailure {
    fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

fn success(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn failure(id: Value, err: RpcFailure) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": err.code, "message": err.message },
    })
}

// ─── Serve loop ──────────────────────────────────────────────────────────────

/// Serve on the process's stdin/stdout until stdin closes.
pub async fn serve_stdio(engine: Arc<Engine>) -> io::Result<()> {
    serve(engine, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Serve requests from `reader`, answering on `writer`, until EOF.
///
/// Requests still being handled at EOF are allowed to finish and answer.
/// Dropping the returned future aborts them.
pub async fn serve<R, W>(engine: Arc<Engine>, reader: R, writer: W) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel::<Value>();
    let writer_task = tokio::spawn(write_loop(writer, rx));

    let mut handlers = JoinSet::new();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let message: Value = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "unparsable message from client");
                let _ = tx.send(failure(
                    Value::Null,
                    RpcFailure::new(error_codes::PARSE_ERROR, format!("Parse error: {e}")),
                ));
                continue;
            }
        };

        let id = message.get("id").cloned().filter(|id| !id.is_null());
        let method = message.get("method").and_then(Value::as_str).map(str::to_owned);

        match (id, method) {
            (Some(id), Some(method)) => {
                let params = message.get("params").cloned();
                let engine = Arc::clone(&engine);
                let tx = tx.clone();
                handlers.spawn(async move {
                    let response = match handle_request(&engine, &method, params).await {
                        Ok(result) => success(id, result),
                        Err(err) => {
                            tracing::debug!(%method, code = err.code, error = %err.message, "request failed");
                            failure(id, err)
                        }
                    };
                    let _ = tx.send(response);
                });
                // Reap handles of requests that already answered.
                while handlers.try_join_next().is_some() {}
            }
            (None, Some(method)) => {
                tracing::debug!(%method, "notification ignored");
            }
            (Some(id), None) => {
                let _ = tx.send(failure(
                    id,
                    RpcFailure::new(error_codes::INVALID_REQUEST, "Invalid Request: missing method"),
                ));
            }
            (None, None) => {
                tracing::debug!("ignoring message without id or method");
            }
        }
    }

    tracing::info!("client closed input; draining in-flight requests");
    while let Some(joined) = handlers.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "request handler panicked");
        }
    }

    drop(tx);
    writer_task.await.map_err(io::Error::other)?
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<Value>) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let mut line = serde_json::to_string(&message).map_err(io::Error::other)?;
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}

// ─── Methods ─────────────────────────────────────────────────────────────────

async fn handle_request(
    engine: &Engine,
    method: &str,
    params: Option<Value>,
) -> Result<Value, RpcFailure> {
    match method {
        "initialize" => Ok(json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": { "listChanged": false } },
            "serverInfo": { "name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION") },
            "instructions": engine.instructions(),
        })),
        "ping" => Ok(json!({})),
        "tools/list" => Ok(json!({ "tools": [engine.tool_definition()] })),
        "tools/call" => call_tool(engine, params.unwrap_or(Value::Null)).await,
        other => Err(RpcFailure::new(
            error_codes::METHOD_NOT_FOUND,
            format!("Method not found: {other}"),
        )),
    }
}

async fn call_tool(engine: &Engine, params: Value) -> Result<Value, RpcFailure> {
    let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
    if name != ROUTER_TOOL_NAME {
        return Err(RpcFailure::new(
            error_codes::INVALID_PARAMS,
            format!("Unknown tool: {name}"),
        ));
    }

    let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
    let request: RouteRequest = serde_json::from_value(arguments).map_err(|e| {
        RpcFailure::new(
            error_codes::INVALID_PARAMS,
            format!("Invalid arguments for {ROUTER_TOOL_NAME}: {e}"),
        )
    })?;

    let server = request.server_name.clone();
    let action = request.action.clone();
    match engine.route(request).await {
        Ok(content) => Ok(json!({ "content": content, "isError": false })),
        Err(e) => {
            if e.is_validation() {
                tracing::debug!(%server, %action, error = %e, "route call rejected");
            } else {
                tracing::warn!(%server, %action, error = %e, "route call failed");
            }
            Ok(json!({ "content": [text_block(e.to_string())], "isError": true }))
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{DuplexStream, Lines, ReadHalf, WriteHalf};
    use tokio::task::JoinHandle;

    use super::*;
    use crate::config::RouterConfig;
    use crate::router::testing::{descriptor, FakeLauncher};

    struct Client {
        input: WriteHalf<DuplexStream>,
        output: Lines<BufReader<ReadHalf<DuplexStream>>>,
        server: JoinHandle<io::Result<()>>,
    }

    impl Client {
        async fn start() -> Self {
            let config = RouterConfig {
                mcp_servers: vec![descriptor("fast", 5.0)],
            };
            let engine = Arc::new(Engine::start(&config, &FakeLauncher::new()).await);

            let (client_end, server_end) = tokio::io::duplex(64 * 1024);
            let (server_read, server_write) = tokio::io::split(server_end);
            let (client_read, client_write) = tokio::io::split(client_end);
            let server = tokio::spawn(serve(engine, server_read, server_write));

            Self {
                input: client_write,
                output: BufReader::new(client_read).lines(),
                server,
            }
        }

        async fn send(&mut self, line: &str) {
            self.input.write_all(line.as_bytes()).await.unwrap();
            self.input.write_all(b"\n").await.unwrap();
        }

        async fn recv(&mut self) -> Value {
            let line = self.output.next_line().await.unwrap().unwrap();
            serde_json::from_str(&line).unwrap()
        }

        async fn call(&mut self, id: u64, arguments: Value) -> Value {
            let request = json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": "tools/call",
                "params": { "name": ROUTER_TOOL_NAME, "arguments": arguments },
            });
            self.send(&request.to_string()).await;
            self.recv().await
        }
    }

    #[tokio::test]
    async fn test_initialize_advertises_orchestrator() {
        let mut client = Client::start().await;
        client
            .send(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#)
            .await;
        let response = client.recv().await;

        assert_eq!(response["id"], 1);
        let result = &response["result"];
        assert_eq!(result["serverInfo"]["name"], SERVER_NAME);
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert!(result["instructions"].as_str().unwrap().contains("name: fast"));
    }

    #[tokio::test]
    async fn test_tools_list_exposes_single_router_tool() {
        let mut client = Client::start().await;
        client
            .send(r#"{"jsonrpc":"2.0","id":"a","method":"tools/list"}"#)
            .await;
        let response = client.recv().await;

        assert_eq!(response["id"], "a");
        let tools = response["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], ROUTER_TOOL_NAME);
        assert!(tools[0]["inputSchema"]["properties"]["action"].is_object());
    }

    #[tokio::test]
    async fn test_tools_call_routes_to_backend() {
        let mut client = Client::start().await;
        let response = client
            .call(7, json!({"server_name": "fast", "action": "list_tools"}))
            .await;

        assert_eq!(response["result"]["isError"], false);
        let content = response["result"]["content"].as_array().unwrap();
        assert_eq!(content[0]["text"], "tool_name: echo");
    }

    #[tokio::test]
    async fn test_route_errors_become_error_results() {
        let mut client = Client::start().await;
        let response = client
            .call(2, json!({"server_name": "fast", "action": "bogus"}))
            .await;

        assert_eq!(response["result"]["isError"], true);
        let text = response["result"]["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("unsupported action"));
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let mut client = Client::start().await;

        client.send("this is not json").await;
        let response = client.recv().await;
        assert_eq!(response["error"]["code"], error_codes::PARSE_ERROR);
        assert!(response["id"].is_null());

        client
            .send(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await;
        client
            .send(r#"{"jsonrpc":"2.0","id":3,"method":"resources/list"}"#)
            .await;
        let response = client.recv().await;
        assert_eq!(response["id"], 3);
        assert_eq!(response["error"]["code"], error_codes::METHOD_NOT_FOUND);

        let response = client
            .call(4, json!({"server_name": "fast"}))
            .await;
        assert_eq!(response["error"]["code"], error_codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_slow_execute_does_not_block_other_requests() {
        let mut client = Client::start().await;

        let slow = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": {
                "name": ROUTER_TOOL_NAME,
                "arguments": {
                    "server_name": "fast",
                    "action": "execute_tool",
                    "tool_name": "echo",
                    "tool_arguments": "{\"sleep_ms\":300}",
                },
            },
        });
        client.send(&slow.to_string()).await;
        client.send(r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#).await;

        let first = client.recv().await;
        assert_eq!(first["id"], 2);
        let second = client.recv().await;
        assert_eq!(second["id"], 1);
        assert_eq!(
            second["result"]["content"][0]["text"],
            r#"{"sleep_ms":300}"#
        );
    }

    #[tokio::test]
    async fn test_eof_drains_and_stops() {
        let mut client = Client::start().await;
        client.send(r#"{"jsonrpc":"2.0","id":9,"method":"ping"}"#).await;
        client.input.shutdown().await.unwrap();

        let response = client.recv().await;
        assert_eq!(response["id"], 9);

        let result = tokio::time::timeout(Duration::from_secs(5), client.server)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
