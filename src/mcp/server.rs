//! MCP method dispatch over one session engine.
//!
//! Transport-free: stdio and HTTP both hand decoded frames to
//! [`LogicServer::handle_frame`] and write back whatever it returns.

use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use super::protocol::{self, Request, Response};
use super::resources;
use crate::prolog::{CancelToken, QueryContext, SessionEngine};
use crate::tools::{register_logic_tools, DispatchError, ToolRegistry};

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "logic-mcp";

#[derive(Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Deserialize)]
struct ReadParams {
    uri: String,
}

/// One session: an engine plus the tools bound to it.
pub struct LogicServer {
    engine: Arc<SessionEngine>,
    tools: ToolRegistry,
    timeout: Duration,
    shutdown: CancelToken,
}

impl LogicServer {
    /// `timeout` bounds the solver work of each tool call.
    pub fn new(engine: SessionEngine, timeout: Duration) -> Self {
        let engine = Arc::new(engine);
        let mut tools = ToolRegistry::new();
        register_logic_tools(&mut tools, engine.clone());
        Self {
            engine,
            tools,
            timeout,
            shutdown: CancelToken::new(),
        }
    }

    /// Running solver processes are killed when `token` is cancelled.
    pub fn with_shutdown(mut self, token: CancelToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn engine(&self) -> &SessionEngine {
        &self.engine
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn close(&self) {
        self.engine.close();
    }

    /// Decode and handle one raw frame. `None` means no response is due
    /// (the frame was a notification).
    pub fn handle_frame(&self, frame: &str) -> Option<Response> {
        match protocol::decode(frame) {
            Ok(request) => self.handle(&request),
            Err(response) => {
                tracing::warn!("undecodable frame");
                Some(response)
            }
        }
    }

    pub fn handle(&self, request: &Request) -> Option<Response> {
        // Validate JSON-RPC version
        if request.jsonrpc != "2.0" {
            if request.is_notification() {
                tracing::warn!(version = %request.jsonrpc, "dropping notification with bad version");
                return None;
            }
            return Some(Response::error(
                request.id.clone(),
                protocol::INVALID_REQUEST,
                &format!(
                    "Invalid JSON-RPC version: expected 2.0, got {}",
                    request.jsonrpc
                ),
            ));
        }

        let response = self.dispatch(request);
        if request.is_notification() {
            return None;
        }
        Some(response)
    }

    fn dispatch(&self, req: &Request) -> Response {
        match req.method.as_str() {
            "initialize" => self.handle_initialize(req),
            "initialized" | "notifications/initialized" | "ping" => {
                Response::success(req.id.clone(), json!({}))
            }
            "tools/list" => self.handle_list_tools(req),
            "tools/call" => self.handle_tool_call(req),
            "resources/list" => handle_list_resources(req),
            "resources/read" => handle_read_resource(req),
            method if method.starts_with("notifications/") => {
                Response::success(req.id.clone(), json!({}))
            }
            method => Response::error_with_data(
                req.id.clone(),
                protocol::METHOD_NOT_FOUND,
                "Method not found",
                format!("Unknown method: {}", method),
            ),
        }
    }

    fn handle_initialize(&self, req: &Request) -> Response {
        if let Some(client) = req.params.get("clientInfo") {
            tracing::info!(client = %client, "client initialized session");
        }
        Response::success(
            req.id.clone(),
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "tools": { "listChanged": false },
                    "resources": { "subscribe": false, "listChanged": false }
                },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        )
    }

    fn handle_list_tools(&self, req: &Request) -> Response {
        Response::success(
            req.id.clone(),
            json!({ "tools": self.tools.definitions() }),
        )
    }

    fn handle_tool_call(&self, req: &Request) -> Response {
        let params: CallParams = match serde_json::from_value(req.params.clone()) {
            Ok(params) => params,
            Err(e) => {
                return Response::error_with_data(
                    req.id.clone(),
                    protocol::INVALID_PARAMS,
                    "Invalid params",
                    format!("Expected object with 'name' and 'arguments': {}", e),
                )
            }
        };

        let ctx = QueryContext::with_timeout(self.timeout).with_cancel(self.shutdown.clone());
        match self.tools.dispatch(&params.name, params.arguments, &ctx) {
            Ok(result) => {
                if result.is_error {
                    tracing::debug!(tool = %params.name, "tool reported an error");
                }
                match serde_json::to_value(&result) {
                    Ok(value) => Response::success(req.id.clone(), value),
                    Err(e) => Response::error_with_data(
                        req.id.clone(),
                        protocol::INTERNAL_ERROR,
                        "Internal error",
                        e.to_string(),
                    ),
                }
            }
            Err(e @ DispatchError::UnknownTool(_)) => {
                tracing::warn!(tool = %params.name, "call to unknown tool");
                Response::error_with_data(
                    req.id.clone(),
                    protocol::INTERNAL_ERROR,
                    "Tool execution error",
                    e.to_string(),
                )
            }
        }
    }
}

fn handle_list_resources(req: &Request) -> Response {
    Response::success(req.id.clone(), json!({ "resources": resources::list() }))
}

fn handle_read_resource(req: &Request) -> Response {
    let params: ReadParams = match serde_json::from_value(req.params.clone()) {
        Ok(params) => params,
        Err(e) => {
            return Response::error_with_data(
                req.id.clone(),
                protocol::INVALID_PARAMS,
                "Invalid params",
                format!("Expected object with 'uri': {}", e),
            )
        }
    };

    match resources::read(&params.uri) {
        Some(resource) => Response::success(
            req.id.clone(),
            json!({
                "contents": [{
                    "uri": resource.uri,
                    "mimeType": resource.mime_type,
                    "text": resource.text
                }]
            }),
        ),
        None => Response::error_with_data(
            req.id.clone(),
            protocol::INTERNAL_ERROR,
            "Resource not found",
            format!("unknown resource URI: {}", params.uri),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prolog::{InvokeError, SolverBackend, SolverRun};
    use std::path::Path;

    struct AlwaysTrue;

    impl SolverBackend for AlwaysTrue {
        fn run(&self, _: &Path, _: &str, _: &QueryContext) -> Result<SolverRun, InvokeError> {
            Ok(SolverRun {
                exit_code: Some(0),
                output: "SUCCESS: true\n".to_string(),
            })
        }

        fn describe(&self) -> String {
            "always-true".to_string()
        }
    }

    fn server() -> LogicServer {
        let engine = SessionEngine::with_backend(Arc::new(AlwaysTrue), None).unwrap();
        LogicServer::new(engine, Duration::from_secs(5))
    }

    fn call(server: &LogicServer, frame: Value) -> Value {
        let response = server.handle_frame(&frame.to_string()).unwrap();
        serde_json::to_value(&response).unwrap()
    }

    #[test]
    fn test_initialize() {
        let resp = call(
            &server(),
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}),
        );
        assert_eq!(resp["id"], 1);
        assert_eq!(resp["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(resp["result"]["serverInfo"]["name"], SERVER_NAME);
    }

    #[test]
    fn test_unknown_method() {
        let resp = call(&server(), json!({"jsonrpc": "2.0", "id": 2, "method": "foo/bar"}));
        assert_eq!(resp["error"]["code"], protocol::METHOD_NOT_FOUND);
        assert!(resp.get("result").is_none());
    }

    #[test]
    fn test_bad_version() {
        let resp = call(&server(), json!({"jsonrpc": "1.0", "id": 3, "method": "ping"}));
        assert_eq!(resp["error"]["code"], protocol::INVALID_REQUEST);
    }

    #[test]
    fn test_notification_gets_no_response() {
        let server = server();
        let frame = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
        assert!(server.handle_frame(&frame.to_string()).is_none());

        // Not even an error when the version is wrong
        let frame = json!({"jsonrpc": "1.0", "method": "notifications/initialized"});
        assert!(server.handle_frame(&frame.to_string()).is_none());
    }

    #[test]
    fn test_null_id_request_is_answered() {
        let resp = call(&server(), json!({"jsonrpc": "2.0", "id": null, "method": "tools/list"}));
        assert_eq!(resp["id"], Value::Null);
        assert_eq!(resp["result"]["tools"].as_array().unwrap().len(), 6);
    }

    #[test]
    fn test_tools_list_has_schemas() {
        let resp = call(&server(), json!({"jsonrpc": "2.0", "id": 4, "method": "tools/list"}));
        let tools = resp["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 6);
        assert_eq!(tools[0]["inputSchema"]["required"][0], "query");
    }

    #[test]
    fn test_tool_call_layers() {
        let server = server();

        // Protocol level: params are not an object
        let resp = call(
            &server,
            json!({"jsonrpc": "2.0", "id": 5, "method": "tools/call", "params": [1, 2]}),
        );
        assert_eq!(resp["error"]["code"], protocol::INVALID_PARAMS);

        // Dispatch level: unknown tool
        let resp = call(
            &server,
            json!({"jsonrpc": "2.0", "id": 6, "method": "tools/call",
                   "params": {"name": "prolog_fly", "arguments": {}}}),
        );
        assert_eq!(resp["error"]["code"], protocol::INTERNAL_ERROR);
        assert_eq!(resp["error"]["data"], "unknown tool: prolog_fly");

        // Tool level: bad arguments still succeed at the protocol level
        let resp = call(
            &server,
            json!({"jsonrpc": "2.0", "id": 7, "method": "tools/call",
                   "params": {"name": "prolog_query", "arguments": {"query": 12}}}),
        );
        assert!(resp.get("error").is_none());
        assert_eq!(resp["result"]["isError"], true);

        // Success
        let resp = call(
            &server,
            json!({"jsonrpc": "2.0", "id": 8, "method": "tools/call",
                   "params": {"name": "prolog_query", "arguments": {"query": "true."}}}),
        );
        assert_eq!(resp["result"]["structuredContent"]["success"], true);
    }

    #[test]
    fn test_resources() {
        let server = server();
        let resp = call(&server, json!({"jsonrpc": "2.0", "id": 9, "method": "resources/list"}));
        assert_eq!(resp["result"]["resources"].as_array().unwrap().len(), 3);

        let resp = call(
            &server,
            json!({"jsonrpc": "2.0", "id": 10, "method": "resources/read",
                   "params": {"uri": "prolog://examples/basic"}}),
        );
        assert!(resp["result"]["contents"][0]["text"]
            .as_str()
            .unwrap()
            .contains("mammal(X)"));

        let resp = call(
            &server,
            json!({"jsonrpc": "2.0", "id": 11, "method": "resources/read", "params": {}}),
        );
        assert_eq!(resp["error"]["code"], protocol::INVALID_PARAMS);

        let resp = call(
            &server,
            json!({"jsonrpc": "2.0", "id": 12, "method": "resources/read",
                   "params": {"uri": "prolog://examples/missing"}}),
        );
        assert_eq!(resp["error"]["code"], protocol::INTERNAL_ERROR);
    }
}
