//! MCP dispatcher
//!
//! Maps JSON-RPC methods onto the tool registry. Transport-agnostic: the HTTP
//! and stdio front ends both hand raw messages to [`McpServer::handle_message`]
//! and decide how to deliver a [`StreamingReply`].

pub mod protocol;
pub mod stdio;
pub mod tools;

pub use protocol::{JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
pub use tools::{ToolOutcome, ToolRegistry};

use async_stream::stream;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::generation::FragmentStream;
use protocol::{tool_result, INVALID_PARAMS, METHOD_NOT_FOUND, PARSE_ERROR, PROTOCOL_VERSION};

/// One message sent to the client while answering a request.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum McpEvent {
    Notification(JsonRpcNotification),
    Response(JsonRpcResponse),
}

/// A `tools/call` whose answer is produced incrementally.
pub struct StreamingReply {
    pub id: Value,
    pub tool: String,
    pub fragments: FragmentStream,
}

impl StreamingReply {
    /// One `notifications/message` per fragment, then the final response with
    /// the concatenated text. Dropping the event stream cancels generation.
    pub fn into_events(self) -> BoxStream<'static, McpEvent> {
        let StreamingReply {
            id,
            tool,
            mut fragments,
        } = self;
        Box::pin(stream! {
            let mut text = String::new();
            while let Some(fragment) = fragments.next().await {
                text.push_str(&fragment);
                yield McpEvent::Notification(JsonRpcNotification::log_message(&tool, fragment));
            }
            yield McpEvent::Response(JsonRpcResponse::success(id, tool_result(&text, false)));
        })
    }

    /// Accumulate every fragment into a single response.
    pub async fn collect(self) -> JsonRpcResponse {
        let text = self.fragments.collect_text().await;
        JsonRpcResponse::success(self.id, tool_result(&text, false))
    }
}

pub enum McpReply {
    Response(JsonRpcResponse),
    Streaming(StreamingReply),
    /// The message was a notification; nothing is sent back.
    NoContent,
}

pub struct McpServer {
    tools: ToolRegistry,
}

impl McpServer {
    pub fn new(tools: ToolRegistry) -> Self {
        Self { tools }
    }

    /// Parse and dispatch one raw JSON-RPC message.
    pub async fn handle_message(&self, raw: &str) -> McpReply {
        match serde_json::from_str::<JsonRpcRequest>(raw) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => McpReply::Response(JsonRpcResponse::failure(
                Value::Null,
                PARSE_ERROR,
                format!("Parse error: {}", e),
            )),
        }
    }

    pub async fn handle_request(&self, request: JsonRpcRequest) -> McpReply {
        debug!("MCP request: {}", request.method);

        let Some(id) = request.id else {
            debug!("Notification {} acknowledged", request.method);
            return McpReply::NoContent;
        };

        let response = match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {
                        "tools": {},
                        "logging": {}
                    },
                    "serverInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION")
                    }
                }),
            ),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => JsonRpcResponse::success(id, json!({ "tools": tools::definitions() })),
            "tools/call" => return self.handle_tool_call(id, request.params).await,
            other => JsonRpcResponse::failure(id, METHOD_NOT_FOUND, format!("Method not found: {}", other)),
        };
        McpReply::Response(response)
    }

    async fn handle_tool_call(&self, id: Value, params: Option<Value>) -> McpReply {
        let Some(params) = params else {
            return McpReply::Response(JsonRpcResponse::failure(id, INVALID_PARAMS, "Missing params"));
        };
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return McpReply::Response(JsonRpcResponse::failure(
                id,
                INVALID_PARAMS,
                "Missing tool name",
            ));
        };
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        match self.tools.call(name, arguments).await {
            ToolOutcome::Text { text, is_error } => {
                McpReply::Response(JsonRpcResponse::success(id, tool_result(&text, is_error)))
            }
            ToolOutcome::Stream(fragments) => McpReply::Streaming(StreamingReply {
                id,
                tool: name.to_string(),
                fragments,
            }),
        }
    }
}
