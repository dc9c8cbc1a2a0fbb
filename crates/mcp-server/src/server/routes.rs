use axum::{
    extract::State,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::StreamExt;
use http::{header, HeaderMap, StatusCode};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error};

use super::Server;
use crate::mcp::McpReply;
use crate::metrics::gather_metrics;

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

pub async fn metrics() -> Response {
    match gather_metrics() {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to gather metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn accepts_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains("text/event-stream"))
}

/// JSON-RPC over HTTP. The body is taken raw so malformed JSON still gets a
/// JSON-RPC parse error rather than an HTTP rejection.
pub async fn mcp(State(server): State<Arc<Server>>, headers: HeaderMap, body: String) -> Response {
    match server.mcp.handle_message(&body).await {
        McpReply::Response(response) => Json(response).into_response(),
        McpReply::NoContent => StatusCode::ACCEPTED.into_response(),
        McpReply::Streaming(reply) if accepts_event_stream(&headers) => {
            debug!("Streaming {} over SSE", reply.tool);
            let events = reply.into_events().map(|event| Event::default().json_data(event));
            Sse::new(events).keep_alive(KeepAlive::default()).into_response()
        }
        McpReply::Streaming(reply) => Json(reply.collect().await).into_response(),
    }
}
