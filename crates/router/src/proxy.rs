//! The per-agent proxy plane (`/mcps/<agent>/mcp`).
//!
//! The router terminates the client-facing session and holds the upstream
//! session inside a short-lived MCP client per call, so the client never
//! sees agent session ids. Sessions here are bound to one agent and are
//! invalid on every other plane.

use {
    axum::{
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Json, Response},
    },
    serde_json::{Value, json},
    tracing::warn,
};

use ploinky_mcp::{
    Error as McpError, JsonRpcResponse, MCP_SESSION_HEADER, McpClient, PROTOCOL_VERSION,
    types::codes,
};

use crate::{aggregate::summarize, rpc, state::RouterState};

fn envelope(resp: JsonRpcResponse) -> Response {
    (StatusCode::OK, Json(resp)).into_response()
}

fn envelope_with_session(resp: JsonRpcResponse, session_id: &str) -> Response {
    let mut response = envelope(resp);
    if let Ok(value) = session_id.parse() {
        response.headers_mut().insert(MCP_SESSION_HEADER, value);
    }
    response
}

/// Handle a POST on the per-agent plane. The body has already been checked
/// to be JSON; non-JSON-RPC bodies are rejected by the server layer.
pub async fn handle_proxy(
    state: &RouterState,
    agent: &str,
    headers: &HeaderMap,
    body: Value,
) -> Response {
    let call = match rpc::parse_call(&body) {
        Ok(call) => call,
        Err(err) => return envelope(err),
    };

    if call.id.is_none() {
        return StatusCode::NO_CONTENT.into_response();
    }
    let id = call.id.clone().unwrap_or(Value::Null);

    if call.method == "initialize" {
        let table = match state.routing_table() {
            Ok(table) => table,
            Err(e) => {
                warn!(error = %e, "routing table unreadable");
                return envelope(JsonRpcResponse::error(
                    id,
                    codes::INTERNAL,
                    "routing table unavailable",
                ));
            },
        };
        let Some(entry) = table.get(agent).filter(|e| e.is_enabled()) else {
            return envelope(JsonRpcResponse::error(
                id,
                codes::APPLICATION,
                format!("Agent '{agent}' is not routable"),
            ));
        };

        let session_id = state
            .proxy_sessions
            .write()
            .await
            .create(agent, &entry.base_url());
        let result = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": { "listChanged": false },
                "resources": { "listChanged": false },
            },
            "serverInfo": {
                "name": format!("{}-proxy:{agent}", rpc::SERVER_NAME),
                "version": state.version,
            },
        });
        return envelope_with_session(JsonRpcResponse::result(id, result), &session_id);
    }

    // All other methods need a session bound to *this* agent.
    let base_url = {
        let sessions = state.proxy_sessions.read().await;
        rpc::session_of(headers)
            .and_then(|sid| sessions.get_for_agent(&sid, agent).map(|s| s.base_url.clone()))
    };
    let Some(base_url) = base_url else {
        return envelope(JsonRpcResponse::error(
            id,
            codes::APPLICATION,
            "Missing or invalid MCP session",
        ));
    };

    match forward(&base_url, &call.method, &call.params).await {
        Ok(result) => envelope(JsonRpcResponse::result(id, result)),
        // Upstream JSON-RPC errors pass through with their own codes.
        Err(McpError::Remote { code, message }) => {
            envelope(JsonRpcResponse::error(id, code, message))
        },
        Err(e) => {
            warn!(agent, method = %call.method, error = %e, "proxy forward failed");
            envelope(JsonRpcResponse::error(id, codes::APPLICATION, summarize(&e)))
        },
    }
}

async fn forward(base_url: &str, method: &str, params: &Value) -> ploinky_mcp::Result<Value> {
    let mut client = McpClient::connect(base_url).await?;
    let params = if params.is_null() {
        None
    } else {
        Some(params.clone())
    };
    let result = client.raw_request(method, params).await;
    client.close().await;
    result
}

/// DELETE on the proxy plane: evict the session, 204 regardless.
pub async fn handle_proxy_delete(state: &RouterState, headers: &HeaderMap) -> Response {
    if let Some(session) = rpc::session_of(headers) {
        state.proxy_sessions.write().await.remove(&session);
    }
    StatusCode::NO_CONTENT.into_response()
}

/// Any `/mcps/<agent>/...` path other than `mcp`.
pub fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "Endpoint not found. Use /mcps/<agent>/mcp for MCP access."
        })),
    )
        .into_response()
}
