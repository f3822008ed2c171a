//! JSON-RPC dispatch for the aggregated `/mcp` plane.
//!
//! Every well-formed JSON-RPC exchange is answered with HTTP 200; errors
//! travel in the envelope. Only transport-level failures (method not
//! allowed, malformed proxy bodies) surface as HTTP status codes.

use {
    axum::{
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Json, Response},
    },
    serde_json::{Value, json},
    tracing::warn,
};

use ploinky_mcp::{
    JsonRpcResponse, MCP_SESSION_HEADER, McpClient, PROTOCOL_VERSION, types::codes,
};

use crate::{aggregate, state::RouterState};

pub const SERVER_NAME: &str = "ploinky-router";

const INSTRUCTIONS: &str = "Aggregated MCP endpoint. tools/list and resources/list fan out \
across all live agents; tools/call accepts an optional 'agent' param to pin the target.";

/// A parsed single JSON-RPC request.
#[derive(Debug)]
pub struct RpcCall {
    pub id: Option<Value>,
    pub method: String,
    pub params: Value,
}

/// Parse a request body. `Err` carries a ready error envelope.
pub fn parse_call(body: &Value) -> Result<RpcCall, JsonRpcResponse> {
    if body.is_array() {
        return Err(JsonRpcResponse::error(
            Value::Null,
            codes::INVALID_REQUEST,
            "Batch requests are not supported",
        ));
    }
    let Some(obj) = body.as_object() else {
        return Err(JsonRpcResponse::error(
            Value::Null,
            codes::INVALID_REQUEST,
            "Invalid Request",
        ));
    };
    if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Err(JsonRpcResponse::error(
            obj.get("id").cloned().unwrap_or(Value::Null),
            codes::INVALID_REQUEST,
            "Invalid Request: expected jsonrpc \"2.0\"",
        ));
    }
    let Some(method) = obj.get("method").and_then(Value::as_str) else {
        return Err(JsonRpcResponse::error(
            obj.get("id").cloned().unwrap_or(Value::Null),
            codes::INVALID_REQUEST,
            "Invalid Request: missing method",
        ));
    };
    Ok(RpcCall {
        id: obj.get("id").cloned(),
        method: method.to_string(),
        params: obj.get("params").cloned().unwrap_or(Value::Null),
    })
}

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

pub fn session_of(headers: &HeaderMap) -> Option<String> {
    headers
        .get(MCP_SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

fn initialize_result(server_name: &str, version: &str) -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {
            "tools": { "listChanged": false },
            "resources": { "listChanged": false },
        },
        "serverInfo": { "name": server_name, "version": version },
        "instructions": INSTRUCTIONS,
    })
}

/// The explicit target agent of a `tools/call`: `params.agent` first, then
/// `params._meta.router.agent`.
#[must_use]
pub fn explicit_agent(params: &Value) -> Option<&str> {
    params
        .get("agent")
        .and_then(Value::as_str)
        .or_else(|| params["_meta"]["router"]["agent"].as_str())
}

/// Handle one aggregated-plane call.
pub async fn handle_rpc(state: &RouterState, headers: &HeaderMap, body: Value) -> Response {
    let call = match parse_call(&body) {
        Ok(call) => call,
        Err(err) => return envelope(err),
    };

    // Notifications get no envelope.
    if call.id.is_none() {
        if let Some(session) = session_of(headers) {
            state.sessions.write().await.touch(&session);
        }
        return StatusCode::NO_CONTENT.into_response();
    }
    let id = call.id.clone().unwrap_or(Value::Null);

    if call.method == "initialize" {
        let session_id = state.sessions.write().await.create();
        let result = initialize_result(SERVER_NAME, &state.version);
        return envelope_with_session(JsonRpcResponse::result(id, result), &session_id);
    }

    // Everything after initialize needs a live session.
    let valid_session = match session_of(headers) {
        Some(session) => state.sessions.write().await.touch(&session),
        None => false,
    };
    if !valid_session {
        return envelope(JsonRpcResponse::error(
            id,
            codes::APPLICATION,
            "Missing or invalid MCP session",
        ));
    }

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

    match call.method.as_str() {
        "tools/list" => {
            let aggregated = aggregate::list_all_tools(&table).await;
            for failure in &aggregated.errors {
                warn!(agent = %failure.agent, error = %failure.error, "partial aggregation");
            }
            envelope(JsonRpcResponse::result(
                id,
                json!({ "tools": aggregated.tools }),
            ))
        },
        "resources/list" => {
            let aggregated = aggregate::list_all_resources(&table).await;
            for failure in &aggregated.errors {
                warn!(agent = %failure.agent, error = %failure.error, "partial aggregation");
            }
            let resources: Vec<_> = aggregated.resources.into_iter().map(|(_, r)| r).collect();
            envelope(JsonRpcResponse::result(
                id,
                json!({ "resources": resources }),
            ))
        },
        "tools/call" => handle_tools_call(&table, id, &call.params).await,
        "resources/read" => handle_resources_read(&table, id, &call.params).await,
        "ping" => handle_ping(&table, id, &call.params).await,
        other => envelope(JsonRpcResponse::error(
            id,
            codes::METHOD_NOT_FOUND,
            format!("Method not found: {other}"),
        )),
    }
}

async fn handle_tools_call(
    table: &ploinky_registry::RoutingTable,
    id: Value,
    params: &Value,
) -> Response {
    let Some(name) = params.get("name").and_then(Value::as_str) else {
        return envelope(JsonRpcResponse::error(
            id,
            codes::INVALID_PARAMS,
            "tools/call requires params.name",
        ));
    };
    let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

    match aggregate::resolve_tool(table, name, explicit_agent(params)).await {
        aggregate::Resolution::Unique { agent, base_url } => {
            match forward_tool_call(&base_url, name, arguments).await {
                Ok(result) => envelope(JsonRpcResponse::result(id, result)),
                Err(e) => {
                    warn!(agent = %agent, tool = name, error = %e, "tools/call failed");
                    envelope(JsonRpcResponse::error(
                        id,
                        codes::APPLICATION,
                        aggregate::summarize(&e),
                    ))
                },
            }
        },
        aggregate::Resolution::Ambiguous { agents } => envelope(
            JsonRpcResponse::error_with_data(
                id,
                codes::APPLICATION,
                format!("Tool '{name}' is exposed by multiple agents"),
                json!({
                    "error": "ambiguous tool name, pass params.agent",
                    "agents": agents,
                }),
            ),
        ),
        aggregate::Resolution::NotFound => envelope(JsonRpcResponse::error(
            id,
            codes::APPLICATION,
            format!("Tool '{name}' was not found on any agent"),
        )),
    }
}

async fn forward_tool_call(
    base_url: &str,
    name: &str,
    arguments: Value,
) -> ploinky_mcp::Result<Value> {
    let mut client = McpClient::connect(base_url).await?;
    let result = client.call_tool(name, arguments).await;
    client.close().await;
    Ok(serde_json::to_value(result?).unwrap_or(Value::Null))
}

async fn handle_resources_read(
    table: &ploinky_registry::RoutingTable,
    id: Value,
    params: &Value,
) -> Response {
    let Some(uri) = params.get("uri").and_then(Value::as_str) else {
        return envelope(JsonRpcResponse::error(
            id,
            codes::INVALID_PARAMS,
            "resources/read requires params.uri",
        ));
    };

    match aggregate::resolve_resource(table, uri).await {
        aggregate::Resolution::Unique { agent, base_url } => {
            let result = async {
                let mut client = McpClient::connect(&base_url).await?;
                let read = client.read_resource(uri).await;
                client.close().await;
                read
            }
            .await;
            match result {
                Ok(contents) => envelope(JsonRpcResponse::result(id, contents)),
                Err(e) => {
                    warn!(agent = %agent, uri, error = %e, "resources/read failed");
                    envelope(JsonRpcResponse::error(
                        id,
                        codes::APPLICATION,
                        aggregate::summarize(&e),
                    ))
                },
            }
        },
        aggregate::Resolution::Ambiguous { agents } => envelope(
            JsonRpcResponse::error_with_data(
                id,
                codes::APPLICATION,
                format!("Resource '{uri}' is exposed by multiple agents"),
                json!({
                    "error": "ambiguous resource uri",
                    "agents": agents,
                }),
            ),
        ),
        aggregate::Resolution::NotFound => envelope(JsonRpcResponse::error(
            id,
            codes::APPLICATION,
            format!("Resource '{uri}' was not found on any agent"),
        )),
    }
}

async fn handle_ping(
    table: &ploinky_registry::RoutingTable,
    id: Value,
    params: &Value,
) -> Response {
    let Some(agent) = params.get("agent").and_then(Value::as_str) else {
        return envelope(JsonRpcResponse::error(
            id,
            codes::INVALID_PARAMS,
            "ping requires params.agent",
        ));
    };
    let Some(entry) = table.get(agent).filter(|e| e.is_enabled()) else {
        return envelope(JsonRpcResponse::error(
            id,
            codes::APPLICATION,
            format!("Agent '{agent}' is not routable"),
        ));
    };

    let result = async {
        let mut client = McpClient::connect(&entry.base_url()).await?;
        let pinged = client.ping().await;
        client.close().await;
        pinged
    }
    .await;

    match result {
        Ok(()) => envelope(JsonRpcResponse::result(id, json!({}))),
        Err(e) => envelope(JsonRpcResponse::error(
            id,
            codes::APPLICATION,
            aggregate::summarize(&e),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rejects_batch() {
        let err = parse_call(&json!([{"jsonrpc": "2.0"}])).unwrap_err();
        assert_eq!(err.error.as_ref().unwrap().code, codes::INVALID_REQUEST);
        assert!(err.error.unwrap().message.contains("Batch"));
    }

    #[test]
    fn test_parse_rejects_wrong_version() {
        let err = parse_call(&json!({"jsonrpc": "1.0", "id": 1, "method": "x"})).unwrap_err();
        assert_eq!(err.error.unwrap().code, codes::INVALID_REQUEST);
    }

    #[test]
    fn test_parse_accepts_notification() {
        let call = parse_call(&json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        }))
        .unwrap();
        assert!(call.id.is_none());
        assert_eq!(call.method, "notifications/initialized");
    }

    #[test]
    fn test_explicit_agent_params() {
        assert_eq!(explicit_agent(&json!({"agent": "a"})), Some("a"));
        assert_eq!(
            explicit_agent(&json!({"_meta": {"router": {"agent": "b"}}})),
            Some("b")
        );
        // params.agent wins over _meta.
        assert_eq!(
            explicit_agent(&json!({"agent": "a", "_meta": {"router": {"agent": "b"}}})),
            Some("a")
        );
        assert_eq!(explicit_agent(&json!({})), None);
    }

    #[test]
    fn test_initialize_result_identity() {
        let result = initialize_result(SERVER_NAME, "1.0.0");
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "ploinky-router");
        assert_eq!(result["capabilities"]["tools"]["listChanged"], false);
    }
}
