//! Non-RPC command dialect on `/mcp`.
//!
//! Strict MCP results stay on the JSON-RPC plane; clients that POST a plain
//! `{"command": ...}` body get the enriched shape with per-agent errors and
//! the list of agents that answered with nothing.

use {
    axum::{
        http::StatusCode,
        response::{IntoResponse, Json, Response},
    },
    serde_json::{Value, json},
};

use crate::{aggregate, state::RouterState};

pub async fn handle_command(state: &RouterState, body: &Value) -> Response {
    let Some(command) = body.get("command").and_then(Value::as_str) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "missing command"})),
        )
            .into_response();
    };

    let table = match state.routing_table() {
        Ok(table) => table,
        Err(e) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": format!("routing table unavailable: {e}")})),
            )
                .into_response();
        },
    };

    match command {
        "list_tools" => {
            let aggregated = aggregate::list_all_tools(&table).await;
            Json(json!({
                "tools": aggregated.tools,
                "errors": aggregated.errors,
                "emptyAgents": aggregated.empty_agents,
            }))
            .into_response()
        },
        "list_resources" => {
            let aggregated = aggregate::list_all_resources(&table).await;
            let resources: Vec<Value> = aggregated
                .resources
                .into_iter()
                .map(|(agent, r)| {
                    let mut value = serde_json::to_value(r).unwrap_or(Value::Null);
                    if let Value::Object(ref mut map) = value {
                        map.insert("agent".into(), json!(agent));
                    }
                    value
                })
                .collect();
            Json(json!({
                "resources": resources,
                "errors": aggregated.errors,
            }))
            .into_response()
        },
        other => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": format!("unknown command '{other}'")})),
        )
            .into_response(),
    }
}
