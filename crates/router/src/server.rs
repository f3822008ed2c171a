//! HTTP server assembly: routes, auth layer, health.

use std::sync::Arc;

use {
    axum::{
        Router,
        body::Bytes,
        extract::{Path, State},
        http::{HeaderMap, StatusCode, header},
        middleware,
        response::{IntoResponse, Json, Response},
        routing::{any, get, post},
    },
    serde_json::{Value, json},
    tracing::info,
};

use ploinky_registry::{AgentRegistry, RoutingTable};

use crate::{auth, command, proxy, rpc, state::RouterState};

/// Build the router app (shared between production startup and tests).
pub fn build_router(state: Arc<RouterState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/mcp",
            post(mcp_post)
                .delete(mcp_delete)
                .get(method_not_allowed),
        )
        .route(
            "/mcps/{agent}/mcp",
            post(proxy_post)
                .delete(proxy_delete)
                .get(method_not_allowed),
        )
        .route("/mcps/{agent}", any(proxy_fallback))
        .route("/mcps/{agent}/{*rest}", any(proxy_fallback))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::auth_gate,
        ))
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(state: Arc<RouterState>, port: u16) -> std::io::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "router listening");
    axum::serve(listener, app).await
}

// ── Handlers ────────────────────────────────────────────────────────────────

/// Healthy iff the persisted control-plane state is readable. Never behind
/// the auth gate; the watchdog polls this.
async fn health_handler(State(state): State<Arc<RouterState>>) -> Response {
    let registry = AgentRegistry::load(&state.paths.agents_json());
    let routing = RoutingTable::load(&state.paths.routing_json());

    match (registry, routing) {
        (Ok(_), Ok(_)) => (StatusCode::OK, Json(json!({"status": "healthy"}))).into_response(),
        (registry, routing) => {
            let reason = registry
                .err()
                .map(|e| e.to_string())
                .or_else(|| routing.err().map(|e| e.to_string()))
                .unwrap_or_default();
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "unhealthy", "error": reason})),
            )
                .into_response()
        },
    }
}

async fn method_not_allowed() -> Response {
    let mut response = (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({"error": "event_stream_not_supported"})),
    )
        .into_response();
    if let Ok(allow) = "POST, DELETE".parse() {
        response.headers_mut().insert(header::ALLOW, allow);
    }
    response
}

async fn mcp_post(
    State(state): State<Arc<RouterState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Ok(value) = serde_json::from_slice::<Value>(&body) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid JSON body"})),
        )
            .into_response();
    };

    // Plain command bodies get the enriched non-RPC dialect.
    if value.get("jsonrpc").is_none() && value.get("command").is_some() {
        return command::handle_command(&state, &value).await;
    }

    rpc::handle_rpc(&state, &headers, value).await
}

async fn mcp_delete(State(state): State<Arc<RouterState>>, headers: HeaderMap) -> Response {
    if let Some(session) = rpc::session_of(&headers) {
        state.sessions.write().await.remove(&session);
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn proxy_post(
    State(state): State<Arc<RouterState>>,
    Path(agent): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let parsed = serde_json::from_slice::<Value>(&body).ok();
    let is_rpc = parsed
        .as_ref()
        .is_some_and(|v| v.is_array() || v.get("jsonrpc").is_some());
    let Some(value) = parsed.filter(|_| is_rpc) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "unsupported request for agent MCP proxy"})),
        )
            .into_response();
    };

    proxy::handle_proxy(&state, &agent, &headers, value).await
}

async fn proxy_delete(State(state): State<Arc<RouterState>>, headers: HeaderMap) -> Response {
    proxy::handle_proxy_delete(&state, &headers).await
}

async fn proxy_fallback() -> Response {
    proxy::not_found()
}
