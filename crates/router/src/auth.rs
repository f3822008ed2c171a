//! The authentication boundary.
//!
//! The router never implements authentication; it only enforces an opaque
//! policy ahead of every MCP handler. `/health` and `/auth/*` bypass the
//! gate: the former so supervision works unauthenticated, the latter so an
//! external identity provider can complete its flow.

use std::sync::Arc;

use {
    async_trait::async_trait,
    axum::{
        extract::{Request, State},
        http::{HeaderMap, StatusCode, header},
        middleware::Next,
        response::{IntoResponse, Json, Response},
    },
};

use crate::state::RouterState;

pub const LOGIN_PATH: &str = "/auth/login";

#[derive(Debug, Clone)]
pub struct AuthDecision {
    pub ok: bool,
    pub user: Option<String>,
}

impl AuthDecision {
    #[must_use]
    pub fn allow() -> Self {
        Self {
            ok: true,
            user: None,
        }
    }

    #[must_use]
    pub fn allow_user(user: impl Into<String>) -> Self {
        Self {
            ok: true,
            user: Some(user.into()),
        }
    }

    #[must_use]
    pub fn deny() -> Self {
        Self {
            ok: false,
            user: None,
        }
    }
}

/// Opaque auth policy consulted on every guarded request.
#[async_trait]
pub trait AuthGate: Send + Sync {
    async fn ensure_authenticated(&self, headers: &HeaderMap, path: &str) -> AuthDecision;
}

/// Default gate when SSO is disabled in the workspace config.
pub struct AllowAll;

#[async_trait]
impl AuthGate for AllowAll {
    async fn ensure_authenticated(&self, _headers: &HeaderMap, _path: &str) -> AuthDecision {
        AuthDecision::allow()
    }
}

/// Static bearer-token gate, enough for tests and single-operator setups.
pub struct BearerTokenGate {
    token: String,
}

impl BearerTokenGate {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl AuthGate for BearerTokenGate {
    async fn ensure_authenticated(&self, headers: &HeaderMap, _path: &str) -> AuthDecision {
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if presented == Some(self.token.as_str()) {
            AuthDecision::allow()
        } else {
            AuthDecision::deny()
        }
    }
}

fn wants_html(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/html"))
}

/// Axum middleware enforcing the gate ahead of MCP handlers.
pub async fn auth_gate(
    State(state): State<Arc<RouterState>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    // Health is probed by the watchdog; auth flows must reach the provider.
    if path == "/health" || path.starts_with("/auth/") {
        return next.run(request).await;
    }

    let decision = state
        .auth
        .ensure_authenticated(request.headers(), &path)
        .await;
    if decision.ok {
        return next.run(request).await;
    }

    if wants_html(request.headers()) {
        // Browser navigation gets a plain 302 to the login page.
        (StatusCode::FOUND, [(header::LOCATION, LOGIN_PATH)]).into_response()
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "error": "not authenticated",
                "login": LOGIN_PATH,
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allow_all() {
        let gate = AllowAll;
        let decision = gate.ensure_authenticated(&HeaderMap::new(), "/mcp").await;
        assert!(decision.ok);
    }

    #[tokio::test]
    async fn test_bearer_token_gate() {
        let gate = BearerTokenGate::new("s3cret");

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer s3cret".parse().unwrap());
        assert!(gate.ensure_authenticated(&headers, "/mcp").await.ok);

        let mut wrong = HeaderMap::new();
        wrong.insert(header::AUTHORIZATION, "Bearer nope".parse().unwrap());
        assert!(!gate.ensure_authenticated(&wrong, "/mcp").await.ok);

        assert!(!gate.ensure_authenticated(&HeaderMap::new(), "/mcp").await.ok);
    }

    #[test]
    fn test_wants_html() {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, "text/html,application/xhtml+xml".parse().unwrap());
        assert!(wants_html(&headers));

        let mut json = HeaderMap::new();
        json.insert(header::ACCEPT, "application/json".parse().unwrap());
        assert!(!wants_html(&json));
    }
}
