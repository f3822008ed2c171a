//! Streamable-HTTP transport: JSON-RPC over POST to the agent's base URL,
//! with the `mcp-session-id` header captured at initialize time and replayed
//! on every subsequent request.

use std::sync::atomic::{AtomicU64, Ordering};

use {
    reqwest::Client,
    tokio::sync::Mutex,
    tracing::{debug, warn},
};

use crate::{
    error::{Error, Result},
    types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, MCP_SESSION_HEADER},
};

const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

#[derive(Debug)]
pub struct HttpTransport {
    client: Client,
    url: String,
    session_id: Mutex<Option<String>>,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Message {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            url: url.to_string(),
            session_id: Mutex::new(None),
            next_id: AtomicU64::new(1),
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn session_id(&self) -> Option<String> {
        self.session_id.lock().await.clone()
    }

    fn offline(&self, source: &reqwest::Error) -> Error {
        Error::AgentOffline {
            url: self.url.clone(),
            reason: source.to_string(),
        }
    }

    /// Send a JSON-RPC request and wait for the response envelope.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest::new(id, method, params);

        debug!(method = %method, id = %id, url = %self.url, "client -> agent");

        let mut builder = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .json(&req);
        if let Some(session) = self.session_id().await {
            builder = builder.header(MCP_SESSION_HEADER, session);
        }

        let http_resp = builder.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                self.offline(&e)
            } else {
                Error::ProtocolMismatch(e.to_string())
            }
        })?;

        // Capture the session issued at initialize.
        if let Some(session) = http_resp
            .headers()
            .get(MCP_SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock().await = Some(session.to_string());
        }

        let status = http_resp.status();
        let body = http_resp
            .text()
            .await
            .map_err(|e| Error::ProtocolMismatch(e.to_string()))?;

        let resp: JsonRpcResponse = serde_json::from_str(&body).map_err(|_| {
            Error::ProtocolMismatch(format!(
                "HTTP {status} with non JSON-RPC body for '{method}'"
            ))
        })?;

        if let Some(ref err) = resp.error {
            return Err(Error::Remote {
                code: err.code,
                message: err.message.clone(),
            });
        }

        Ok(resp)
    }

    /// Send a JSON-RPC notification; no response expected.
    pub async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> Result<()> {
        let notif = JsonRpcNotification {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
        };

        let mut builder = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(&notif);
        if let Some(session) = self.session_id().await {
            builder = builder.header(MCP_SESSION_HEADER, session);
        }

        let http_resp = builder.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                self.offline(&e)
            } else {
                Error::ProtocolMismatch(e.to_string())
            }
        })?;

        if !http_resp.status().is_success() {
            warn!(method = %method, status = %http_resp.status(), "notification returned non-success");
        }
        Ok(())
    }

    /// End the upstream session with an HTTP DELETE and drop local state.
    pub async fn delete_session(&self) {
        let session = self.session_id.lock().await.take();
        let Some(session) = session else {
            return;
        };
        let result = self
            .client
            .delete(&self.url)
            .header(MCP_SESSION_HEADER, &session)
            .send()
            .await;
        if let Err(e) = result {
            debug!(url = %self.url, error = %e, "session delete failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_captures_session_header() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/mcp")
            .with_status(200)
            .with_header(MCP_SESSION_HEADER, "sess-1")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#)
            .create_async()
            .await;

        let transport = HttpTransport::new(&format!("{}/mcp", server.url())).unwrap();
        transport.request("initialize", None).await.unwrap();
        assert_eq!(transport.session_id().await.as_deref(), Some("sess-1"));
    }

    #[tokio::test]
    async fn test_request_replays_session_header() {
        let mut server = mockito::Server::new_async().await;
        let init = server
            .mock("POST", "/mcp")
            .with_status(200)
            .with_header(MCP_SESSION_HEADER, "sess-2")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#)
            .create_async()
            .await;

        let transport = HttpTransport::new(&format!("{}/mcp", server.url())).unwrap();
        transport.request("initialize", None).await.unwrap();
        init.assert_async().await;

        let listed = server
            .mock("POST", "/mcp")
            .match_header(MCP_SESSION_HEADER, "sess-2")
            .with_status(200)
            .with_body(r#"{"jsonrpc":"2.0","id":2,"result":{"tools":[]}}"#)
            .create_async()
            .await;
        transport.request("tools/list", None).await.unwrap();
        listed.assert_async().await;
    }

    #[tokio::test]
    async fn test_connection_refused_is_agent_offline() {
        let transport = HttpTransport::new("http://127.0.0.1:1/mcp").unwrap();
        let err = transport.request("ping", None).await.unwrap_err();
        assert!(matches!(err, Error::AgentOffline { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_non_jsonrpc_body_is_protocol_mismatch() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/mcp")
            .with_status(200)
            .with_body("<html>hello</html>")
            .create_async()
            .await;

        let transport = HttpTransport::new(&format!("{}/mcp", server.url())).unwrap();
        let err = transport.request("ping", None).await.unwrap_err();
        assert!(matches!(err, Error::ProtocolMismatch(_)), "{err}");
    }

    #[tokio::test]
    async fn test_jsonrpc_error_surfaces_as_remote() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/mcp")
            .with_status(200)
            .with_body(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"nope"}}"#)
            .create_async()
            .await;

        let transport = HttpTransport::new(&format!("{}/mcp", server.url())).unwrap();
        let err = transport.request("bogus", None).await.unwrap_err();
        match err {
            Error::Remote { code, message } => {
                assert_eq!(code, -32601);
                assert_eq!(message, "nope");
            },
            other => panic!("expected Remote, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_delete_session_sends_delete() {
        let mut server = mockito::Server::new_async().await;
        let _init = server
            .mock("POST", "/mcp")
            .with_status(200)
            .with_header(MCP_SESSION_HEADER, "sess-3")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#)
            .create_async()
            .await;
        let deleted = server
            .mock("DELETE", "/mcp")
            .match_header(MCP_SESSION_HEADER, "sess-3")
            .with_status(204)
            .create_async()
            .await;

        let transport = HttpTransport::new(&format!("{}/mcp", server.url())).unwrap();
        transport.request("initialize", None).await.unwrap();
        transport.delete_session().await;
        deleted.assert_async().await;
        assert!(transport.session_id().await.is_none());
    }
}
