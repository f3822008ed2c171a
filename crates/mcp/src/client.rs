//! MCP client: one JSON-RPC session per agent base URL.

use {
    serde_json::json,
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result},
    transport::HttpTransport,
    types::{
        ClientCapabilities, ClientInfo, InitializeParams, InitializeResult, PROTOCOL_VERSION,
        ResourcesListResult, ResourcesReadParams, ToolsCallParams, ToolsCallResult,
        ToolsListResult,
    },
};

/// State of an MCP client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpClientState {
    /// Transport built, not yet initialized.
    Connected,
    /// `initialize` completed, `initialized` notification sent.
    Ready,
    /// Session closed.
    Closed,
}

/// An MCP client bound to a single agent base URL.
#[derive(Debug)]
pub struct McpClient {
    base_url: String,
    transport: HttpTransport,
    state: McpClientState,
    server_info: Option<InitializeResult>,
}

impl McpClient {
    /// Perform the MCP handshake (initialize + initialized) against the
    /// agent at `base_url`.
    pub async fn connect(base_url: &str) -> Result<Self> {
        debug!(url = %base_url, "connecting to agent MCP endpoint");
        let transport = HttpTransport::new(base_url)?;

        let mut client = Self {
            base_url: base_url.to_string(),
            transport,
            state: McpClientState::Connected,
            server_info: None,
        };

        if let Err(e) = client.initialize().await {
            warn!(url = %base_url, error = %e, "MCP initialize handshake failed");
            return Err(e);
        }
        Ok(client)
    }

    async fn initialize(&mut self) -> Result<()> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.into(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: "ploinky-router".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
        };

        let resp = self
            .transport
            .request("initialize", Some(serde_json::to_value(&params)?))
            .await?;

        let result: InitializeResult = serde_json::from_value(
            resp.result
                .ok_or_else(|| Error::ProtocolMismatch("initialize returned no result".into()))?,
        )
        .map_err(|e| Error::ProtocolMismatch(format!("bad initialize result: {e}")))?;

        info!(
            url = %self.base_url,
            protocol = %result.protocol_version,
            server = %result.server_info.name,
            "agent MCP session established"
        );

        self.server_info = Some(result);
        self.transport
            .notify("notifications/initialized", None)
            .await?;
        self.state = McpClientState::Ready;
        Ok(())
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.state != McpClientState::Ready {
            return Err(Error::Message {
                message: format!(
                    "MCP client for '{}' is not ready (state: {:?})",
                    self.base_url, self.state
                ),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn state(&self) -> McpClientState {
        self.state
    }

    #[must_use]
    pub fn server_info(&self) -> Option<&InitializeResult> {
        self.server_info.as_ref()
    }

    pub async fn list_tools(&self) -> Result<ToolsListResult> {
        self.ensure_ready()?;
        let resp = self.transport.request("tools/list", None).await?;
        let result: ToolsListResult = serde_json::from_value(
            resp.result
                .ok_or_else(|| Error::ProtocolMismatch("tools/list returned no result".into()))?,
        )
        .map_err(|e| Error::ProtocolMismatch(format!("bad tools/list result: {e}")))?;
        debug!(url = %self.base_url, count = result.tools.len(), "fetched agent tools");
        Ok(result)
    }

    pub async fn list_resources(&self) -> Result<ResourcesListResult> {
        self.ensure_ready()?;
        let resp = self.transport.request("resources/list", None).await?;
        let result: ResourcesListResult = serde_json::from_value(
            resp.result.ok_or_else(|| {
                Error::ProtocolMismatch("resources/list returned no result".into())
            })?,
        )
        .map_err(|e| Error::ProtocolMismatch(format!("bad resources/list result: {e}")))?;
        Ok(result)
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolsCallResult> {
        self.ensure_ready()?;
        let params = ToolsCallParams {
            name: name.into(),
            arguments,
        };
        let resp = self
            .transport
            .request("tools/call", Some(serde_json::to_value(&params)?))
            .await?;
        serde_json::from_value(
            resp.result
                .ok_or_else(|| Error::ProtocolMismatch("tools/call returned no result".into()))?,
        )
        .map_err(|e| Error::ProtocolMismatch(format!("bad tools/call result: {e}")))
    }

    /// Read a resource; the contents shape is agent-defined, so the raw
    /// result value is returned.
    pub async fn read_resource(&self, uri: &str) -> Result<serde_json::Value> {
        self.ensure_ready()?;
        let params = ResourcesReadParams { uri: uri.into() };
        let resp = self
            .transport
            .request("resources/read", Some(serde_json::to_value(&params)?))
            .await?;
        resp.result
            .ok_or_else(|| Error::ProtocolMismatch("resources/read returned no result".into()))
    }

    pub async fn ping(&self) -> Result<()> {
        self.ensure_ready()?;
        self.transport.request("ping", Some(json!({}))).await?;
        Ok(())
    }

    /// Forward an arbitrary method, returning the raw result value. Used by
    /// the per-agent proxy plane.
    pub async fn raw_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        self.ensure_ready()?;
        let resp = self.transport.request(method, params).await?;
        Ok(resp.result.unwrap_or(serde_json::Value::Null))
    }

    /// End the session: DELETE upstream, drop local state.
    pub async fn close(&mut self) {
        self.transport.delete_session().await;
        self.state = McpClientState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MCP_SESSION_HEADER;

    fn init_body() -> String {
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {"tools": {"listChanged": false}},
                "serverInfo": {"name": "demo-agent", "version": "0.1.0"}
            }
        })
        .to_string()
    }

    async fn connected_client(server: &mut mockito::Server) -> McpClient {
        let _init = server
            .mock("POST", "/mcp")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"method":"initialize"}"#.into(),
            ))
            .with_status(200)
            .with_header(MCP_SESSION_HEADER, "sess-t")
            .with_body(init_body())
            .create_async()
            .await;
        let _notif = server
            .mock("POST", "/mcp")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"method":"notifications/initialized"}"#.into(),
            ))
            .with_status(204)
            .create_async()
            .await;
        McpClient::connect(&format!("{}/mcp", server.url()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_connect_handshake() {
        let mut server = mockito::Server::new_async().await;
        let client = connected_client(&mut server).await;
        assert_eq!(client.state(), McpClientState::Ready);
        assert_eq!(client.server_info().unwrap().server_info.name, "demo-agent");
    }

    #[tokio::test]
    async fn test_connect_offline_agent_fails() {
        let err = McpClient::connect("http://127.0.0.1:1/mcp").await.unwrap_err();
        assert!(matches!(err, Error::AgentOffline { .. }));
    }

    #[tokio::test]
    async fn test_list_tools() {
        let mut server = mockito::Server::new_async().await;
        let client = connected_client(&mut server).await;

        let _tools = server
            .mock("POST", "/mcp")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"method":"tools/list"}"#.into(),
            ))
            .with_status(200)
            .with_body(
                r#"{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"toolA","inputSchema":{}}]}}"#,
            )
            .create_async()
            .await;

        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.tools.len(), 1);
        assert_eq!(tools.tools[0].name, "toolA");
    }

    #[tokio::test]
    async fn test_call_tool_roundtrip() {
        let mut server = mockito::Server::new_async().await;
        let client = connected_client(&mut server).await;

        let _call = server
            .mock("POST", "/mcp")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"method":"tools/call","params":{"name":"toolA"}}"#.into(),
            ))
            .with_status(200)
            .with_body(
                r#"{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"done"}]}}"#,
            )
            .create_async()
            .await;

        let result = client.call_tool("toolA", json!({"x": 1})).await.unwrap();
        assert!(!result.is_error);
        assert_eq!(result.content.len(), 1);
    }

    #[tokio::test]
    async fn test_operations_require_ready_state() {
        let mut server = mockito::Server::new_async().await;
        let mut client = connected_client(&mut server).await;

        let _del = server.mock("DELETE", "/mcp").with_status(204).create_async().await;
        client.close().await;
        assert_eq!(client.state(), McpClientState::Closed);
        assert!(client.list_tools().await.is_err());
        assert!(client.ping().await.is_err());
    }
}
