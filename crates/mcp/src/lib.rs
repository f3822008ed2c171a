//! MCP client: JSON-RPC 2.0 over streamable HTTP, one session per agent
//! base URL.

pub mod client;
pub mod error;
pub mod transport;
pub mod types;

pub use {
    client::{McpClient, McpClientState},
    error::{Error, Result},
    transport::HttpTransport,
    types::{
        InitializeResult, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
        MCP_SESSION_HEADER, McpToolDef, PROTOCOL_VERSION, ResourceDef, ResourcesListResult,
        ServerInfo, ToolContent, ToolsCallResult, ToolsListResult,
    },
};
