use ploinky_common::Noted;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The agent's port is not accepting connections.
    #[error("agent at {url} is offline: {reason}")]
    AgentOffline { url: String, reason: String },
    /// The agent answered, but not with MCP JSON-RPC.
    #[error("agent response is not MCP JSON-RPC: {0}")]
    ProtocolMismatch(String),
    /// A well-formed JSON-RPC error from the agent.
    #[error("agent returned JSON-RPC error {code}: {message}")]
    Remote { code: i64, message: String },
    #[error("{message}")]
    Message { message: String },
    #[error("failed to serialize request params: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl Noted for Error {
    fn noted(note: String) -> Self {
        Self::Message { message: note }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
