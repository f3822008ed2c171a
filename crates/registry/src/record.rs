//! Persisted agent records. Field names are camelCase on disk; the JSON is a
//! wire contract shared with workspace tooling.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Isolated,
    #[default]
    Free,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum AgentKind {
    #[default]
    Agent,
    AgentCore,
    Interactive,
}

impl AgentKind {
    /// Kinds the container monitor keeps alive.
    #[must_use]
    pub fn is_monitored(&self) -> bool {
        matches!(self, Self::Agent | Self::AgentCore)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindConfig {
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ro: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvConfig {
    pub name: String,
    /// Omitted when the value comes from the workspace secret store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortConfig {
    pub container_port: u16,
    pub host_port: u16,
    pub host_ip: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    #[serde(default)]
    pub binds: Vec<BindConfig>,
    #[serde(default)]
    pub env: Vec<EnvConfig>,
    #[serde(default)]
    pub ports: Vec<PortConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    pub agent_name: String,
    pub repo_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub container_image: String,
    /// ISO-8601 creation timestamp.
    pub created_at: String,
    pub project_path: String,
    #[serde(default)]
    pub run_mode: RunMode,
    #[serde(rename = "type", default)]
    pub kind: AgentKind,
    #[serde(default)]
    pub config: ContainerConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webchat_setup_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webchat_setup_at: Option<String>,
}

impl AgentRecord {
    /// The recorded host port for `container_port`, or the first recorded
    /// mapping when no exact match exists.
    #[must_use]
    pub fn host_port_for(&self, container_port: u16) -> Option<u16> {
        self.config
            .ports
            .iter()
            .find(|p| p.container_port == container_port)
            .or_else(|| self.config.ports.first())
            .map(|p| p.host_port)
    }
}
