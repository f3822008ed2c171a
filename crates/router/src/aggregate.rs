//! Aggregation fan-out across live agents.
//!
//! Every aggregated call opens a short-lived MCP client per agent, performs
//! one operation and closes the client again, on the error path too, so
//! upstream sessions never leak. One agent failing yields a partial result
//! plus a summarized error entry, never a request failure.

use {futures::future::join_all, serde_json::json, tracing::warn};

use {
    ploinky_mcp::{Error as McpError, McpClient, McpToolDef, ResourceDef},
    ploinky_registry::RoutingTable,
};

#[derive(Debug, Clone, serde::Serialize)]
pub struct AgentFailure {
    pub agent: String,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct AggregatedTools {
    pub tools: Vec<McpToolDef>,
    pub errors: Vec<AgentFailure>,
    pub empty_agents: Vec<String>,
}

#[derive(Debug, Default)]
pub struct AggregatedResources {
    /// Resource paired with the agent exposing it.
    pub resources: Vec<(String, ResourceDef)>,
    pub errors: Vec<AgentFailure>,
}

/// Where a `tools/call` / `resources/read` should land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Unique { agent: String, base_url: String },
    Ambiguous { agents: Vec<String> },
    NotFound,
}

/// Summaries shown to clients; raw upstream errors stay in the logs.
#[must_use]
pub fn summarize(error: &McpError) -> String {
    match error {
        McpError::AgentOffline { .. } => "agent offline".into(),
        McpError::ProtocolMismatch(_) => "agent response is not MCP JSON-RPC".into(),
        McpError::Remote { code, message } => format!("agent error {code}: {message}"),
        McpError::Message { message } => message.clone(),
        McpError::Serialize(_) => "failed to serialize request params".into(),
    }
}

/// Tag a tool with the agent that owns it, merging into any pre-existing
/// annotations.
#[must_use]
pub fn annotate_tool(mut tool: McpToolDef, agent: &str) -> McpToolDef {
    let mut annotations = match tool.annotations.take() {
        Some(serde_json::Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };
    let router = annotations
        .entry("router")
        .or_insert_with(|| json!({}));
    if let serde_json::Value::Object(router) = router {
        router.insert("agent".into(), json!(agent));
    } else {
        *router = json!({ "agent": agent });
    }
    tool.annotations = Some(serde_json::Value::Object(annotations));
    tool
}

async fn tools_of(agent: String, base_url: String) -> (String, Result<Vec<McpToolDef>, McpError>) {
    let result = async {
        let mut client = McpClient::connect(&base_url).await?;
        let listed = client.list_tools().await;
        client.close().await;
        listed.map(|r| r.tools)
    }
    .await;
    (agent, result)
}

async fn resources_of(
    agent: String,
    base_url: String,
) -> (String, Result<Vec<ResourceDef>, McpError>) {
    let result = async {
        let mut client = McpClient::connect(&base_url).await?;
        let listed = client.list_resources().await;
        client.close().await;
        listed.map(|r| r.resources)
    }
    .await;
    (agent, result)
}

/// Fan `tools/list` across every enabled route in parallel.
pub async fn list_all_tools(table: &RoutingTable) -> AggregatedTools {
    let futures: Vec<_> = table
        .enabled_routes()
        .into_iter()
        .map(|(agent, entry)| tools_of(agent.to_string(), entry.base_url()))
        .collect();

    let mut aggregated = AggregatedTools::default();
    for (agent, result) in join_all(futures).await {
        match result {
            Ok(tools) => {
                if tools.is_empty() {
                    aggregated.empty_agents.push(agent.clone());
                }
                aggregated
                    .tools
                    .extend(tools.into_iter().map(|t| annotate_tool(t, &agent)));
            },
            Err(e) => {
                warn!(agent = %agent, error = %e, "tools/list failed for agent");
                aggregated.errors.push(AgentFailure {
                    agent,
                    error: summarize(&e),
                });
            },
        }
    }
    aggregated
}

/// Fan `resources/list` across every enabled route in parallel.
pub async fn list_all_resources(table: &RoutingTable) -> AggregatedResources {
    let futures: Vec<_> = table
        .enabled_routes()
        .into_iter()
        .map(|(agent, entry)| resources_of(agent.to_string(), entry.base_url()))
        .collect();

    let mut aggregated = AggregatedResources::default();
    for (agent, result) in join_all(futures).await {
        match result {
            Ok(resources) => {
                aggregated
                    .resources
                    .extend(resources.into_iter().map(|r| (agent.clone(), r)));
            },
            Err(e) => {
                warn!(agent = %agent, error = %e, "resources/list failed for agent");
                aggregated.errors.push(AgentFailure {
                    agent,
                    error: summarize(&e),
                });
            },
        }
    }
    aggregated
}

/// Route a tool call: an explicit agent always wins, else the tool must have
/// exactly one exposer.
pub async fn resolve_tool(
    table: &RoutingTable,
    tool_name: &str,
    explicit_agent: Option<&str>,
) -> Resolution {
    if let Some(agent) = explicit_agent {
        return match table.get(agent).filter(|e| e.is_enabled()) {
            Some(entry) => Resolution::Unique {
                agent: agent.to_string(),
                base_url: entry.base_url(),
            },
            None => Resolution::NotFound,
        };
    }

    let aggregated = list_all_tools(table).await;
    let mut exposers: Vec<String> = Vec::new();
    for tool in &aggregated.tools {
        if tool.name == tool_name
            && let Some(agent) = tool
                .annotations
                .as_ref()
                .and_then(|a| a["router"]["agent"].as_str())
            && !exposers.iter().any(|e| e == agent)
        {
            exposers.push(agent.to_string());
        }
    }

    match exposers.as_slice() {
        [] => Resolution::NotFound,
        [agent] => match table.get(agent) {
            Some(entry) => Resolution::Unique {
                agent: agent.clone(),
                base_url: entry.base_url(),
            },
            None => Resolution::NotFound,
        },
        _ => Resolution::Ambiguous { agents: exposers },
    }
}

/// Route a resource read by URI: exactly one agent must expose it.
pub async fn resolve_resource(table: &RoutingTable, uri: &str) -> Resolution {
    let aggregated = list_all_resources(table).await;
    let mut exposers: Vec<String> = Vec::new();
    for (agent, resource) in &aggregated.resources {
        if resource.uri == uri && !exposers.iter().any(|e| e == agent) {
            exposers.push(agent.clone());
        }
    }

    match exposers.as_slice() {
        [] => Resolution::NotFound,
        [agent] => match table.get(agent) {
            Some(entry) => Resolution::Unique {
                agent: agent.clone(),
                base_url: entry.base_url(),
            },
            None => Resolution::NotFound,
        },
        _ => Resolution::Ambiguous { agents: exposers },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str, annotations: Option<serde_json::Value>) -> McpToolDef {
        McpToolDef {
            name: name.into(),
            description: None,
            input_schema: json!({}),
            annotations,
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_annotate_tool_fresh() {
        let annotated = annotate_tool(tool("t", None), "demo");
        assert_eq!(
            annotated.annotations.unwrap()["router"]["agent"],
            "demo"
        );
    }

    #[test]
    fn test_annotate_tool_merges_existing() {
        let existing = json!({"audience": ["user"], "router": {"weight": 2}});
        let annotated = annotate_tool(tool("t", Some(existing)), "demo");
        let ann = annotated.annotations.unwrap();
        // Pre-existing keys survive the merge.
        assert_eq!(ann["audience"][0], "user");
        assert_eq!(ann["router"]["weight"], 2);
        assert_eq!(ann["router"]["agent"], "demo");
    }

    #[test]
    fn test_summarize_never_leaks_raw_errors() {
        let offline = McpError::AgentOffline {
            url: "http://127.0.0.1:1/mcp".into(),
            reason: "connect ECONNREFUSED with stack trace".into(),
        };
        assert_eq!(summarize(&offline), "agent offline");

        let mismatch = McpError::ProtocolMismatch("<html>giant body</html>".into());
        assert_eq!(summarize(&mismatch), "agent response is not MCP JSON-RPC");
    }

    #[tokio::test]
    async fn test_resolve_tool_explicit_agent_unknown() {
        let table = RoutingTable::default();
        let resolution = resolve_tool(&table, "toolA", Some("ghost")).await;
        assert_eq!(resolution, Resolution::NotFound);
    }

    #[tokio::test]
    async fn test_list_all_tools_empty_table() {
        let table = RoutingTable::default();
        let aggregated = list_all_tools(&table).await;
        assert!(aggregated.tools.is_empty());
        assert!(aggregated.errors.is_empty());
    }
}
