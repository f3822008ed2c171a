//! The routing table (`routing.json`): agent name → host port, plus the
//! router's own listen port.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use {
    ploinky_common::NoteExt,
    serde::{Deserialize, Serialize},
    tracing::debug,
};

use crate::{
    agents::write_atomic,
    error::{Error, Result},
};

pub const DEFAULT_ROUTER_PORT: u16 = 8080;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteEntry {
    pub host_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
}

impl RouteEntry {
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.host_port != 0 && !self.disabled.unwrap_or(false)
    }

    /// The upstream MCP endpoint for this route.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}/mcp", self.host_port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingTable {
    pub port: u16,
    #[serde(default)]
    pub routes: BTreeMap<String, RouteEntry>,
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self {
            port: DEFAULT_ROUTER_PORT,
            routes: BTreeMap::new(),
            path: None,
        }
    }
}

impl RoutingTable {
    /// Load from `routing.json`, or return empty if the file doesn't exist.
    /// Existing entries are never dropped on load-modify-save cycles.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "routing table not found, using empty");
            return Ok(Self {
                path: Some(path.to_path_buf()),
                ..Default::default()
            });
        }
        let data = std::fs::read_to_string(path)?;
        let mut table: Self = serde_json::from_str(&data)?;
        table.path = Some(path.to_path_buf());
        Ok(table)
    }

    pub fn save(&self) -> Result<()> {
        let path = self
            .path
            .as_ref()
            .note::<Error>("no path set for routing table")?;
        let data = serde_json::to_string_pretty(self)?;
        write_atomic(path, &data)?;
        debug!(path = %path.display(), routes = self.routes.len(), "saved routing table");
        Ok(())
    }

    /// Upsert a route, preserving a pre-existing `disabled` flag.
    pub fn set_route(
        &mut self,
        agent: &str,
        host_port: u16,
        container_name: Option<String>,
    ) -> Result<()> {
        let disabled = self.routes.get(agent).and_then(|r| r.disabled);
        self.routes.insert(agent.to_string(), RouteEntry {
            host_port,
            disabled,
            container_name,
        });
        self.save()
    }

    pub fn remove_route(&mut self, agent: &str) -> Result<bool> {
        let removed = self.routes.remove(agent).is_some();
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    pub fn set_disabled(&mut self, agent: &str, disabled: bool) -> Result<bool> {
        if let Some(entry) = self.routes.get_mut(agent) {
            entry.disabled = if disabled { Some(true) } else { None };
            self.save()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Routes eligible for aggregation: not disabled, with a usable port.
    #[must_use]
    pub fn enabled_routes(&self) -> Vec<(&str, &RouteEntry)> {
        self.routes
            .iter()
            .filter(|(_, entry)| entry.is_enabled())
            .map(|(name, entry)| (name.as_str(), entry))
            .collect()
    }

    pub fn get(&self, agent: &str) -> Option<&RouteEntry> {
        self.routes.get(agent)
    }
}
