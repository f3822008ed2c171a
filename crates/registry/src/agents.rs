//! The agent registry (`agents.json`), keyed by container name.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use {
    ploinky_common::NoteExt,
    serde::{Deserialize, Serialize},
    tracing::{debug, info},
};

use crate::{
    error::{Error, Result},
    names::CONTAINER_PREFIX,
    record::AgentRecord,
};

/// Atomic JSON write: temp file in the same directory, then rename.
pub(crate) fn write_atomic(path: &Path, data: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentRegistry {
    #[serde(flatten)]
    pub records: BTreeMap<String, AgentRecord>,
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl AgentRegistry {
    /// Load from `agents.json`, or return empty if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "agent registry not found, using empty");
            return Ok(Self {
                path: Some(path.to_path_buf()),
                ..Default::default()
            });
        }
        let data = std::fs::read_to_string(path)?;
        let mut registry: Self = serde_json::from_str(&data)?;
        registry.path = Some(path.to_path_buf());
        Ok(registry)
    }

    /// Save to the registry file (atomic).
    pub fn save(&self) -> Result<()> {
        let path = self
            .path
            .as_ref()
            .note::<Error>("no path set for agent registry")?;
        let data = serde_json::to_string_pretty(&self.records)?;
        write_atomic(path, &data)?;
        debug!(path = %path.display(), records = self.records.len(), "saved agent registry");
        Ok(())
    }

    pub fn get(&self, container_name: &str) -> Option<&AgentRecord> {
        self.records.get(container_name)
    }

    /// Find the record (and container name) for an agent by its agent name
    /// or alias.
    pub fn by_agent(&self, agent: &str) -> Option<(&String, &AgentRecord)> {
        self.records
            .iter()
            .find(|(_, r)| r.agent_name == agent || r.alias.as_deref() == Some(agent))
    }

    /// Insert or replace a record and persist.
    pub fn upsert(&mut self, container_name: String, record: AgentRecord) -> Result<()> {
        info!(container = %container_name, agent = %record.agent_name, "recording agent");
        self.records.insert(container_name, record);
        self.save()
    }

    /// Remove a record and persist. Returns whether it existed.
    pub fn remove(&mut self, container_name: &str) -> Result<bool> {
        let removed = self.records.remove(container_name).is_some();
        if removed {
            info!(container = %container_name, "removed agent record");
            self.save()?;
        }
        Ok(removed)
    }

    /// All recorded container names. Every live `ploinky_` container without
    /// a record here is foreign and left alone outside destroy-all.
    #[must_use]
    pub fn container_names(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    /// Whether a container name belongs to the control plane's namespace.
    #[must_use]
    pub fn is_ploinky_name(name: &str) -> bool {
        name.starts_with(CONTAINER_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{AgentKind, ContainerConfig, RunMode};

    fn record(agent: &str) -> AgentRecord {
        AgentRecord {
            agent_name: agent.into(),
            repo_name: "basic".into(),
            alias: None,
            container_image: "alpine".into(),
            created_at: "2026-01-01T00:00:00Z".into(),
            project_path: "/work/demo".into(),
            run_mode: RunMode::Free,
            kind: AgentKind::Agent,
            config: ContainerConfig::default(),
            webchat_setup_output: None,
            webchat_setup_at: None,
        }
    }

    #[test]
    fn test_load_nonexistent_returns_empty() {
        let reg = AgentRegistry::load(Path::new("/nonexistent/agents.json")).unwrap();
        assert!(reg.records.is_empty());
    }

    #[test]
    fn test_upsert_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".ploinky").join("agents.json");

        let mut reg = AgentRegistry::load(&path).unwrap();
        reg.upsert("ploinky_basic_demo_demo_abcd1234".into(), record("demo"))
            .unwrap();

        let loaded = AgentRegistry::load(&path).unwrap();
        assert_eq!(loaded.records.len(), 1);
        let (_, rec) = loaded.by_agent("demo").unwrap();
        assert_eq!(rec.container_image, "alpine");
    }

    #[test]
    fn test_persisted_shape_is_a_flat_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agents.json");
        let mut reg = AgentRegistry::load(&path).unwrap();
        reg.upsert("ploinky_x".into(), record("demo")).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["ploinky_x"]["agentName"], "demo");
    }

    #[test]
    fn test_by_agent_matches_alias() {
        let mut reg = AgentRegistry::default();
        let mut rec = record("demo");
        rec.alias = Some("d".into());
        reg.records.insert("c1".into(), rec);
        assert!(reg.by_agent("d").is_some());
        assert!(reg.by_agent("demo").is_some());
        assert!(reg.by_agent("nope").is_none());
    }

    #[test]
    fn test_remove_missing_is_false() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = AgentRegistry::load(&dir.path().join("agents.json")).unwrap();
        assert!(!reg.remove("ghost").unwrap());
    }

    #[test]
    fn test_prefix_check() {
        assert!(AgentRegistry::is_ploinky_name("ploinky_a_b_c_d"));
        assert!(!AgentRegistry::is_ploinky_name("random"));
    }
}
