//! Workspace-wide configuration (`.ploinky/config.json`) and the enabled
//! repository list. Both are inputs: the core reads them and never writes.

use std::path::Path;

use {
    serde::{Deserialize, Serialize},
    tracing::warn,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SsoConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfilesConfig {
    /// Active profile name applied when resolving agent env.
    pub active: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default)]
    pub sso: SsoConfig,
    #[serde(default)]
    pub profiles: ProfilesConfig,
}

impl WorkspaceConfig {
    /// Load from `config.json`, falling back to defaults when the file is
    /// absent or unparseable.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read workspace config, using defaults");
                return Self::default();
            },
        };
        match serde_json::from_str(&raw) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to parse workspace config, using defaults");
                Self::default()
            },
        }
    }
}

/// Load `.ploinky/enabled_repos.json` (a JSON list of repo names).
#[must_use]
pub fn load_enabled_repos(path: &Path) -> Vec<String> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return vec![],
    };
    match serde_json::from_str(&raw) {
        Ok(repos) => repos,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to parse enabled repos list");
            vec![]
        },
    }
}
