//! Workspace assembly: manifests on disk, the agent manager, and shared
//! lookups the commands build on.

use std::{path::PathBuf, sync::Arc};

use tracing::warn;

use {
    ploinky_agents::{AgentManager, ManagerOptions},
    ploinky_config::{
        FileSecretStore, Manifest, WorkspaceConfig, WorkspacePaths, env::ManifestProfiles,
        load_enabled_repos,
    },
    ploinky_runtime::ContainerDriver,
};

/// Repos considered active: the enabled list when present, otherwise every
/// repo directory on disk.
pub fn active_repos(paths: &WorkspacePaths) -> Vec<String> {
    let enabled = load_enabled_repos(&paths.enabled_repos_json());
    if !enabled.is_empty() {
        return enabled;
    }

    let repos_dir = paths.dot_dir().join("repos");
    let Ok(entries) = std::fs::read_dir(&repos_dir) else {
        return vec![];
    };
    let mut repos: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    repos.sort();
    repos
}

/// All `(repo, manifest)` pairs found under `.ploinky/repos/`.
pub fn discover_manifests(paths: &WorkspacePaths) -> Vec<(String, Manifest)> {
    let mut found = Vec::new();
    for repo in active_repos(paths) {
        let repo_dir = paths.dot_dir().join("repos").join(&repo);
        let Ok(entries) = std::fs::read_dir(&repo_dir) else {
            continue;
        };
        let mut agent_dirs: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        agent_dirs.sort();

        for agent_dir in agent_dirs {
            let manifest_path = agent_dir.join("manifest.json");
            let Ok(raw) = std::fs::read_to_string(&manifest_path) else {
                continue;
            };
            match Manifest::from_json(&raw) {
                Ok(manifest) => found.push((repo.clone(), manifest)),
                Err(e) => {
                    warn!(path = %manifest_path.display(), error = %e, "skipping invalid manifest");
                },
            }
        }
    }
    found
}

/// Locate an agent's manifest by agent name across active repos.
pub fn find_manifest(paths: &WorkspacePaths, agent: &str) -> Option<(String, Manifest)> {
    discover_manifests(paths)
        .into_iter()
        .find(|(_, m)| m.name == agent)
}

/// Build the agent manager for this workspace.
pub fn build_manager(
    paths: &WorkspacePaths,
    driver: ContainerDriver,
) -> Arc<AgentManager> {
    let config = WorkspaceConfig::load(&paths.config_json());
    let secrets = FileSecretStore::load(&paths.secrets_file());
    let manifests = discover_manifests(paths)
        .into_iter()
        .map(|(_, m)| m)
        .collect();
    let profiles = ManifestProfiles::new(config.profiles.active, manifests);

    Arc::new(AgentManager::new(
        driver,
        paths.clone(),
        Arc::new(secrets),
        Arc::new(profiles),
        ManagerOptions::from_env(),
    ))
}

/// The supervisor PID file: env override, else `.ploinky/router.pid`.
pub fn pid_file(paths: &WorkspacePaths) -> PathBuf {
    std::env::var("PLOINKY_ROUTER_PID_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| paths.dot_dir().join("router.pid"))
}

/// Read the supervisor PID if one is recorded.
pub fn read_pid(paths: &WorkspacePaths) -> Option<i32> {
    let raw = std::fs::read_to_string(pid_file(paths)).ok()?;
    raw.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_agent(paths: &WorkspacePaths, repo: &str, agent: &str, manifest: &str) {
        let dir = paths.dot_dir().join("repos").join(repo).join(agent);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("manifest.json"), manifest).unwrap();
    }

    #[test]
    fn test_discover_manifests_scans_repos() {
        let dir = tempfile::tempdir().unwrap();
        let paths = WorkspacePaths::new(dir.path()).unwrap();
        seed_agent(&paths, "basic", "demo", r#"{"name":"demo","container":"alpine"}"#);
        seed_agent(&paths, "basic", "broken", "{not json");
        seed_agent(&paths, "extra", "other", r#"{"name":"other","container":"alpine"}"#);

        let found = discover_manifests(&paths);
        assert_eq!(found.len(), 2);
        assert!(found.iter().any(|(r, m)| r == "basic" && m.name == "demo"));
        assert!(found.iter().any(|(r, m)| r == "extra" && m.name == "other"));
    }

    #[test]
    fn test_enabled_repos_filter() {
        let dir = tempfile::tempdir().unwrap();
        let paths = WorkspacePaths::new(dir.path()).unwrap();
        seed_agent(&paths, "basic", "demo", r#"{"name":"demo","container":"alpine"}"#);
        seed_agent(&paths, "extra", "other", r#"{"name":"other","container":"alpine"}"#);
        std::fs::write(paths.enabled_repos_json(), r#"["basic"]"#).unwrap();

        let found = discover_manifests(&paths);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1.name, "demo");
    }

    #[test]
    fn test_find_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let paths = WorkspacePaths::new(dir.path()).unwrap();
        seed_agent(&paths, "basic", "demo", r#"{"name":"demo","container":"alpine"}"#);

        let (repo, manifest) = find_manifest(&paths, "demo").unwrap();
        assert_eq!(repo, "basic");
        assert_eq!(manifest.container, "alpine");
        assert!(find_manifest(&paths, "ghost").is_none());
    }
}
