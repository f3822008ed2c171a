//! `.ploinky/` workspace layout.
//!
//! Every persisted file and the deterministic container-name suffix derive
//! from the absolute workspace path, so two checkouts of the same project in
//! different directories never collide.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Resolved filesystem layout for one workspace.
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    root: PathBuf,
}

impl WorkspacePaths {
    /// Build the layout from the workspace root. The root is made absolute so
    /// the derived hash is stable no matter where the process was launched.
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        let root = if root.is_absolute() {
            root
        } else {
            std::env::current_dir()?.join(root)
        };
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn dot_dir(&self) -> PathBuf {
        self.root.join(".ploinky")
    }

    #[must_use]
    pub fn agents_json(&self) -> PathBuf {
        self.dot_dir().join("agents.json")
    }

    #[must_use]
    pub fn routing_json(&self) -> PathBuf {
        self.dot_dir().join("routing.json")
    }

    #[must_use]
    pub fn config_json(&self) -> PathBuf {
        self.dot_dir().join("config.json")
    }

    #[must_use]
    pub fn secrets_file(&self) -> PathBuf {
        self.dot_dir().join(".secrets")
    }

    #[must_use]
    pub fn enabled_repos_json(&self) -> PathBuf {
        self.dot_dir().join("enabled_repos.json")
    }

    #[must_use]
    pub fn locks_dir(&self) -> PathBuf {
        self.dot_dir().join("locks")
    }

    #[must_use]
    pub fn running_agents_dir(&self) -> PathBuf {
        self.dot_dir().join("running_agents")
    }

    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    #[must_use]
    pub fn router_log(&self) -> PathBuf {
        self.logs_dir().join("router.log")
    }

    #[must_use]
    pub fn watchdog_log(&self) -> PathBuf {
        self.logs_dir().join("watchdog.log")
    }

    /// Last path component of the workspace root, used inside container names.
    #[must_use]
    pub fn project_dir_name(&self) -> String {
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "workspace".into())
    }

    /// First 8 hex chars of the SHA-256 of the absolute workspace path.
    #[must_use]
    pub fn cwd_hash8(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.root.to_string_lossy().as_bytes());
        let hex = format!("{:x}", hasher.finalize());
        hex[..8].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_is_rooted_in_dot_dir() {
        let paths = WorkspacePaths::new("/work/demo").unwrap();
        assert_eq!(paths.agents_json(), PathBuf::from("/work/demo/.ploinky/agents.json"));
        assert_eq!(paths.routing_json(), PathBuf::from("/work/demo/.ploinky/routing.json"));
        assert_eq!(paths.locks_dir(), PathBuf::from("/work/demo/.ploinky/locks"));
        assert_eq!(paths.router_log(), PathBuf::from("/work/demo/logs/router.log"));
    }

    #[test]
    fn test_cwd_hash8_is_stable_and_short() {
        let a = WorkspacePaths::new("/work/demo").unwrap();
        let b = WorkspacePaths::new("/work/demo").unwrap();
        assert_eq!(a.cwd_hash8(), b.cwd_hash8());
        assert_eq!(a.cwd_hash8().len(), 8);
        assert!(a.cwd_hash8().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_cwd_hash8_differs_per_workspace() {
        let a = WorkspacePaths::new("/work/demo").unwrap();
        let b = WorkspacePaths::new("/work/other").unwrap();
        assert_ne!(a.cwd_hash8(), b.cwd_hash8());
    }

    #[test]
    fn test_project_dir_name() {
        let paths = WorkspacePaths::new("/work/my-project").unwrap();
        assert_eq!(paths.project_dir_name(), "my-project");
    }
}
