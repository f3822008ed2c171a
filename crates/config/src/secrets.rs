//! Workspace secret store.
//!
//! Secrets live in `.ploinky/.secrets` as `KEY=value` lines. The core only
//! reads them; rotation is owned by the workspace tooling.

use std::{collections::HashMap, path::Path};

use tracing::warn;

/// Side-effect-free variable resolution, consulted during env resolution.
pub trait SecretResolver: Send + Sync {
    fn resolve_var_value(&self, name: &str) -> Option<String>;
}

/// `.ploinky/.secrets` backed resolver. The file is parsed once at load time;
/// callers re-load when they want to observe a rotation.
#[derive(Debug, Clone, Default)]
pub struct FileSecretStore {
    values: HashMap<String, String>,
}

impl FileSecretStore {
    /// Load the store, tolerating a missing file (empty store).
    #[must_use]
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read secrets file");
                return Self::default();
            },
        };
        Self::parse(&raw)
    }

    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let mut values = HashMap::new();
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                values.insert(key.trim().to_string(), value.to_string());
            }
        }
        Self { values }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl SecretResolver for FileSecretStore {
    fn resolve_var_value(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value_lines() {
        let store = FileSecretStore::parse("FOO=bar\n# comment\n\nTOKEN=s3cret=with=eq\n");
        assert_eq!(store.resolve_var_value("FOO").as_deref(), Some("bar"));
        assert_eq!(
            store.resolve_var_value("TOKEN").as_deref(),
            Some("s3cret=with=eq")
        );
        assert_eq!(store.resolve_var_value("MISSING"), None);
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let store = FileSecretStore::load(Path::new("/nonexistent/.secrets"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".secrets");
        std::fs::write(&path, "API_KEY=abc123\n").unwrap();
        let store = FileSecretStore::load(&path);
        assert_eq!(store.resolve_var_value("API_KEY").as_deref(), Some("abc123"));
    }
}
