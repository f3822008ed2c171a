//! Effective environment resolution and the canonical env hash.
//!
//! The hash is the drift detector for container recreation: it covers the
//! manifest env, the active profile overlay, and the resolved secret values,
//! serialized as canonical JSON (keys sorted). Rotating a secret therefore
//! changes the hash and forces recreation on the next ensure.

use std::collections::BTreeMap;

use {
    sha2::{Digest, Sha256},
    tracing::debug,
};

use crate::{
    manifest::{Manifest, ProfileConfig},
    secrets::SecretResolver,
};

/// Side-effect-free profile lookup, consulted during env resolution.
pub trait ProfileService: Send + Sync {
    /// Name of the currently active profile, if any.
    fn get_active_profile(&self) -> Option<String>;

    /// Profile overlay for the given agent, if declared.
    fn get_profile_config(&self, agent: &str, profile: &str) -> Option<ProfileConfig>;
}

/// Profiles as declared inside the manifests themselves, activated by the
/// workspace config.
pub struct ManifestProfiles {
    active: Option<String>,
    manifests: Vec<Manifest>,
}

impl ManifestProfiles {
    #[must_use]
    pub fn new(active: Option<String>, manifests: Vec<Manifest>) -> Self {
        Self { active, manifests }
    }
}

impl ProfileService for ManifestProfiles {
    fn get_active_profile(&self) -> Option<String> {
        self.active.clone()
    }

    fn get_profile_config(&self, agent: &str, profile: &str) -> Option<ProfileConfig> {
        self.manifests
            .iter()
            .find(|m| m.name == agent)
            .and_then(|m| m.profiles.get(profile))
            .cloned()
    }
}

/// Resolve the effective env map for an agent: manifest declarations, then
/// the profile overlay (by name), then secret injection for bare names.
/// Names that resolve to nothing are dropped.
#[must_use]
pub fn effective_env(
    manifest: &Manifest,
    profile: Option<&ProfileConfig>,
    secrets: &dyn SecretResolver,
) -> BTreeMap<String, String> {
    let mut decls: BTreeMap<String, Option<String>> = BTreeMap::new();
    for decl in &manifest.env {
        decls.insert(decl.name.clone(), decl.value.clone());
    }
    if let Some(profile) = profile {
        for decl in &profile.env {
            decls.insert(decl.name.clone(), decl.value.clone());
        }
    }

    let mut env = BTreeMap::new();
    for (name, value) in decls {
        match value {
            Some(literal) => {
                env.insert(name, literal);
            },
            None => match secrets.resolve_var_value(&name) {
                Some(resolved) => {
                    env.insert(name, resolved);
                },
                None => {
                    debug!(var = %name, "declared env var has no value, skipping");
                },
            },
        }
    }
    env
}

/// Canonical SHA-256 over the env map. `BTreeMap` keeps keys sorted, so the
/// JSON encoding is order-independent by construction.
#[must_use]
pub fn env_hash(env: &BTreeMap<String, String>) -> String {
    let canonical = serde_json::to_string(env).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{EnvDecl, RawManifest};

    struct MapSecrets(BTreeMap<String, String>);

    impl SecretResolver for MapSecrets {
        fn resolve_var_value(&self, name: &str) -> Option<String> {
            self.0.get(name).cloned()
        }
    }

    fn manifest_with_env(env: &[&str]) -> Manifest {
        RawManifest {
            name: "demo".into(),
            container: "alpine".into(),
            env: env.iter().map(|s| (*s).to_string()).collect(),
            ..Default::default()
        }
        .validate()
        .unwrap()
    }

    fn no_secrets() -> MapSecrets {
        MapSecrets(BTreeMap::new())
    }

    #[test]
    fn test_effective_env_literals() {
        let m = manifest_with_env(&["A=1", "B=2"]);
        let env = effective_env(&m, None, &no_secrets());
        assert_eq!(env.get("A").map(String::as_str), Some("1"));
        assert_eq!(env.get("B").map(String::as_str), Some("2"));
    }

    #[test]
    fn test_effective_env_secret_injection() {
        let m = manifest_with_env(&["TOKEN"]);
        let secrets = MapSecrets(BTreeMap::from([("TOKEN".into(), "s3cret".into())]));
        let env = effective_env(&m, None, &secrets);
        assert_eq!(env.get("TOKEN").map(String::as_str), Some("s3cret"));
    }

    #[test]
    fn test_effective_env_unresolved_name_dropped() {
        let m = manifest_with_env(&["MISSING"]);
        let env = effective_env(&m, None, &no_secrets());
        assert!(env.is_empty());
    }

    #[test]
    fn test_profile_overlay_wins() {
        let m = manifest_with_env(&["A=1"]);
        let profile = ProfileConfig {
            env: vec![EnvDecl::parse("A=2")],
        };
        let env = effective_env(&m, Some(&profile), &no_secrets());
        assert_eq!(env.get("A").map(String::as_str), Some("2"));
    }

    #[test]
    fn test_env_hash_order_independent() {
        // Permuting declaration order must not change the hash.
        let a = effective_env(&manifest_with_env(&["A=1", "B=2"]), None, &no_secrets());
        let b = effective_env(&manifest_with_env(&["B=2", "A=1"]), None, &no_secrets());
        assert_eq!(env_hash(&a), env_hash(&b));
    }

    #[test]
    fn test_env_hash_value_sensitive() {
        let a = effective_env(&manifest_with_env(&["A=1"]), None, &no_secrets());
        let b = effective_env(&manifest_with_env(&["A=2"]), None, &no_secrets());
        assert_ne!(env_hash(&a), env_hash(&b));
    }

    #[test]
    fn test_env_hash_secret_rotation_changes_hash() {
        let m = manifest_with_env(&["TOKEN"]);
        let before = MapSecrets(BTreeMap::from([("TOKEN".into(), "old".into())]));
        let after = MapSecrets(BTreeMap::from([("TOKEN".into(), "new".into())]));
        let h1 = env_hash(&effective_env(&m, None, &before));
        let h2 = env_hash(&effective_env(&m, None, &after));
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_env_hash_shape() {
        let h = env_hash(&BTreeMap::new());
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_manifest_profiles_service() {
        let json = r#"{
            "name": "demo",
            "container": "alpine",
            "profiles": {"staging": {"env": ["X=9"]}}
        }"#;
        let m = Manifest::from_json(json).unwrap();
        let svc = ManifestProfiles::new(Some("staging".into()), vec![m]);
        assert_eq!(svc.get_active_profile().as_deref(), Some("staging"));
        let cfg = svc.get_profile_config("demo", "staging").unwrap();
        assert_eq!(cfg.env[0].name, "X");
        assert!(svc.get_profile_config("other", "staging").is_none());
    }
}
