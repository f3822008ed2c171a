//! Workspace configuration: `.ploinky/` layout, agent manifests, secrets and
//! the canonical environment hash.

pub mod env;
pub mod error;
pub mod manifest;
pub mod paths;
pub mod secrets;
pub mod workspace;

pub use {
    env::{ProfileService, effective_env, env_hash},
    error::{Error, Result},
    manifest::{EnvDecl, HealthConfig, Manifest, PortSpec, ProbeSpec, ProfileConfig, RawManifest},
    paths::WorkspacePaths,
    secrets::{FileSecretStore, SecretResolver},
    workspace::{WorkspaceConfig, load_enabled_repos},
};
