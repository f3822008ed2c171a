//! Deterministic container identity.
//!
//! `ploinky_<repo>_<agent>_<projectDir>_<hash8>` is a wire-level contract:
//! external tooling matches on the prefix and the monitor resolves records by
//! the full name, so the derivation must be stable across processes and runs.

use ploinky_config::WorkspacePaths;

pub const CONTAINER_PREFIX: &str = "ploinky_";

/// Replace every char outside `[A-Za-z0-9_.-]` with `_`.
#[must_use]
pub fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// The container name for `(repo, agent)` in this workspace.
#[must_use]
pub fn container_name(repo: &str, agent: &str, paths: &WorkspacePaths) -> String {
    format!(
        "{CONTAINER_PREFIX}{}_{}_{}_{}",
        sanitize(repo),
        sanitize(agent),
        sanitize(&paths.project_dir_name()),
        paths.cwd_hash8(),
    )
}
