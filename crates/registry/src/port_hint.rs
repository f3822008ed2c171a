//! Host-port hint files (`.ploinky/running_agents/<container>.port`).
//!
//! Strictly a cache: the agent registry and routing table are authoritative,
//! the hint only short-circuits a runtime `port` lookup. A stale or missing
//! hint is never an error.

use std::path::{Path, PathBuf};

use tracing::debug;

fn hint_path(dir: &Path, container_name: &str) -> PathBuf {
    dir.join(format!("{container_name}.port"))
}

/// Best-effort write; failures are logged and ignored.
pub fn write_hint(dir: &Path, container_name: &str, host_port: u16) {
    if let Err(e) = std::fs::create_dir_all(dir) {
        debug!(dir = %dir.display(), error = %e, "cannot create running_agents dir");
        return;
    }
    let path = hint_path(dir, container_name);
    if let Err(e) = std::fs::write(&path, host_port.to_string()) {
        debug!(path = %path.display(), error = %e, "failed to write port hint");
    }
}

#[must_use]
pub fn read_hint(dir: &Path, container_name: &str) -> Option<u16> {
    let raw = std::fs::read_to_string(hint_path(dir, container_name)).ok()?;
    raw.trim().parse().ok()
}

pub fn clear_hint(dir: &Path, container_name: &str) {
    let _ = std::fs::remove_file(hint_path(dir, container_name));
}
