//! The container monitor: a periodic reconciler that restarts declared
//! agents whose containers stopped without anyone asking.

use std::{sync::Arc, time::Duration};

use {
    tokio::{sync::watch, time::sleep},
    tracing::{debug, info, warn},
};

use {
    ploinky_agents::AgentManager,
    ploinky_config::{Manifest, WorkspacePaths},
    ploinky_registry::AgentRegistry,
};

pub const CONTAINER_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Where the monitor finds the manifest to re-ensure an agent with.
pub trait ManifestSource: Send + Sync {
    fn manifest_for(&self, repo: &str, agent: &str) -> Option<Manifest>;
}

/// Manifests as laid out on disk: `.ploinky/repos/<repo>/<agent>/manifest.json`.
pub struct FsManifestSource {
    paths: WorkspacePaths,
}

impl FsManifestSource {
    #[must_use]
    pub fn new(paths: WorkspacePaths) -> Self {
        Self { paths }
    }
}

impl ManifestSource for FsManifestSource {
    fn manifest_for(&self, repo: &str, agent: &str) -> Option<Manifest> {
        let path = self
            .paths
            .dot_dir()
            .join("repos")
            .join(repo)
            .join(agent)
            .join("manifest.json");
        let raw = std::fs::read_to_string(&path).ok()?;
        match Manifest::from_json(&raw) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unparseable manifest");
                None
            },
        }
    }
}

/// Pause/resume handle held by the watchdog. Paused while the router child
/// is in transition, re-armed shortly after a new child spawns.
#[derive(Clone)]
pub struct MonitorControl {
    tx: watch::Sender<bool>,
}

impl MonitorControl {
    pub fn pause(&self) {
        let _ = self.tx.send(true);
    }

    pub fn resume(&self) {
        let _ = self.tx.send(false);
    }

    /// Resume after `delay`; the watchdog calls this right after a spawn.
    pub fn rearm_after(&self, delay: Duration) {
        let tx = self.tx.clone();
        let _ = tx.send(true);
        tokio::spawn(async move {
            sleep(delay).await;
            let _ = tx.send(false);
        });
    }
}

/// Build the control/observer pair. The monitor starts paused until the
/// watchdog arms it.
#[must_use]
pub fn monitor_channel() -> (MonitorControl, watch::Receiver<bool>) {
    let (tx, rx) = watch::channel(true);
    (MonitorControl { tx }, rx)
}

pub struct ContainerMonitor {
    manager: Arc<AgentManager>,
    manifests: Arc<dyn ManifestSource>,
    interval: Duration,
    paused: watch::Receiver<bool>,
}

impl ContainerMonitor {
    #[must_use]
    pub fn new(
        manager: Arc<AgentManager>,
        manifests: Arc<dyn ManifestSource>,
        paused: watch::Receiver<bool>,
    ) -> Self {
        Self {
            manager,
            manifests,
            interval: CONTAINER_CHECK_INTERVAL,
            paused,
        }
    }

    /// Run the reconcile loop forever.
    pub async fn run(self) {
        loop {
            sleep(self.interval).await;
            if *self.paused.borrow() {
                continue;
            }
            self.reconcile_once().await;
        }
    }

    /// One pass: restart every monitored agent whose container is down and
    /// not intentionally stopped.
    pub async fn reconcile_once(&self) {
        let registry = match AgentRegistry::load(&self.manager.paths().agents_json()) {
            Ok(registry) => registry,
            Err(e) => {
                warn!(error = %e, "monitor cannot read agent registry");
                return;
            },
        };

        for (container, record) in &registry.records {
            if !record.kind.is_monitored() {
                continue;
            }
            if self.manager.is_intentionally_stopped(container).await {
                continue;
            }
            if self.manager.driver().is_running(container).await {
                continue;
            }

            let Some(manifest) = self
                .manifests
                .manifest_for(&record.repo_name, &record.agent_name)
            else {
                debug!(
                    agent = %record.agent_name,
                    repo = %record.repo_name,
                    "no manifest for stopped agent, skipping"
                );
                continue;
            };

            info!(
                agent = %record.agent_name,
                container = %container,
                "container not running, re-ensuring"
            );
            match self
                .manager
                .ensure_agent_service(&manifest, &record.repo_name)
                .await
            {
                Ok(outcome) => {
                    info!(
                        agent = %record.agent_name,
                        host_port = outcome.host_port,
                        "agent restarted by monitor"
                    );
                },
                Err(e) => {
                    warn!(agent = %record.agent_name, error = %e, "monitor restart failed");
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_starts_paused() {
        let (_control, rx) = monitor_channel();
        assert!(*rx.borrow());
    }

    #[test]
    fn test_pause_resume() {
        let (control, rx) = monitor_channel();
        control.resume();
        assert!(!*rx.borrow());
        control.pause();
        assert!(*rx.borrow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_after_delay() {
        let (control, mut rx) = monitor_channel();
        control.rearm_after(Duration::from_secs(10));
        assert!(*rx.borrow());
        // Paused time auto-advances through the re-arm sleep.
        while *rx.borrow() {
            rx.changed().await.unwrap();
        }
        assert!(!*rx.borrow());
    }

    #[test]
    fn test_fs_manifest_source() {
        let dir = tempfile::tempdir().unwrap();
        let paths = WorkspacePaths::new(dir.path()).unwrap();
        let agent_dir = paths.dot_dir().join("repos").join("basic").join("demo");
        std::fs::create_dir_all(&agent_dir).unwrap();
        std::fs::write(
            agent_dir.join("manifest.json"),
            r#"{"name": "demo", "container": "alpine"}"#,
        )
        .unwrap();

        let source = FsManifestSource::new(paths);
        let manifest = source.manifest_for("basic", "demo").unwrap();
        assert_eq!(manifest.container, "alpine");
        assert!(source.manifest_for("basic", "ghost").is_none());
    }
}
