//! The agent manager: `ensure_agent_service` and friends.
//!
//! One manager instance owns all agent lifecycle work for a workspace.
//! Operations on the same agent are serialized by the per-container lock
//! directory; registry and routing-table files are re-read per operation, so
//! concurrent readers tolerate one reconciliation cycle of staleness.

use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use {
    tokio::{sync::Mutex, task::JoinHandle, time::sleep},
    tracing::{debug, info, warn},
};

use ploinky_config::{
    Manifest, ProfileService, SecretResolver, WorkspacePaths, effective_env, env_hash,
};
use ploinky_registry::{
    AgentKind, AgentRecord, AgentRegistry, BindConfig, ContainerConfig, EnvConfig, LockDir,
    PortConfig, RoutingTable, RunMode, container_name, names::CONTAINER_PREFIX, port_hint,
};
use ploinky_runtime::{
    BindMount, ContainerDriver, ContainerSpec, ExecOpts, PortPublish, RuntimeErrorKind,
    spec::ENV_HASH_LABEL,
};

use crate::{
    error::{Error, Result},
    hooks, probe,
};

/// Agents without a declared port serve MCP on this container port.
pub const DEFAULT_AGENT_PORT: u16 = 7000;

const PORT_RANGE: std::ops::Range<u16> = 10000..60000;
const PORT_ALLOC_ATTEMPTS: u32 = 50;
const STOP_WAIT_ATTEMPTS: u32 = 10;
const STOP_WAIT_DELAY: Duration = Duration::from_millis(500);

/// Host-side knobs, resolved once at startup instead of read from the
/// process environment throughout the call graph.
#[derive(Debug, Clone, Default)]
pub struct ManagerOptions {
    /// Mount `/code` read-write (`PLOINKY_CODE_WRITABLE=1`).
    pub code_writable: bool,
    /// Override source for the `/Agent` control-plane library mount
    /// (`PLOINKY_ROOT`).
    pub agent_lib_dir: Option<PathBuf>,
    /// Rootless podman needs host loopback opened for agents to reach the
    /// router.
    pub allow_host_loopback: bool,
    /// SELinux hosts relabel bind mounts.
    pub selinux_relabel: bool,
}

impl ManagerOptions {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            code_writable: std::env::var("PLOINKY_CODE_WRITABLE").as_deref() == Ok("1"),
            agent_lib_dir: std::env::var("PLOINKY_ROOT").ok().map(PathBuf::from),
            allow_host_loopback: false,
            selinux_relabel: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsureOutcome {
    pub container_name: String,
    pub host_port: u16,
}

pub struct AgentManager {
    driver: ContainerDriver,
    paths: WorkspacePaths,
    secrets: Arc<dyn SecretResolver>,
    profiles: Arc<dyn ProfileService>,
    options: ManagerOptions,
    liveness: Mutex<HashMap<String, JoinHandle<()>>>,
    intentionally_stopped: Mutex<HashSet<String>>,
}

impl AgentManager {
    #[must_use]
    pub fn new(
        driver: ContainerDriver,
        paths: WorkspacePaths,
        secrets: Arc<dyn SecretResolver>,
        profiles: Arc<dyn ProfileService>,
        options: ManagerOptions,
    ) -> Self {
        Self {
            driver,
            paths,
            secrets,
            profiles,
            options,
            liveness: Mutex::new(HashMap::new()),
            intentionally_stopped: Mutex::new(HashSet::new()),
        }
    }

    #[must_use]
    pub fn driver(&self) -> &ContainerDriver {
        &self.driver
    }

    #[must_use]
    pub fn paths(&self) -> &WorkspacePaths {
        &self.paths
    }

    // ── Ensure ──────────────────────────────────────────────────────────

    /// Bring the agent's container up and routable. Idempotent: an already
    /// healthy container is left alone, a stopped one is started, an
    /// env-drifted one is recreated. On failure no half-written registry
    /// entry remains.
    pub async fn ensure_agent_service(
        &self,
        manifest: &Manifest,
        repo: &str,
    ) -> Result<EnsureOutcome> {
        let container = container_name(repo, &manifest.name, &self.paths);
        let _lock = LockDir::acquire(&self.paths.locks_dir(), &container).await?;

        // An ensure expresses intent to run; the monitor may resume watching.
        self.intentionally_stopped.lock().await.remove(&container);

        let profile = self
            .profiles
            .get_active_profile()
            .and_then(|p| self.profiles.get_profile_config(&manifest.name, &p));
        let env = effective_env(manifest, profile.as_ref(), self.secrets.as_ref());
        let hash = env_hash(&env);

        if self.driver.exists(&container).await {
            let label = self.driver.label(&container, ENV_HASH_LABEL).await;
            if label.as_deref() != Some(hash.as_str()) {
                info!(
                    container = %container,
                    old = label.as_deref().unwrap_or("<none>"),
                    new = %hash,
                    "env hash drift, recreating container"
                );
                self.stop_liveness(&container).await;
                self.driver.remove(&container, true).await?;
            }
        }

        if self.driver.exists(&container).await {
            return self.ensure_existing(manifest, repo, &container).await;
        }

        match self.create_and_start(manifest, repo, &container, &env, &hash).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(container = %container, error = %e, "ensure failed, rolling back");
                self.rollback(&container, &manifest.name).await;
                Err(e)
            },
        }
    }

    async fn ensure_existing(
        &self,
        manifest: &Manifest,
        repo: &str,
        container: &str,
    ) -> Result<EnsureOutcome> {
        if !self.driver.is_running(container).await {
            info!(container = %container, "starting stopped container");
            self.driver
                .start(container)
                .await
                .map_err(|e| Error::ContainerStartFailed {
                    container: container.to_string(),
                    reason: e.to_string(),
                })?;
        }

        let host_port = self.resolve_host_port(container, manifest).await?;
        self.record(manifest, repo, container, host_port).await?;
        self.spawn_liveness(manifest, container).await;

        Ok(EnsureOutcome {
            container_name: container.to_string(),
            host_port,
        })
    }

    async fn create_and_start(
        &self,
        manifest: &Manifest,
        repo: &str,
        container: &str,
        env: &std::collections::BTreeMap<String, String>,
        hash: &str,
    ) -> Result<EnsureOutcome> {
        let host_port = match manifest.ports.first() {
            Some(p) => p.host_port,
            None => pick_host_port()?,
        };
        let spec = self.build_spec(manifest, repo, container, env, hash, host_port);

        // Install runs host-side over the same mounts, never inside a live
        // agent container.
        if let Some(ref install) = manifest.install {
            hooks::run_install(&self.driver, &spec, install).await?;
        }

        self.driver.create(&spec).await.map_err(|e| match e.kind {
            RuntimeErrorKind::PullFailed | RuntimeErrorKind::ShortName => Error::ImagePullFailed {
                image: manifest.container.clone(),
                reason: e.to_string(),
            },
            RuntimeErrorKind::NoRuntime => Error::RuntimeUnavailable(e.to_string()),
            _ => Error::ContainerStartFailed {
                container: container.to_string(),
                reason: e.to_string(),
            },
        })?;

        self.driver
            .start(container)
            .await
            .map_err(|e| Error::ContainerStartFailed {
                container: container.to_string(),
                reason: e.to_string(),
            })?;

        hooks::run_postinstall(&self.driver, container, &manifest.postinstall).await?;

        // With a custom `start` as PID 1, the agent sidecar runs detached.
        if manifest.start.is_some()
            && let Some(ref sidecar) = manifest.agent
        {
            let argv = vec!["sh".to_string(), "-lc".to_string(), sidecar.clone()];
            let opts = ExecOpts {
                detach: true,
                ..Default::default()
            };
            self.driver.exec(container, &argv, &opts).await?;
        }

        self.record(manifest, repo, container, host_port).await?;

        if let Some(ref readiness) = manifest.health.readiness {
            probe::readiness_check(&self.driver, container, &manifest.name, readiness).await;
        }

        if let Some(ref liveness) = manifest.health.liveness {
            match probe::run_probe(&self.driver, container, liveness).await? {
                probe::ProbeOutcome::Success => {},
                probe::ProbeOutcome::Failed { reason } => {
                    return Err(Error::ProbeFailed {
                        container: container.to_string(),
                        reason,
                    });
                },
            }
        }
        self.spawn_liveness(manifest, container).await;

        info!(
            agent = %manifest.name,
            container = %container,
            host_port,
            "agent service ensured"
        );
        Ok(EnsureOutcome {
            container_name: container.to_string(),
            host_port,
        })
    }

    /// Undo a failed ensure: stop and remove the container, clear registry,
    /// routing and hint state.
    async fn rollback(&self, container: &str, agent: &str) {
        self.stop_liveness(container).await;
        let _ = self.driver.remove(container, true).await;
        if let Ok(mut reg) = AgentRegistry::load(&self.paths.agents_json()) {
            let _ = reg.remove(container);
        }
        if let Ok(mut table) = RoutingTable::load(&self.paths.routing_json()) {
            let _ = table.remove_route(agent);
        }
        port_hint::clear_hint(&self.paths.running_agents_dir(), container);
    }

    // ── Refresh / stop / destroy ────────────────────────────────────────

    /// Recreate on env drift, otherwise restart in place, then re-ensure.
    pub async fn refresh(&self, manifest: &Manifest, repo: &str) -> Result<EnsureOutcome> {
        let container = container_name(repo, &manifest.name, &self.paths);

        if self.driver.exists(&container).await {
            let profile = self
                .profiles
                .get_active_profile()
                .and_then(|p| self.profiles.get_profile_config(&manifest.name, &p));
            let env = effective_env(manifest, profile.as_ref(), self.secrets.as_ref());
            let hash = env_hash(&env);
            let label = self.driver.label(&container, ENV_HASH_LABEL).await;

            let _lock = LockDir::acquire(&self.paths.locks_dir(), &container).await?;
            self.stop_liveness(&container).await;
            if label.as_deref() != Some(hash.as_str()) {
                info!(container = %container, "refresh: env changed, recreating");
                self.driver.remove(&container, true).await?;
            } else {
                info!(container = %container, "refresh: restarting in place");
                self.driver.restart(&container).await?;
            }
        }

        self.ensure_agent_service(manifest, repo).await
    }

    /// Graceful stop: SIGTERM, wait up to five seconds, SIGKILL the rest.
    /// The registry record is retained; a gone container counts as stopped.
    pub async fn stop(&self, agent: &str) -> Result<()> {
        let registry = AgentRegistry::load(&self.paths.agents_json())?;
        let Some((container, _)) = registry.by_agent(agent) else {
            return Err(Error::Message {
                message: format!("unknown agent '{agent}'"),
            });
        };
        let container = container.clone();

        self.intentionally_stopped
            .lock()
            .await
            .insert(container.clone());
        self.stop_liveness(&container).await;

        if !self.driver.exists(&container).await {
            return Ok(());
        }

        if let Err(e) = self.driver.stop(&container, None).await
            && e.kind != RuntimeErrorKind::NotFound
        {
            debug!(container = %container, error = %e, "SIGTERM failed");
        }
        for _ in 0..STOP_WAIT_ATTEMPTS {
            if !self.driver.is_running(&container).await {
                break;
            }
            sleep(STOP_WAIT_DELAY).await;
        }
        if self.driver.is_running(&container).await {
            warn!(container = %container, "container ignored SIGTERM, killing");
            let _ = self.driver.kill(&container).await;
        }

        port_hint::clear_hint(&self.paths.running_agents_dir(), &container);
        info!(agent, container = %container, "agent stopped");
        Ok(())
    }

    /// Stop, remove the container, and delete registry + routing entries.
    pub async fn destroy(&self, agent: &str) -> Result<()> {
        self.stop(agent).await?;

        let mut registry = AgentRegistry::load(&self.paths.agents_json())?;
        let Some((container, _)) = registry.by_agent(agent) else {
            return Ok(());
        };
        let container = container.clone();

        if let Err(e) = self.driver.remove(&container, true).await
            && e.kind != RuntimeErrorKind::NotFound
        {
            return Err(e.into());
        }

        registry.remove(&container)?;
        let mut table = RoutingTable::load(&self.paths.routing_json())?;
        table.remove_route(agent)?;
        self.intentionally_stopped.lock().await.remove(&container);
        info!(agent, container = %container, "agent destroyed");
        Ok(())
    }

    /// Destroy every container recorded for this workspace.
    pub async fn destroy_workspace(&self) -> Result<()> {
        let mut registry = AgentRegistry::load(&self.paths.agents_json())?;
        let names = registry.container_names();

        for name in &names {
            self.stop_liveness(name).await;
            self.intentionally_stopped.lock().await.insert(name.clone());
            port_hint::clear_hint(&self.paths.running_agents_dir(), name);
        }
        self.driver.remove_all(&names).await;

        registry.records.clear();
        registry.save()?;
        let mut table = RoutingTable::load(&self.paths.routing_json())?;
        table.routes.clear();
        table.save()?;
        info!(count = names.len(), "workspace containers destroyed");
        Ok(())
    }

    /// Destroy every `ploinky_` container on the host, foreign ones
    /// included. The only operation allowed to touch containers without a
    /// registry record.
    pub async fn destroy_all_ploinky(&self) -> Result<()> {
        let mut names = self.driver.list_prefixed(CONTAINER_PREFIX).await?;
        let registry = AgentRegistry::load(&self.paths.agents_json())?;
        for name in registry.container_names() {
            if !names.contains(&name) {
                names.push(name);
            }
        }

        for name in &names {
            self.stop_liveness(name).await;
        }
        self.driver.remove_all(&names).await;
        self.destroy_workspace().await?;
        info!(count = names.len(), "all ploinky containers destroyed");
        Ok(())
    }

    /// Whether the operator deliberately stopped this container; the
    /// monitor must not resurrect it.
    pub async fn is_intentionally_stopped(&self, container: &str) -> bool {
        self.intentionally_stopped.lock().await.contains(container)
    }

    /// Mark every known container as intentionally stopped (supervisor
    /// shutdown path).
    pub async fn mark_all_stopped(&self) {
        if let Ok(registry) = AgentRegistry::load(&self.paths.agents_json()) {
            let mut stopped = self.intentionally_stopped.lock().await;
            for name in registry.container_names() {
                stopped.insert(name);
            }
        }
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn mounts(&self, repo: &str, agent: &str) -> Vec<BindMount> {
        let root = self.paths.root().to_string_lossy().into_owned();
        let agent_lib = self
            .options
            .agent_lib_dir
            .clone()
            .unwrap_or_else(|| self.paths.dot_dir().join("Agent"));
        let code = self.paths.dot_dir().join("repos").join(repo).join(agent);
        let shared = self.paths.dot_dir().join("shared");

        vec![
            BindMount::new(root, "/workspace", false),
            BindMount::new(agent_lib.to_string_lossy(), "/Agent", true),
            BindMount::new(code.to_string_lossy(), "/code", !self.options.code_writable),
            BindMount::new(shared.to_string_lossy(), "/shared", false),
        ]
    }

    fn build_spec(
        &self,
        manifest: &Manifest,
        repo: &str,
        container: &str,
        env: &std::collections::BTreeMap<String, String>,
        hash: &str,
        host_port: u16,
    ) -> ContainerSpec {
        let mut binds = self.mounts(repo, &manifest.name);
        for (source, target) in &manifest.volumes {
            binds.push(BindMount::new(source.clone(), target.clone(), false));
        }

        let ports = if manifest.ports.is_empty() {
            vec![PortPublish::new(host_port, DEFAULT_AGENT_PORT)]
        } else {
            manifest
                .ports
                .iter()
                .map(|p| PortPublish {
                    host_ip: p.host_ip.clone(),
                    host_port: p.host_port,
                    container_port: p.container_port,
                })
                .collect()
        };

        let command = match manifest.start {
            Some(ref start) => vec!["sh".to_string(), "-lc".to_string(), start.clone()],
            None => vec![
                "sh".to_string(),
                "/Agent/server/AgentServer.sh".to_string(),
            ],
        };

        let mut labels = std::collections::BTreeMap::new();
        labels.insert(ENV_HASH_LABEL.to_string(), hash.to_string());

        ContainerSpec {
            name: container.to_string(),
            image: manifest.container.clone(),
            labels,
            binds,
            ports,
            env: env.clone(),
            command,
            allow_host_loopback: self.options.allow_host_loopback,
            selinux_relabel: self.options.selinux_relabel,
        }
    }

    /// Resolve the host port of a live container: registry record first,
    /// then the hint cache, then the runtime.
    async fn resolve_host_port(&self, container: &str, manifest: &Manifest) -> Result<u16> {
        let target = default_container_port(manifest);

        if let Ok(registry) = AgentRegistry::load(&self.paths.agents_json())
            && let Some(record) = registry.get(container)
            && let Some(port) = record.host_port_for(target)
        {
            return Ok(port);
        }

        if let Some(port) = port_hint::read_hint(&self.paths.running_agents_dir(), container) {
            return Ok(port);
        }

        if let Ok(Some(line)) = self.driver.port(container, &format!("{target}/tcp")).await
            && let Some(port) = parse_host_port(&line)
        {
            return Ok(port);
        }

        Err(Error::PortAllocationFailed(format!(
            "cannot resolve host port for '{container}'"
        )))
    }

    /// Write the registry record, routing entry and port hint.
    async fn record(
        &self,
        manifest: &Manifest,
        repo: &str,
        container: &str,
        host_port: u16,
    ) -> Result<()> {
        let target = default_container_port(manifest);

        let binds = self
            .mounts(repo, &manifest.name)
            .into_iter()
            .map(|b| BindConfig {
                source: b.source,
                target: b.target,
                ro: b.read_only.then_some(true),
            })
            .collect();
        let env = manifest
            .env
            .iter()
            .map(|d| EnvConfig {
                name: d.name.clone(),
                value: d.value.clone(),
            })
            .collect();
        let ports = vec![PortConfig {
            container_port: target,
            host_port,
            host_ip: "0.0.0.0".into(),
        }];

        let mut registry = AgentRegistry::load(&self.paths.agents_json())?;
        let existing = registry.get(container);
        let created_at = existing
            .map(|r| r.created_at.clone())
            .unwrap_or_else(|| chrono::Utc::now().to_rfc3339());
        let webchat_setup_output = existing.and_then(|r| r.webchat_setup_output.clone());
        let webchat_setup_at = existing.and_then(|r| r.webchat_setup_at.clone());

        registry.upsert(container.to_string(), AgentRecord {
            agent_name: manifest.name.clone(),
            repo_name: repo.to_string(),
            alias: None,
            container_image: manifest.container.clone(),
            created_at,
            project_path: self.paths.root().to_string_lossy().into_owned(),
            run_mode: RunMode::Free,
            kind: AgentKind::Agent,
            config: ContainerConfig { binds, env, ports },
            webchat_setup_output,
            webchat_setup_at,
        })?;

        let mut table = RoutingTable::load(&self.paths.routing_json())?;
        table.set_route(&manifest.name, host_port, Some(container.to_string()))?;

        port_hint::write_hint(&self.paths.running_agents_dir(), container, host_port);
        Ok(())
    }

    async fn spawn_liveness(&self, manifest: &Manifest, container: &str) {
        let Some(ref liveness) = manifest.health.liveness else {
            return;
        };
        let mut workers = self.liveness.lock().await;
        if let Some(handle) = workers.get(container)
            && !handle.is_finished()
        {
            return;
        }
        debug!(container = %container, "spawning liveness worker");
        let task = tokio::spawn(probe::liveness_loop(
            self.driver.clone(),
            container.to_string(),
            manifest.name.clone(),
            liveness.clone(),
        ));
        workers.insert(container.to_string(), task);
    }

    async fn stop_liveness(&self, container: &str) {
        if let Some(task) = self.liveness.lock().await.remove(container) {
            task.abort();
            debug!(container = %container, "liveness worker stopped");
        }
    }
}

/// The container port the routing layer targets: the first declared port,
/// or the default agent port.
#[must_use]
pub fn default_container_port(manifest: &Manifest) -> u16 {
    manifest
        .ports
        .first()
        .map(|p| p.container_port)
        .unwrap_or(DEFAULT_AGENT_PORT)
}

/// Parse the `ip:port` line printed by `podman port` / `docker port`.
#[must_use]
pub fn parse_host_port(line: &str) -> Option<u16> {
    line.rsplit(':').next()?.trim().parse().ok()
}

/// Pick a free host port in `[10000, 60000)`.
pub fn pick_host_port() -> Result<u16> {
    use rand::Rng;

    let mut rng = rand::rng();
    for _ in 0..PORT_ALLOC_ATTEMPTS {
        let candidate = rng.random_range(PORT_RANGE);
        if std::net::TcpListener::bind(("127.0.0.1", candidate)).is_ok() {
            return Ok(candidate);
        }
    }
    Err(Error::PortAllocationFailed(format!(
        "no free port found in {PORT_RANGE:?} after {PORT_ALLOC_ATTEMPTS} attempts"
    )))
}
