//! The podman/docker CLI driver.

use std::{collections::HashMap, process::Stdio, time::Duration};

use {
    tokio::process::Command,
    tracing::{debug, info, warn},
};

use crate::{
    error::{Result, RuntimeError, RuntimeErrorKind},
    spec::ContainerSpec,
};

/// Containers are stopped/removed in groups of this size; one CLI invocation
/// covers the whole group, with a per-container fallback on failure.
const BATCH_SIZE: usize = 8;

/// Supported container runtimes. Podman is preferred when both are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerRuntime {
    Podman,
    Docker,
}

impl ContainerRuntime {
    #[must_use]
    pub fn cli(&self) -> &'static str {
        match self {
            Self::Podman => "podman",
            Self::Docker => "docker",
        }
    }

    /// Probe PATH for a usable runtime.
    pub fn detect() -> Result<Self> {
        if which::which("podman").is_ok() {
            info!("container runtime: podman");
            return Ok(Self::Podman);
        }
        if which::which("docker").is_ok() {
            info!("container runtime: docker");
            return Ok(Self::Docker);
        }
        Err(RuntimeError::no_runtime())
    }
}

/// Options for `exec` inside a running container.
#[derive(Debug, Clone, Default)]
pub struct ExecOpts {
    pub tty: bool,
    pub detach: bool,
    pub env: HashMap<String, String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Thin façade over the runtime CLI. All operations shell out via
/// `tokio::process::Command`; nothing here blocks the reactor.
#[derive(Debug, Clone)]
pub struct ContainerDriver {
    runtime: ContainerRuntime,
}

impl ContainerDriver {
    #[must_use]
    pub fn new(runtime: ContainerRuntime) -> Self {
        Self { runtime }
    }

    /// Detect the runtime and build a driver over it.
    pub fn detect() -> Result<Self> {
        Ok(Self::new(ContainerRuntime::detect()?))
    }

    #[must_use]
    pub fn runtime(&self) -> ContainerRuntime {
        self.runtime
    }

    async fn run_cli(&self, args: &[String]) -> Result<String> {
        debug!(runtime = self.runtime.cli(), args = ?args, "runtime cli");
        let output = Command::new(self.runtime.cli())
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| RuntimeError::io(&e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RuntimeError::from_cli(output.status.code(), &stderr));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn owned(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| (*s).to_string()).collect()
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Create a container from a spec without starting it. Podman short-name
    /// failures are retried once with a `docker.io/library/` qualification.
    pub async fn create(&self, spec: &ContainerSpec) -> Result<()> {
        let result = self.create_with_image(spec, &spec.image).await;
        if let Err(ref err) = result
            && err.kind == RuntimeErrorKind::ShortName
            && self.runtime == ContainerRuntime::Podman
            && !spec.image.contains('/')
        {
            let qualified = format!("docker.io/library/{}", spec.image);
            warn!(image = %spec.image, retry = %qualified, "short-name image, retrying qualified");
            return self.create_with_image(spec, &qualified).await;
        }
        result
    }

    async fn create_with_image(&self, spec: &ContainerSpec, image: &str) -> Result<()> {
        let mut args = vec!["create".to_string()];
        args.extend(spec.option_args(self.runtime));
        args.push(image.to_string());
        args.extend(spec.command.iter().cloned());
        self.run_cli(&args).await?;
        Ok(())
    }

    /// Run an ephemeral (`--rm`) container to completion and return its
    /// stdout. Used for host-side install hooks.
    pub async fn run_ephemeral(&self, spec: &ContainerSpec, shell_command: &str) -> Result<String> {
        let mut args = vec!["run".to_string(), "--rm".to_string()];
        args.extend(spec.option_args(self.runtime));
        args.push(spec.image.clone());
        args.push("sh".into());
        args.push("-lc".into());
        args.push(shell_command.to_string());
        self.run_cli(&args).await
    }

    pub async fn start(&self, name: &str) -> Result<()> {
        self.run_cli(&Self::owned(&["start", name])).await?;
        Ok(())
    }

    pub async fn restart(&self, name: &str) -> Result<()> {
        self.run_cli(&Self::owned(&["restart", name])).await?;
        Ok(())
    }

    /// Send a signal without waiting for the container to exit.
    pub async fn stop(&self, name: &str, signal: Option<&str>) -> Result<()> {
        let signal = signal.unwrap_or("SIGTERM");
        self.run_cli(&Self::owned(&["kill", "--signal", signal, name]))
            .await?;
        Ok(())
    }

    pub async fn kill(&self, name: &str) -> Result<()> {
        self.stop(name, Some("SIGKILL")).await
    }

    pub async fn remove(&self, name: &str, force: bool) -> Result<()> {
        let args = if force {
            Self::owned(&["rm", "-f", name])
        } else {
            Self::owned(&["rm", name])
        };
        self.run_cli(&args).await?;
        Ok(())
    }

    // ── Batch operations ────────────────────────────────────────────────

    /// Stop then force-remove containers, batched. Containers that are
    /// already gone count as success.
    pub async fn remove_all(&self, names: &[String]) {
        for batch in names.chunks(BATCH_SIZE) {
            let mut stop_args = Self::owned(&["kill", "--signal", "SIGTERM"]);
            stop_args.extend(batch.iter().cloned());
            if self.run_cli(&stop_args).await.is_err() {
                for name in batch {
                    if let Err(e) = self.stop(name, None).await
                        && e.kind != RuntimeErrorKind::NotFound
                    {
                        debug!(container = %name, error = %e, "batch stop fallback failed");
                    }
                }
            }

            let mut rm_args = Self::owned(&["rm", "-f"]);
            rm_args.extend(batch.iter().cloned());
            if self.run_cli(&rm_args).await.is_err() {
                for name in batch {
                    if let Err(e) = self.remove(name, true).await
                        && e.kind != RuntimeErrorKind::NotFound
                    {
                        warn!(container = %name, error = %e, "batch remove fallback failed");
                    }
                }
            }
        }
    }

    // ── Inspection ──────────────────────────────────────────────────────

    /// Read a single field via a Go-template inspect format.
    pub async fn inspect(&self, name: &str, format: &str) -> Result<String> {
        self.run_cli(&Self::owned(&["inspect", "--format", format, name]))
            .await
    }

    pub async fn exists(&self, name: &str) -> bool {
        self.inspect(name, "{{.Id}}").await.is_ok()
    }

    pub async fn is_running(&self, name: &str) -> bool {
        matches!(
            self.inspect(name, "{{.State.Status}}").await.as_deref(),
            Ok("running")
        )
    }

    /// Read a container label, `None` when unset or the container is gone.
    pub async fn label(&self, name: &str, key: &str) -> Option<String> {
        let format = format!("{{{{index .Config.Labels \"{key}\"}}}}");
        match self.inspect(name, &format).await {
            Ok(value) if !value.is_empty() && value != "<no value>" => Some(value),
            _ => None,
        }
    }

    /// Host mapping for a container port, as `ip:port`.
    pub async fn port(&self, name: &str, port_proto: &str) -> Result<Option<String>> {
        let out = self
            .run_cli(&Self::owned(&["port", name, port_proto]))
            .await?;
        Ok(out.lines().next().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()))
    }

    pub async fn logs(&self, name: &str, tail: usize) -> Result<String> {
        let tail = tail.to_string();
        self.run_cli(&Self::owned(&["logs", "--tail", &tail, name]))
            .await
    }

    /// All container names carrying the control plane's prefix, running or not.
    pub async fn list_prefixed(&self, prefix: &str) -> Result<Vec<String>> {
        let filter = format!("name={prefix}");
        let out = self
            .run_cli(&Self::owned(&[
                "ps",
                "-a",
                "--filter",
                &filter,
                "--format",
                "{{.Names}}",
            ]))
            .await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| l.starts_with(prefix))
            .map(String::from)
            .collect())
    }

    // ── Exec ────────────────────────────────────────────────────────────

    /// Run a command inside a running container. A deadline overrun kills
    /// the exec and reports exit code 124, mirroring `timeout(1)`.
    pub async fn exec(&self, name: &str, argv: &[String], opts: &ExecOpts) -> Result<ExecOutput> {
        let mut args = vec!["exec".to_string()];
        if opts.tty {
            args.push("-t".into());
        }
        if opts.detach {
            args.push("--detach".into());
        }
        for (key, value) in &opts.env {
            args.push("-e".into());
            args.push(format!("{key}={value}"));
        }
        args.push(name.to_string());
        args.extend(argv.iter().cloned());

        debug!(runtime = self.runtime.cli(), container = %name, argv = ?argv, "exec");

        // kill_on_drop reaps the exec when a timeout abandons the future.
        let child = Command::new(self.runtime.cli())
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RuntimeError::io(&e))?;

        let wait = async {
            child
                .wait_with_output()
                .await
                .map_err(|e| RuntimeError::io(&e))
        };

        let output = match opts.timeout_ms {
            Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), wait).await {
                Ok(output) => output?,
                Err(_) => {
                    return Ok(ExecOutput {
                        exit_code: 124,
                        stdout: String::new(),
                        stderr: format!("exec timed out after {ms}ms"),
                    });
                },
            },
            None => wait.await?,
        };

        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
