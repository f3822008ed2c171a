//! Install and postinstall hooks.
//!
//! `install` runs host-side in an ephemeral `--rm` container over the exact
//! mount topology the agent will see, so dependency trees land in the bind
//! mounts the agent later uses. It never runs inside a live agent container.
//! `postinstall` runs command-by-command via exec inside the started
//! container.

use tracing::{info, warn};

use ploinky_runtime::{ContainerDriver, ContainerSpec, ExecOpts};

use crate::error::{Error, Result};

/// Run the one-shot install hook over the agent's mounts.
pub async fn run_install(
    driver: &ContainerDriver,
    spec: &ContainerSpec,
    install_cmd: &str,
) -> Result<String> {
    info!(image = %spec.image, "running install hook");
    // The ephemeral container must not collide with the agent's name.
    let mut ephemeral = spec.clone();
    ephemeral.name = String::new();
    ephemeral.ports = Vec::new();

    driver
        .run_ephemeral(&ephemeral, install_cmd)
        .await
        .map_err(|e| Error::InstallFailed(format!("install command failed: {e}")))
}

/// Run postinstall commands inside the running container. The container is
/// restarted only if a command left it stopped.
pub async fn run_postinstall(
    driver: &ContainerDriver,
    container: &str,
    commands: &[String],
) -> Result<()> {
    for command in commands {
        info!(container, command = %command, "running postinstall command");
        let argv = vec!["sh".to_string(), "-lc".to_string(), command.clone()];
        let out = driver.exec(container, &argv, &ExecOpts::default()).await?;
        if !out.success() {
            return Err(Error::InstallFailed(format!(
                "postinstall command '{command}' exited {}: {}",
                out.exit_code,
                out.stderr.trim()
            )));
        }
    }

    if !commands.is_empty() && !driver.is_running(container).await {
        warn!(container, "container stopped during postinstall, restarting");
        driver.start(container).await?;
    }
    Ok(())
}
