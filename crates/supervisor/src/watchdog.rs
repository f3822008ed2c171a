//! The watchdog: spawns the router child, classifies its exits, restarts
//! with bounded exponential backoff, and trips a circuit breaker when the
//! router flaps faster than an operator could possibly intend.

use std::{
    collections::VecDeque,
    path::PathBuf,
    time::Duration,
};

use {
    tokio::{
        process::{Child, Command},
        sync::mpsc,
        time::{Instant, sleep},
    },
    tracing::{error, info, warn},
};

use crate::{
    healthcheck::{HealthCheckConfig, run_health_checks},
    monitor::MonitorControl,
};

/// Configuration error (port in use, bad manifest): restarting cannot help.
pub const EXIT_CONFIG: i32 = 2;
/// Circuit breaker tripped: manual intervention required.
pub const EXIT_CIRCUIT_BREAKER: i32 = 100;

const SIGTERM: i32 = 15;
const SIGINT: i32 = 2;

#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// Router listen port, also the health-check target.
    pub port: u16,
    /// Argv used to spawn the router child.
    pub router_command: Vec<String>,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: u32,
    /// Child uptime after which backoff and failure counters reset.
    pub uptime_reset: Duration,
    pub restart_window: Duration,
    pub max_restarts_in_window: usize,
    pub health_enabled: bool,
    pub health: HealthCheckConfig,
    /// Grace period between forwarding SIGTERM and sending SIGKILL.
    pub shutdown_grace: Duration,
    pub pid_file: Option<PathBuf>,
    /// Delay before the container monitor re-arms after a router spawn.
    pub monitor_rearm_delay: Duration,
}

impl WatchdogConfig {
    /// Defaults plus the environment knobs the core consumes
    /// (`HEALTH_CHECK_ENABLED`, `PLOINKY_ROUTER_PID_FILE`).
    #[must_use]
    pub fn from_env(port: u16, router_command: Vec<String>) -> Self {
        Self {
            port,
            router_command,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2,
            uptime_reset: Duration::from_secs(60),
            restart_window: Duration::from_secs(60),
            max_restarts_in_window: 5,
            health_enabled: std::env::var("HEALTH_CHECK_ENABLED").as_deref() != Ok("false"),
            health: HealthCheckConfig::for_port(port),
            shutdown_grace: Duration::from_secs(15),
            pid_file: std::env::var("PLOINKY_ROUTER_PID_FILE")
                .ok()
                .map(PathBuf::from),
            monitor_rearm_delay: Duration::from_secs(10),
        }
    }
}

/// Restart decision for one child exit.
#[must_use]
pub fn determine_should_restart(
    code: Option<i32>,
    signal: Option<i32>,
    pending_health_check_restart: bool,
) -> bool {
    if pending_health_check_restart {
        return true;
    }
    match code {
        // Clean exit.
        Some(0) => false,
        // Config/port error, human action required.
        Some(EXIT_CONFIG) => false,
        // Explicitly fatal.
        Some(c) if c >= 100 => false,
        Some(_) => true,
        None => !matches!(signal, Some(SIGTERM) | Some(SIGINT)),
    }
}

/// Sliding window of restart timestamps.
#[derive(Debug, Default)]
pub struct RestartWindow {
    restarts: VecDeque<Instant>,
}

impl RestartWindow {
    /// Record a restart; true when the breaker trips.
    pub fn record_and_check(&mut self, window: Duration, max_in_window: usize) -> bool {
        let now = Instant::now();
        self.restarts.push_back(now);
        while let Some(oldest) = self.restarts.front() {
            if now.duration_since(*oldest) > window {
                self.restarts.pop_front();
            } else {
                break;
            }
        }
        self.restarts.len() >= max_in_window
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.restarts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.restarts.is_empty()
    }
}

/// Next backoff step: `current × multiplier`, capped.
#[must_use]
pub fn next_backoff(current: Duration, multiplier: u32, max: Duration) -> Duration {
    std::cmp::min(current.saturating_mul(multiplier), max)
}

pub struct Watchdog {
    config: WatchdogConfig,
    monitor: Option<MonitorControl>,
    current_backoff: Duration,
    consecutive_failures: u32,
    restart_window: RestartWindow,
    pending_health_check_restart: bool,
    circuit_breaker_tripped: bool,
}

impl Watchdog {
    #[must_use]
    pub fn new(config: WatchdogConfig, monitor: Option<MonitorControl>) -> Self {
        let current_backoff = config.initial_backoff;
        Self {
            config,
            monitor,
            current_backoff,
            consecutive_failures: 0,
            restart_window: RestartWindow::default(),
            pending_health_check_restart: false,
            circuit_breaker_tripped: false,
        }
    }

    #[must_use]
    pub fn circuit_breaker_tripped(&self) -> bool {
        self.circuit_breaker_tripped
    }

    fn write_pid_file(&self) {
        if let Some(ref path) = self.config.pid_file {
            // The PID file carries the watchdog's own PID, never the router's.
            if let Err(e) = std::fs::write(path, std::process::id().to_string()) {
                warn!(path = %path.display(), error = %e, "failed to write PID file");
            }
        }
    }

    fn remove_pid_file(&self) {
        if let Some(ref path) = self.config.pid_file {
            let _ = std::fs::remove_file(path);
        }
    }

    fn spawn_router(&self) -> std::io::Result<Child> {
        let argv = &self.config.router_command;
        info!(command = ?argv, "spawning router");
        Command::new(&argv[0]).args(&argv[1..]).spawn()
    }

    fn signal_child(child: &Child, signal: nix::sys::signal::Signal) {
        if let Some(pid) = child.id() {
            let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), signal);
        }
    }

    /// Supervise until a terminal condition. Returns the process exit code.
    pub async fn run(&mut self) -> i32 {
        self.write_pid_file();

        let mut shutdown = match shutdown_signals() {
            Ok(shutdown) => shutdown,
            Err(e) => {
                error!(error = %e, "failed to install signal handlers");
                return 1;
            },
        };

        let exit_code = loop {
            let mut child = match self.spawn_router() {
                Ok(child) => child,
                Err(e) => {
                    error!(error = %e, "failed to spawn router");
                    break 1;
                },
            };
            let spawned_at = Instant::now();
            self.pending_health_check_restart = false;

            // The monitor must not race container starts against a router in
            // transition.
            if let Some(ref monitor) = self.monitor {
                monitor.rearm_after(self.config.monitor_rearm_delay);
            }

            let (health_tx, mut health_rx) = mpsc::channel(1);
            let health_task = if self.config.health_enabled {
                Some(tokio::spawn(run_health_checks(
                    self.config.health.clone(),
                    health_tx,
                )))
            } else {
                None
            };

            let status = loop {
                tokio::select! {
                    status = child.wait() => break status,
                    Some(()) = health_rx.recv() => {
                        warn!("health check threshold reached, recycling router");
                        self.pending_health_check_restart = true;
                        Self::signal_child(&child, nix::sys::signal::Signal::SIGTERM);
                        // The exit surfaces through child.wait() next iteration.
                    },
                    _ = shutdown.recv() => {
                        info!("shutdown signal received, stopping router");
                        if let Some(task) = health_task {
                            task.abort();
                        }
                        if let Some(ref monitor) = self.monitor {
                            monitor.pause();
                        }
                        self.graceful_stop(&mut child).await;
                        self.remove_pid_file();
                        return 0;
                    },
                }
            };
            if let Some(task) = health_task {
                task.abort();
            }
            if let Some(ref monitor) = self.monitor {
                monitor.pause();
            }

            let (code, signal) = match status {
                Ok(status) => {
                    use std::os::unix::process::ExitStatusExt;
                    (status.code(), status.signal())
                },
                Err(e) => {
                    warn!(error = %e, "failed to reap router child");
                    (None, None)
                },
            };
            let uptime = spawned_at.elapsed();
            info!(?code, ?signal, uptime_secs = uptime.as_secs(), "router exited");

            if uptime >= self.config.uptime_reset {
                self.current_backoff = self.config.initial_backoff;
                self.consecutive_failures = 0;
            }

            let should_restart =
                determine_should_restart(code, signal, self.pending_health_check_restart);
            self.pending_health_check_restart = false;

            if !should_restart {
                info!(?code, "router exit classified as intentional, not restarting");
                break code.unwrap_or(0);
            }

            if self.restart_window.record_and_check(
                self.config.restart_window,
                self.config.max_restarts_in_window,
            ) {
                self.circuit_breaker_tripped = true;
                error!(
                    restarts = self.restart_window.len(),
                    window_secs = self.config.restart_window.as_secs(),
                    "circuit_breaker_tripped"
                );
                eprintln!(
                    "ploinky: router restarted {} times within {}s; circuit breaker tripped.\n\
                     Inspect logs/router.log and run 'ploinky start' once the cause is fixed.",
                    self.restart_window.len(),
                    self.config.restart_window.as_secs(),
                );
                break EXIT_CIRCUIT_BREAKER;
            }

            self.consecutive_failures += 1;
            info!(
                backoff_secs = self.current_backoff.as_secs(),
                failures = self.consecutive_failures,
                "restarting router after backoff"
            );
            sleep(self.current_backoff).await;
            self.current_backoff = next_backoff(
                self.current_backoff,
                self.config.backoff_multiplier,
                self.config.max_backoff,
            );
        };

        self.remove_pid_file();
        exit_code
    }

    /// Forward SIGTERM, wait out the grace period, then SIGKILL.
    async fn graceful_stop(&self, child: &mut Child) {
        Self::signal_child(child, nix::sys::signal::Signal::SIGTERM);
        let deadline = tokio::time::timeout(self.config.shutdown_grace, child.wait());
        if deadline.await.is_err() {
            warn!("router ignored SIGTERM, killing");
            let _ = child.kill().await;
        }
    }
}

/// One receiver fed by SIGINT, SIGTERM and SIGQUIT.
fn shutdown_signals() -> std::io::Result<mpsc::Receiver<()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let (tx, rx) = mpsc::channel(1);
    for kind in [
        SignalKind::interrupt(),
        SignalKind::terminate(),
        SignalKind::quit(),
    ] {
        let mut stream = signal(kind)?;
        let tx = tx.clone();
        tokio::spawn(async move {
            while stream.recv().await.is_some() {
                let _ = tx.send(()).await;
            }
        });
    }
    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_classification_table() {
        // Pending health restart always wins.
        assert!(determine_should_restart(Some(0), None, true));
        assert!(determine_should_restart(None, Some(SIGTERM), true));

        // Clean exit.
        assert!(!determine_should_restart(Some(0), None, false));
        // Config error: human action required.
        assert!(!determine_should_restart(Some(2), None, false));
        // Explicitly fatal codes.
        assert!(!determine_should_restart(Some(100), None, false));
        assert!(!determine_should_restart(Some(113), None, false));
        // Intentional signals.
        assert!(!determine_should_restart(None, Some(SIGTERM), false));
        assert!(!determine_should_restart(None, Some(SIGINT), false));

        // Everything else restarts.
        assert!(determine_should_restart(Some(1), None, false));
        assert!(determine_should_restart(Some(42), None, false));
        // SIGKILL (9) is not intentional.
        assert!(determine_should_restart(None, Some(9), false));
        assert!(determine_should_restart(None, None, false));
    }

    #[test]
    fn test_backoff_progression() {
        let max = Duration::from_secs(30);
        let mut backoff = Duration::from_secs(1);
        let mut seen = Vec::new();
        for _ in 0..7 {
            seen.push(backoff.as_secs());
            backoff = next_backoff(backoff, 2, max);
        }
        assert_eq!(seen, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_window() {
        let window = Duration::from_secs(60);
        let mut restarts = RestartWindow::default();
        // Four rapid restarts stay under the default threshold of five.
        for _ in 0..4 {
            assert!(!restarts.record_and_check(window, 5));
        }
        // The fifth trips.
        assert!(restarts.record_and_check(window, 5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_forgets_old_restarts() {
        let window = Duration::from_secs(60);
        let mut restarts = RestartWindow::default();
        for _ in 0..4 {
            assert!(!restarts.record_and_check(window, 5));
        }
        // After the window passes, old entries age out.
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!restarts.record_and_check(window, 5));
        assert_eq!(restarts.len(), 1);
    }

    #[test]
    fn test_watchdog_construction_without_start() {
        // Test-mode construction: internals exposed, nothing spawned.
        let config = WatchdogConfig::from_env(8080, vec!["true".into()]);
        let watchdog = Watchdog::new(config, None);
        assert!(!watchdog.circuit_breaker_tripped());
        assert_eq!(watchdog.current_backoff, watchdog.config.initial_backoff);
    }
}
