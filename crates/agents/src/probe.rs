//! Liveness and readiness probing.
//!
//! Probes run user-provided scripts inside the container. Readiness failures
//! are reported and otherwise left to the operator; liveness failures restart
//! the container under a CrashLoopBackOff schedule so a wedged agent cannot
//! hot-loop the runtime.

use std::time::Duration;

use {
    tokio::time::{Instant, sleep},
    tracing::{debug, info, warn},
};

use ploinky_config::ProbeSpec;
use ploinky_runtime::{ContainerDriver, ExecOpts};

use crate::error::{Error, Result};

pub const BACKOFF_BASE: Duration = Duration::from_secs(10);
pub const BACKOFF_MAX: Duration = Duration::from_secs(300);
/// Continuous uptime after which the retry counter resets.
pub const BACKOFF_RESET: Duration = Duration::from_secs(600);

const RESTART_POLL_ATTEMPTS: u32 = 40;
const RESTART_POLL_DELAY: Duration = Duration::from_millis(250);

/// Per-container crash-loop bookkeeping. One probe worker per container is
/// the only writer.
#[derive(Debug, Clone)]
pub struct LivenessState {
    pub retry_count: u32,
    pub started_at: Instant,
}

impl Default for LivenessState {
    fn default() -> Self {
        Self {
            retry_count: 0,
            started_at: Instant::now(),
        }
    }
}

/// Delay slept after the restart that brought `retry_count` to its current
/// value: `min(BASE · 2^retry, MAX)`.
#[must_use]
pub fn crash_loop_delay(retry_count: u32) -> Duration {
    std::cmp::min(
        BACKOFF_BASE.saturating_mul(2u32.saturating_pow(retry_count)),
        BACKOFF_MAX,
    )
}

/// Terminal outcome of one threshold-counted probe run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success,
    /// Exit code rendered as text, or "timeout".
    Failed { reason: String },
}

/// Track consecutive successes/failures against the probe thresholds.
/// Feeding an outcome returns the terminal result once a threshold is hit.
#[derive(Debug, Default)]
pub struct ThresholdCounter {
    consecutive_successes: u32,
    consecutive_failures: u32,
}

impl ThresholdCounter {
    pub fn observe(
        &mut self,
        probe: &ProbeSpec,
        success: bool,
        reason: &str,
    ) -> Option<ProbeOutcome> {
        if success {
            self.consecutive_successes += 1;
            self.consecutive_failures = 0;
            if self.consecutive_successes >= probe.success_threshold {
                return Some(ProbeOutcome::Success);
            }
        } else {
            self.consecutive_failures += 1;
            self.consecutive_successes = 0;
            if self.consecutive_failures >= probe.failure_threshold {
                return Some(ProbeOutcome::Failed {
                    reason: reason.to_string(),
                });
            }
        }
        None
    }
}

/// Verify the probe script exists at `/code/<script>` inside the container.
pub async fn check_script_exists(
    driver: &ContainerDriver,
    container: &str,
    probe: &ProbeSpec,
) -> Result<()> {
    let argv = vec![
        "test".to_string(),
        "-f".to_string(),
        format!("/code/{}", probe.script),
    ];
    let out = driver.exec(container, &argv, &ExecOpts::default()).await?;
    if out.success() {
        Ok(())
    } else {
        Err(Error::ProbeScriptMissing {
            container: container.to_string(),
            script: probe.script.clone(),
        })
    }
}

async fn run_iteration(
    driver: &ContainerDriver,
    container: &str,
    probe: &ProbeSpec,
) -> Result<(bool, String)> {
    let argv = vec![
        "sh".to_string(),
        "-lc".to_string(),
        format!("cd /code && sh \"./{}\"", probe.script),
    ];
    let opts = ExecOpts {
        timeout_ms: Some(probe.timeout.as_millis() as u64),
        ..Default::default()
    };
    let out = driver.exec(container, &argv, &opts).await?;
    let reason = if out.exit_code == 124 {
        "timeout".to_string()
    } else {
        format!("exit {}", out.exit_code)
    };
    Ok((out.success(), reason))
}

/// Run one probe to its terminal outcome: iterate until either threshold is
/// satisfied, sleeping `interval` between iterations.
pub async fn run_probe(
    driver: &ContainerDriver,
    container: &str,
    probe: &ProbeSpec,
) -> Result<ProbeOutcome> {
    check_script_exists(driver, container, probe).await?;

    let mut counter = ThresholdCounter::default();
    loop {
        let (success, reason) = run_iteration(driver, container, probe).await?;
        debug!(container, script = %probe.script, success, %reason, "probe iteration");
        if let Some(outcome) = counter.observe(probe, success, &reason) {
            return Ok(outcome);
        }
        sleep(probe.interval).await;
    }
}

/// Restart the container and wait for it to report running again.
pub async fn restart_and_wait(driver: &ContainerDriver, container: &str) -> Result<()> {
    driver.restart(container).await?;
    for _ in 0..RESTART_POLL_ATTEMPTS {
        if driver.is_running(container).await {
            return Ok(());
        }
        sleep(RESTART_POLL_DELAY).await;
    }
    Err(Error::RestartFailed {
        container: container.to_string(),
    })
}

/// The long-running liveness worker for one container. Never terminal: the
/// loop ends only when the owning task is aborted (explicit stop/destroy).
pub async fn liveness_loop(
    driver: ContainerDriver,
    container: String,
    agent: String,
    probe: ProbeSpec,
) {
    let mut state = LivenessState::default();

    loop {
        match run_probe(&driver, &container, &probe).await {
            Ok(ProbeOutcome::Success) => {
                if state.retry_count > 0 && state.started_at.elapsed() >= BACKOFF_RESET {
                    debug!(container = %container, "liveness stable, resetting crash-loop counter");
                    state.retry_count = 0;
                }
                sleep(probe.interval).await;
            },
            Ok(ProbeOutcome::Failed { reason }) => {
                warn!(agent = %agent, container = %container, %reason, "liveness probe failed");

                // Stability before this failure also clears the counter.
                if state.retry_count > 0 && state.started_at.elapsed() >= BACKOFF_RESET {
                    state.retry_count = 0;
                }

                info!(agent = %agent, container = %container, "restarting container");
                if let Err(e) = restart_and_wait(&driver, &container).await {
                    warn!(container = %container, error = %e, "container restart failed");
                }

                state.retry_count += 1;
                state.started_at = Instant::now();
                let delay = crash_loop_delay(state.retry_count);
                info!(
                    container = %container,
                    retry = state.retry_count,
                    delay_secs = delay.as_secs(),
                    "crash-loop backoff"
                );
                sleep(delay).await;
            },
            Err(e) => {
                // Exec against a stopping container; back off and retry.
                warn!(container = %container, error = %e, "liveness probe error");
                sleep(probe.interval.max(Duration::from_secs(1))).await;
            },
        }
    }
}

/// One readiness pass. Failure is a warning, never a restart.
pub async fn readiness_check(
    driver: &ContainerDriver,
    container: &str,
    agent: &str,
    probe: &ProbeSpec,
) {
    match run_probe(driver, container, probe).await {
        Ok(ProbeOutcome::Success) => {
            debug!(agent, container, "readiness probe passed");
        },
        Ok(ProbeOutcome::Failed { reason }) => {
            warn!(agent, container, %reason, "readiness probe failed, continuing");
        },
        Err(e) => {
            warn!(agent, container, error = %e, "readiness probe error, continuing");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(success_threshold: u32, failure_threshold: u32) -> ProbeSpec {
        ProbeSpec {
            script: "probe.sh".into(),
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(5),
            success_threshold,
            failure_threshold,
        }
    }

    #[test]
    fn test_crash_loop_delay_schedule() {
        assert_eq!(crash_loop_delay(0), Duration::from_secs(10));
        assert_eq!(crash_loop_delay(1), Duration::from_secs(20));
        assert_eq!(crash_loop_delay(2), Duration::from_secs(40));
        assert_eq!(crash_loop_delay(3), Duration::from_secs(80));
        // Capped at five minutes.
        assert_eq!(crash_loop_delay(5), Duration::from_secs(300));
        assert_eq!(crash_loop_delay(30), Duration::from_secs(300));
    }

    #[test]
    fn test_crash_loop_delay_never_overflows() {
        assert_eq!(crash_loop_delay(u32::MAX), BACKOFF_MAX);
    }

    #[test]
    fn test_threshold_counter_success() {
        let p = probe(2, 3);
        let mut c = ThresholdCounter::default();
        assert_eq!(c.observe(&p, true, ""), None);
        assert_eq!(c.observe(&p, true, ""), Some(ProbeOutcome::Success));
    }

    #[test]
    fn test_threshold_counter_failure_reason() {
        let p = probe(1, 2);
        let mut c = ThresholdCounter::default();
        assert_eq!(c.observe(&p, false, "exit 1"), None);
        assert_eq!(
            c.observe(&p, false, "exit 1"),
            Some(ProbeOutcome::Failed {
                reason: "exit 1".into()
            })
        );
    }

    #[test]
    fn test_threshold_counter_resets_opposite() {
        let p = probe(2, 2);
        let mut c = ThresholdCounter::default();
        assert_eq!(c.observe(&p, true, ""), None);
        // A failure wipes the success streak.
        assert_eq!(c.observe(&p, false, "exit 1"), None);
        assert_eq!(c.observe(&p, true, ""), None);
        assert_eq!(c.observe(&p, true, ""), Some(ProbeOutcome::Success));
    }

    #[test]
    fn test_single_failure_hits_threshold_one() {
        let p = probe(1, 1);
        let mut c = ThresholdCounter::default();
        assert_eq!(
            c.observe(&p, false, "timeout"),
            Some(ProbeOutcome::Failed {
                reason: "timeout".into()
            })
        );
    }
}
