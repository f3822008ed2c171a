//! Periodic router health checks.
//!
//! Polls `GET /health` on the router child; after a run of consecutive
//! failures it asks the watchdog for a restart and starts counting afresh.
//! Any success resets the counter.

use std::time::Duration;

use {
    tokio::{sync::mpsc, time::sleep},
    tracing::{debug, warn},
};

#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    pub url: String,
    pub interval: Duration,
    pub timeout: Duration,
    pub failures_threshold: u32,
}

impl HealthCheckConfig {
    #[must_use]
    pub fn for_port(port: u16) -> Self {
        Self {
            url: format!("http://127.0.0.1:{port}/health"),
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            failures_threshold: 3,
        }
    }
}

/// A healthy response is HTTP 200 with `{"status":"healthy"}`.
#[must_use]
pub fn is_healthy_response(status: u16, body: &serde_json::Value) -> bool {
    status == 200 && body["status"] == "healthy"
}

async fn check_once(client: &reqwest::Client, config: &HealthCheckConfig) -> bool {
    let response = match client
        .get(&config.url)
        .timeout(config.timeout)
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            debug!(url = %config.url, error = %e, "health check request failed");
            return false;
        },
    };
    let status = response.status().as_u16();
    let body: serde_json::Value = match response.json().await {
        Ok(body) => body,
        Err(_) => return false,
    };
    is_healthy_response(status, &body)
}

/// Run the health-check loop. Each threshold crossing sends one restart
/// request; the loop continues for the lifetime of the child.
pub async fn run_health_checks(config: HealthCheckConfig, restart_tx: mpsc::Sender<()>) {
    let client = reqwest::Client::new();
    let mut consecutive_failures = 0u32;

    loop {
        sleep(config.interval).await;

        if check_once(&client, &config).await {
            if consecutive_failures > 0 {
                debug!("health check recovered");
            }
            consecutive_failures = 0;
            continue;
        }

        consecutive_failures += 1;
        warn!(
            failures = consecutive_failures,
            threshold = config.failures_threshold,
            "router health check failed"
        );

        if consecutive_failures >= config.failures_threshold {
            consecutive_failures = 0;
            if restart_tx.send(()).await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_healthy_response_shape() {
        assert!(is_healthy_response(200, &serde_json::json!({"status": "healthy"})));
        assert!(!is_healthy_response(200, &serde_json::json!({"status": "unhealthy"})));
        assert!(!is_healthy_response(503, &serde_json::json!({"status": "healthy"})));
        assert!(!is_healthy_response(200, &serde_json::json!({})));
    }

    #[test]
    fn test_config_defaults() {
        let config = HealthCheckConfig::for_port(8080);
        assert_eq!(config.url, "http://127.0.0.1:8080/health");
        assert_eq!(config.interval, Duration::from_secs(30));
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.failures_threshold, 3);
    }
}
