//! Supervision: the watchdog that keeps the router alive, and the container
//! monitor that keeps declared agents running.

pub mod healthcheck;
pub mod monitor;
pub mod watchdog;

pub use {
    monitor::{ContainerMonitor, FsManifestSource, ManifestSource, MonitorControl, monitor_channel},
    watchdog::{EXIT_CIRCUIT_BREAKER, EXIT_CONFIG, Watchdog, WatchdogConfig},
};
