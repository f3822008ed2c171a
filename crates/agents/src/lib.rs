//! Agent lifecycle management: container identity, create/start/exec flows,
//! env-hash-driven recreation, install hooks and health probing with
//! CrashLoopBackOff.

pub mod error;
pub mod hooks;
pub mod manager;
pub mod probe;

pub use {
    error::{Error, Result},
    manager::{AgentManager, EnsureOutcome, ManagerOptions},
    probe::{LivenessState, ProbeOutcome, crash_loop_delay},
};
