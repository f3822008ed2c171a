//! Container runtime façade.
//!
//! Wraps the `podman`/`docker` CLIs behind one driver so the rest of the
//! control plane never assembles runtime arguments itself. Runtime quirks
//! (podman short-name resolution, rootless loopback networking, SELinux
//! volume relabeling) are expressed as flags on [`ContainerSpec`].

pub mod driver;
pub mod error;
pub mod spec;

pub use {
    driver::{ContainerDriver, ContainerRuntime, ExecOpts, ExecOutput},
    error::{Result, RuntimeError, RuntimeErrorKind},
    spec::{BindMount, ContainerSpec, PortPublish},
};
