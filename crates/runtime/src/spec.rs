//! Container creation specs.

use std::collections::BTreeMap;

use crate::driver::ContainerRuntime;

/// The env-hash label key reserved by the control plane.
pub const ENV_HASH_LABEL: &str = "ploinky.envhash";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

impl BindMount {
    #[must_use]
    pub fn new(source: impl Into<String>, target: impl Into<String>, read_only: bool) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only,
        }
    }

    fn to_arg(&self, selinux_relabel: bool) -> String {
        let mut opts = Vec::new();
        if self.read_only {
            opts.push("ro");
        }
        if selinux_relabel {
            opts.push("z");
        }
        if opts.is_empty() {
            format!("{}:{}", self.source, self.target)
        } else {
            format!("{}:{}:{}", self.source, self.target, opts.join(","))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortPublish {
    pub host_ip: Option<String>,
    pub host_port: u16,
    pub container_port: u16,
}

impl PortPublish {
    #[must_use]
    pub fn new(host_port: u16, container_port: u16) -> Self {
        Self {
            host_ip: None,
            host_port,
            container_port,
        }
    }

    fn to_arg(&self) -> String {
        match &self.host_ip {
            Some(ip) => format!("{ip}:{}:{}", self.host_port, self.container_port),
            None => format!("{}:{}", self.host_port, self.container_port),
        }
    }
}

/// Everything needed to create (or ephemerally run) a container.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub labels: BTreeMap<String, String>,
    pub binds: Vec<BindMount>,
    pub ports: Vec<PortPublish>,
    pub env: BTreeMap<String, String>,
    /// Command argv run as PID 1. Empty means the image default.
    pub command: Vec<String>,
    /// Rootless podman networking needs host loopback opened explicitly for
    /// the agent to reach services on the host.
    pub allow_host_loopback: bool,
    /// SELinux hosts need `:z` relabeling on bind mounts.
    pub selinux_relabel: bool,
}

impl ContainerSpec {
    /// CLI args after the subcommand (`create` / `run`), excluding the image
    /// and command.
    #[must_use]
    pub fn option_args(&self, runtime: ContainerRuntime) -> Vec<String> {
        let mut args = Vec::new();
        if !self.name.is_empty() {
            args.push("--name".into());
            args.push(self.name.clone());
        }
        for (key, value) in &self.labels {
            args.push("--label".into());
            args.push(format!("{key}={value}"));
        }
        if self.allow_host_loopback && runtime == ContainerRuntime::Podman {
            args.push("--network".into());
            args.push("slirp4netns:allow_host_loopback=true".into());
        }
        for bind in &self.binds {
            args.push("-v".into());
            args.push(bind.to_arg(self.selinux_relabel));
        }
        for port in &self.ports {
            args.push("-p".into());
            args.push(port.to_arg());
        }
        for (key, value) in &self.env {
            args.push("-e".into());
            args.push(format!("{key}={value}"));
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_arg_forms() {
        let rw = BindMount::new("/host", "/workspace", false);
        assert_eq!(rw.to_arg(false), "/host:/workspace");
        assert_eq!(rw.to_arg(true), "/host:/workspace:z");

        let ro = BindMount::new("/host", "/code", true);
        assert_eq!(ro.to_arg(false), "/host:/code:ro");
        assert_eq!(ro.to_arg(true), "/host:/code:ro,z");
    }

    #[test]
    fn test_port_arg_forms() {
        assert_eq!(PortPublish::new(8080, 7000).to_arg(), "8080:7000");
        let bound = PortPublish {
            host_ip: Some("127.0.0.1".into()),
            host_port: 8080,
            container_port: 7000,
        };
        assert_eq!(bound.to_arg(), "127.0.0.1:8080:7000");
    }

    #[test]
    fn test_loopback_flag_is_podman_only() {
        let spec = ContainerSpec {
            name: "c".into(),
            image: "alpine".into(),
            allow_host_loopback: true,
            ..Default::default()
        };
        let podman = spec.option_args(ContainerRuntime::Podman);
        assert!(podman.iter().any(|a| a.starts_with("slirp4netns")));
        let docker = spec.option_args(ContainerRuntime::Docker);
        assert!(!docker.iter().any(|a| a.starts_with("slirp4netns")));
    }

    #[test]
    fn test_option_args_include_labels_and_env() {
        let mut spec = ContainerSpec {
            name: "c".into(),
            image: "alpine".into(),
            ..Default::default()
        };
        spec.labels.insert(ENV_HASH_LABEL.into(), "abc".into());
        spec.env.insert("FOO".into(), "bar".into());
        let args = spec.option_args(ContainerRuntime::Docker);
        assert!(args.windows(2).any(|w| w == ["--label", "ploinky.envhash=abc"]));
        assert!(args.windows(2).any(|w| w == ["-e", "FOO=bar"]));
    }
}
