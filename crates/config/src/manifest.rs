//! Agent manifests.
//!
//! Manifests arrive as free-form JSON written by agent authors. Parsing is
//! two-layered: [`RawManifest`] accepts whatever the file contains (unknown
//! fields are preserved but never acted upon), and [`RawManifest::validate`]
//! produces the typed [`Manifest`] the rest of the control plane works with.

use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ── Raw layer ───────────────────────────────────────────────────────────────

/// A `postinstall` value may be a single shell string or a list of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StringOrList {
    One(String),
    Many(Vec<String>),
}

impl StringOrList {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s],
            Self::Many(v) => v,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawProbe {
    #[serde(default)]
    pub script: String,
    /// Seconds between probe iterations.
    pub interval: Option<u64>,
    /// Seconds before one probe iteration is killed.
    pub timeout: Option<u64>,
    pub success_threshold: Option<u32>,
    pub failure_threshold: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawHealth {
    pub liveness: Option<RawProbe>,
    pub readiness: Option<RawProbe>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawProfile {
    #[serde(default)]
    pub env: Vec<String>,
}

/// Permissive manifest as found on disk. Unknown fields land in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawManifest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub container: String,
    pub install: Option<String>,
    pub postinstall: Option<StringOrList>,
    pub start: Option<String>,
    pub agent: Option<String>,
    #[serde(default)]
    pub ports: Vec<String>,
    #[serde(default)]
    pub volumes: HashMap<String, String>,
    #[serde(default)]
    pub env: Vec<String>,
    pub health: Option<RawHealth>,
    #[serde(default)]
    pub profiles: HashMap<String, RawProfile>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RawManifest {
    /// Parse a manifest from JSON text.
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Validate into the typed manifest the control plane operates on.
    pub fn validate(self) -> Result<Manifest> {
        if self.name.trim().is_empty() {
            return Err(Error::manifest("missing required field 'name'"));
        }
        if self.container.trim().is_empty() {
            return Err(Error::manifest("missing required field 'container'"));
        }
        if self.agent.is_some() && self.start.is_none() {
            return Err(Error::manifest("'agent' requires 'start'"));
        }

        let ports = self
            .ports
            .iter()
            .map(|s| PortSpec::parse(s))
            .collect::<Result<Vec<_>>>()?;

        let env = self.env.iter().map(|s| EnvDecl::parse(s)).collect();

        let health = HealthConfig {
            liveness: self
                .health
                .as_ref()
                .and_then(|h| h.liveness.as_ref())
                .map(ProbeSpec::from_raw)
                .transpose()?,
            readiness: self
                .health
                .as_ref()
                .and_then(|h| h.readiness.as_ref())
                .map(ProbeSpec::from_raw)
                .transpose()?,
        };

        let profiles = self
            .profiles
            .iter()
            .map(|(name, p)| {
                (name.clone(), ProfileConfig {
                    env: p.env.iter().map(|s| EnvDecl::parse(s)).collect(),
                })
            })
            .collect();

        Ok(Manifest {
            name: self.name.trim().to_string(),
            container: self.container.trim().to_string(),
            install: self.install.filter(|s| !s.trim().is_empty()),
            postinstall: self
                .postinstall
                .map(StringOrList::into_vec)
                .unwrap_or_default(),
            start: self.start.filter(|s| !s.trim().is_empty()),
            agent: self.agent.filter(|s| !s.trim().is_empty()),
            ports,
            volumes: self.volumes,
            env,
            health,
            profiles,
        })
    }
}

// ── Typed layer ─────────────────────────────────────────────────────────────

/// A declared env variable: `NAME=value` carries a literal, bare `NAME`
/// means "inject from the workspace secret store".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvDecl {
    pub name: String,
    pub value: Option<String>,
}

impl EnvDecl {
    #[must_use]
    pub fn parse(decl: &str) -> Self {
        match decl.split_once('=') {
            Some((name, value)) => Self {
                name: name.trim().to_string(),
                value: Some(value.to_string()),
            },
            None => Self {
                name: decl.trim().to_string(),
                value: None,
            },
        }
    }
}

/// A published port: `host:container` or `ip:host:container`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    pub host_ip: Option<String>,
    pub host_port: u16,
    pub container_port: u16,
}

impl PortSpec {
    pub fn parse(spec: &str) -> Result<Self> {
        let parts: Vec<&str> = spec.split(':').collect();
        let (host_ip, host, container) = match parts.as_slice() {
            // A bare port publishes the same port on host and container.
            [p] => (None, *p, *p),
            [h, c] => (None, *h, *c),
            [ip, h, c] => (Some((*ip).to_string()), *h, *c),
            _ => return Err(Error::manifest(format!("invalid port spec '{spec}'"))),
        };
        let host_port = host
            .parse::<u16>()
            .map_err(|_| Error::manifest(format!("invalid host port in '{spec}'")))?;
        let container_port = container
            .parse::<u16>()
            .map_err(|_| Error::manifest(format!("invalid container port in '{spec}'")))?;
        if host_port == 0 || container_port == 0 {
            return Err(Error::manifest(format!("port 0 is not publishable in '{spec}'")));
        }
        Ok(Self {
            host_ip,
            host_port,
            container_port,
        })
    }
}

/// One liveness or readiness probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeSpec {
    /// Bare file name under `/code` inside the container.
    pub script: String,
    pub interval: Duration,
    pub timeout: Duration,
    pub success_threshold: u32,
    pub failure_threshold: u32,
}

impl ProbeSpec {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 1;
    pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

    fn from_raw(raw: &RawProbe) -> Result<Self> {
        let script = raw.script.trim();
        if script.is_empty() {
            return Err(Error::manifest("probe is missing 'script'"));
        }
        // Scripts are executed as `/code/<script>`; path traversal is not a
        // manifest author's call to make.
        if script.contains('/') || script.contains("..") {
            return Err(Error::manifest(format!(
                "probe script '{script}' must be a bare file name"
            )));
        }
        Ok(Self {
            script: script.to_string(),
            interval: raw
                .interval
                .map(Duration::from_secs)
                .unwrap_or(Self::DEFAULT_INTERVAL),
            timeout: raw
                .timeout
                .map(Duration::from_secs)
                .unwrap_or(Self::DEFAULT_TIMEOUT),
            success_threshold: raw.success_threshold.unwrap_or(Self::DEFAULT_SUCCESS_THRESHOLD),
            failure_threshold: raw.failure_threshold.unwrap_or(Self::DEFAULT_FAILURE_THRESHOLD),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthConfig {
    pub liveness: Option<ProbeSpec>,
    pub readiness: Option<ProbeSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub env: Vec<EnvDecl>,
}

/// A validated agent manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    /// Container image reference.
    pub container: String,
    pub install: Option<String>,
    pub postinstall: Vec<String>,
    pub start: Option<String>,
    pub agent: Option<String>,
    pub ports: Vec<PortSpec>,
    pub volumes: HashMap<String, String>,
    pub env: Vec<EnvDecl>,
    pub health: HealthConfig,
    pub profiles: HashMap<String, ProfileConfig>,
}

impl Manifest {
    /// Parse and validate a manifest from JSON text in one step.
    pub fn from_json(raw: &str) -> Result<Self> {
        RawManifest::from_json(raw)?.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> RawManifest {
        RawManifest {
            name: "demo".into(),
            container: "node:18-alpine".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_minimal_manifest_validates() {
        let m = minimal().validate().unwrap();
        assert_eq!(m.name, "demo");
        assert_eq!(m.container, "node:18-alpine");
        assert!(m.ports.is_empty());
        assert!(m.health.liveness.is_none());
    }

    #[test]
    fn test_missing_name_rejected() {
        let raw = RawManifest {
            container: "alpine".into(),
            ..Default::default()
        };
        assert!(raw.validate().is_err());
    }

    #[test]
    fn test_agent_without_start_rejected() {
        let mut raw = minimal();
        raw.agent = Some("node agent.js".into());
        assert!(raw.validate().is_err());
    }

    #[test]
    fn test_postinstall_string_or_list() {
        let mut raw = minimal();
        raw.postinstall = Some(StringOrList::One("npm install".into()));
        assert_eq!(raw.clone().validate().unwrap().postinstall, vec!["npm install"]);

        raw.postinstall = Some(StringOrList::Many(vec!["a".into(), "b".into()]));
        assert_eq!(raw.validate().unwrap().postinstall, vec!["a", "b"]);
    }

    #[test]
    fn test_port_spec_forms() {
        assert_eq!(PortSpec::parse("7000").unwrap(), PortSpec {
            host_ip: None,
            host_port: 7000,
            container_port: 7000,
        });
        assert_eq!(PortSpec::parse("8080:7000").unwrap(), PortSpec {
            host_ip: None,
            host_port: 8080,
            container_port: 7000,
        });
        assert_eq!(PortSpec::parse("127.0.0.1:8080:7000").unwrap(), PortSpec {
            host_ip: Some("127.0.0.1".into()),
            host_port: 8080,
            container_port: 7000,
        });
        assert!(PortSpec::parse("a:b").is_err());
        assert!(PortSpec::parse("1:2:3:4").is_err());
        assert!(PortSpec::parse("0:7000").is_err());
    }

    #[test]
    fn test_env_decl_parse() {
        assert_eq!(EnvDecl::parse("FOO=bar"), EnvDecl {
            name: "FOO".into(),
            value: Some("bar".into()),
        });
        assert_eq!(EnvDecl::parse("SECRET"), EnvDecl {
            name: "SECRET".into(),
            value: None,
        });
        // Values keep their '=' signs.
        assert_eq!(EnvDecl::parse("URL=a=b").value.as_deref(), Some("a=b"));
    }

    #[test]
    fn test_probe_defaults_applied() {
        let raw = RawProbe {
            script: "liveness.sh".into(),
            ..Default::default()
        };
        let probe = ProbeSpec::from_raw(&raw).unwrap();
        assert_eq!(probe.interval, Duration::from_secs(1));
        assert_eq!(probe.timeout, Duration::from_secs(5));
        assert_eq!(probe.success_threshold, 1);
        assert_eq!(probe.failure_threshold, 5);
    }

    #[test]
    fn test_probe_script_path_traversal_rejected() {
        for script in ["../evil.sh", "a/b.sh", "/abs.sh"] {
            let raw = RawProbe {
                script: script.into(),
                ..Default::default()
            };
            assert!(ProbeSpec::from_raw(&raw).is_err(), "{script} should be rejected");
        }
    }

    #[test]
    fn test_unknown_fields_preserved() {
        let json = r#"{"name":"demo","container":"alpine","webchat":{"cmd":"x"}}"#;
        let raw = RawManifest::from_json(json).unwrap();
        assert!(raw.extra.contains_key("webchat"));
        // ...but validation still succeeds without acting on them.
        assert!(raw.validate().is_ok());
    }

    #[test]
    fn test_health_parsed_from_json() {
        let json = r#"{
            "name": "demo",
            "container": "alpine",
            "health": {
                "liveness": {"script": "live.sh", "interval": 2, "failureThreshold": 3}
            }
        }"#;
        let m = Manifest::from_json(json).unwrap();
        let probe = m.health.liveness.unwrap();
        assert_eq!(probe.script, "live.sh");
        assert_eq!(probe.interval, Duration::from_secs(2));
        assert_eq!(probe.failure_threshold, 3);
        assert_eq!(probe.success_threshold, 1);
    }

    #[test]
    fn test_profiles_parsed() {
        let json = r#"{
            "name": "demo",
            "container": "alpine",
            "env": ["A=1", "TOKEN"],
            "profiles": {"default": {"env": ["A=2"]}}
        }"#;
        let m = Manifest::from_json(json).unwrap();
        assert_eq!(m.profiles["default"].env, vec![EnvDecl {
            name: "A".into(),
            value: Some("2".into()),
        }]);
    }
}
