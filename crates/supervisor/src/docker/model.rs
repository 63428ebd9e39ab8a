//! Typed shapes for `docker inspect` output and `docker run` specs.
//!
//! Only the attributes the recreator preserves are modeled. Structural
//! fields are required so that a daemon speaking a different dialect fails
//! loudly as `Malformed` instead of silently recreating a stripped
//! container; collections that the daemon legitimately nulls out default to
//! empty.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;

use super::client::DockerError;

/// `docker inspect <id>` element (the CLI returns an array).
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerDetails {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Config")]
    pub config: ContainerConfig,
    #[serde(rename = "HostConfig")]
    pub host_config: HostConfig,
    #[serde(rename = "Mounts", default)]
    pub mounts: Vec<MountPoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContainerConfig {
    #[serde(rename = "Image")]
    pub image: String,
    #[serde(rename = "Env", default)]
    pub env: Option<Vec<String>>,
    #[serde(rename = "Labels", default)]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    #[serde(rename = "NetworkMode")]
    pub network_mode: String,
    #[serde(rename = "PortBindings", default)]
    pub port_bindings: Option<HashMap<String, Option<Vec<PortBindingEntry>>>>,
    #[serde(rename = "RestartPolicy", default)]
    pub restart_policy: Option<RestartPolicy>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PortBindingEntry {
    #[serde(rename = "HostIp", default)]
    pub host_ip: String,
    #[serde(rename = "HostPort", default)]
    pub host_port: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MountPoint {
    #[serde(rename = "Source", default)]
    pub source: String,
    #[serde(rename = "Destination", default)]
    pub destination: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RestartPolicy {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "MaximumRetryCount", default)]
    pub maximum_retry_count: u32,
}

/// One bound host port taken from `HostConfig.PortBindings`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundPort {
    pub container_port: u16,
    pub protocol: String,
    pub host_ip: String,
    pub host_port: u16,
}

impl ContainerDetails {
    /// Container name without the leading `/` the daemon prepends.
    pub fn container_name(&self) -> &str {
        self.name.trim_start_matches('/')
    }

    /// Flatten `PortBindings` into numeric host bindings.
    ///
    /// An unparseable key or host port means the inspect output does not
    /// follow the daemon contract and the whole enumeration is rejected.
    pub fn bound_ports(&self) -> Result<Vec<BoundPort>, DockerError> {
        let mut out = Vec::new();
        let Some(map) = &self.host_config.port_bindings else {
            return Ok(out);
        };

        for (key, entries) in map {
            let (container_port, protocol) = split_port_key(key)?;
            for entry in entries.as_deref().unwrap_or(&[]) {
                if entry.host_port.is_empty() {
                    continue;
                }
                let host_port: u16 = entry.host_port.parse().map_err(|_| {
                    DockerError::Malformed(format!("host port `{}` in {}", entry.host_port, key))
                })?;
                out.push(BoundPort {
                    container_port,
                    protocol: protocol.to_string(),
                    host_ip: entry.host_ip.clone(),
                    host_port,
                });
            }
        }

        out.sort_by(|a, b| {
            (a.container_port, &a.protocol, a.host_port)
                .cmp(&(b.container_port, &b.protocol, b.host_port))
        });
        Ok(out)
    }

    /// Restart flag value for `docker run --restart`, when one is set.
    pub fn restart_flag(&self) -> Option<String> {
        let policy = self.host_config.restart_policy.as_ref()?;
        match policy.name.as_str() {
            "" | "no" => None,
            "on-failure" if policy.maximum_retry_count > 0 => {
                Some(format!("on-failure:{}", policy.maximum_retry_count))
            }
            name => Some(name.to_string()),
        }
    }
}

/// Split a `PortBindings` key such as `80/tcp`.
pub fn split_port_key(key: &str) -> Result<(u16, &str), DockerError> {
    let (port, proto) = key
        .split_once('/')
        .ok_or_else(|| DockerError::Malformed(format!("port key `{}`", key)))?;
    let port: u16 = port
        .parse()
        .map_err(|_| DockerError::Malformed(format!("port key `{}`", key)))?;
    Ok((port, proto))
}

/// Everything needed to launch a replacement container with `docker run -d`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSpec {
    pub name: String,
    pub image: String,
    pub network_mode: String,
    pub env: Vec<String>,
    /// `source:destination` pairs.
    pub mounts: Vec<String>,
    pub restart: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub ports: Vec<BoundPort>,
}

impl RunSpec {
    /// Argument vector after `docker`, image last.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            self.name.clone(),
        ];
        if !self.network_mode.is_empty() {
            args.push("--network".to_string());
            args.push(self.network_mode.clone());
        }
        if let Some(restart) = &self.restart {
            args.push("--restart".to_string());
            args.push(restart.clone());
        }
        for env in &self.env {
            args.push("-e".to_string());
            args.push(env.clone());
        }
        for mount in &self.mounts {
            args.push("-v".to_string());
            args.push(mount.clone());
        }
        for (key, value) in &self.labels {
            args.push("-l".to_string());
            args.push(format!("{}={}", key, value));
        }
        for port in &self.ports {
            args.push("-p".to_string());
            args.push(publish_arg(port));
        }
        args.push(self.image.clone());
        args
    }
}

/// `-p` value for one binding.
///
/// A concrete host IP keeps the three-part form; the wildcard and the empty
/// IP collapse to `host:container`. Non-tcp protocols carry the suffix so
/// the replacement binds the same protocol.
fn publish_arg(port: &BoundPort) -> String {
    let base = if port.host_ip.is_empty() || port.host_ip == "0.0.0.0" {
        format!("{}:{}", port.host_port, port.container_port)
    } else {
        format!("{}:{}:{}", port.host_ip, port.host_port, port.container_port)
    };
    if port.protocol == "tcp" {
        base
    } else {
        format!("{}/{}", base, port.protocol)
    }
}
