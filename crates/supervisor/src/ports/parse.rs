//! Binding parser for the textual `Ports` column of `docker ps`.
//!
//! A listing looks like
//! `0.0.0.0:8080->80/tcp, :::8080->80/tcp, 5432/tcp` — bound mappings mixed
//! with merely-exposed ports and IPv6 duplicates of IPv4 entries.

use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

/// One host-port binding of a container.
///
/// `original_port` is the host port the mapping was first observed on; the
/// store rewrites it during refresh merges, the parser seeds it equal to
/// `host_port`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Binding {
    pub container_port: u16,
    pub host_port: u16,
    pub protocol: String,
    pub original_port: u16,
}

impl Binding {
    pub fn new(container_port: u16, host_port: u16, protocol: &str) -> Self {
        Binding {
            container_port,
            host_port,
            protocol: protocol.to_string(),
            original_port: host_port,
        }
    }

    /// Store key of the container-side endpoint, e.g. `80/tcp`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.container_port, self.protocol)
    }
}

impl fmt::Display for Binding {
    /// Canonical `H->C/P` form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}->{}/{}",
            self.host_port, self.container_port, self.protocol
        )
    }
}

fn binding_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"((\d+\.\d+\.\d+\.\d+):)?(\d+)->(\d+)/(\w+)").expect("binding regex")
    })
}

/// Parse every bound mapping out of a `Ports` string.
///
/// Fragments that do not match the grammar (exposed-only ports, separators)
/// are dropped without comment. Dual-stack listings repeat the same mapping
/// for the v4 and v6 wildcard, so identical (host, container, protocol)
/// triples collapse to one binding. Ports outside u16 are dropped.
pub fn parse_port_bindings(ports: &str) -> Vec<Binding> {
    let mut seen = HashSet::new();
    let mut bindings = Vec::new();

    for caps in binding_pattern().captures_iter(ports) {
        let host_port: u16 = match caps[3].parse() {
            Ok(p) => p,
            Err(_) => continue,
        };
        let container_port: u16 = match caps[4].parse() {
            Ok(p) => p,
            Err(_) => continue,
        };
        let protocol = &caps[5];

        if seen.insert((container_port, host_port, protocol.to_string())) {
            bindings.push(Binding::new(container_port, host_port, protocol));
        }
    }

    bindings
}
