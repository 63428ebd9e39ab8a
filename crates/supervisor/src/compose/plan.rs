//! Group pre-planner — rewrites a compose descriptor so none of its
//! published host ports collides with a tracked binding or a port the OS
//! is already serving.
//!
//! Works on the runtime's canonical render (`docker-compose -f … config`),
//! so anchors, extends-chains, and env interpolation are already resolved
//! by the time the `services` table is inspected.

use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::PathBuf;

use serde_yaml::Value;
use tracing::info;

use crate::client::docker::DockerOps;
use crate::docker::client::DockerError;
use crate::ports::alloc::{probe_listen, PortAllocator};
use crate::store::ContainerStore;

/// Result of a pre-planning pass.
#[derive(Debug)]
pub struct PlanOutcome {
    /// `"<service>:<host-port>" → replacement host port`.
    pub remapped: BTreeMap<String, u16>,
    /// Rewritten descriptor, present iff `remapped` is non-empty. The
    /// caller unlinks it after invoking the runtime.
    pub descriptor: Option<PathBuf>,
}

/// Render, inspect, and (when needed) rewrite a descriptor.
pub async fn plan(
    docker: &dyn DockerOps,
    store: &ContainerStore,
    allocator: &PortAllocator,
    path: &str,
) -> Result<PlanOutcome, DockerError> {
    let rendered = docker.compose_config(path).await?;
    let mut doc: Value = serde_yaml::from_str(&rendered)
        .map_err(|e| DockerError::Malformed(format!("compose render of {}: {}", path, e)))?;

    let remapped = rewrite_services(&mut doc, store, allocator);
    if remapped.is_empty() {
        return Ok(PlanOutcome {
            remapped,
            descriptor: None,
        });
    }

    let yaml = serde_yaml::to_string(&doc)
        .map_err(|e| DockerError::Malformed(format!("reserializing descriptor: {}", e)))?;
    let mut file = tempfile::Builder::new()
        .prefix("dynamic-ports-")
        .suffix(".yml")
        .tempfile()?;
    file.write_all(yaml.as_bytes())?;
    let kept = file.into_temp_path().keep().map_err(|e| e.error)?;

    Ok(PlanOutcome {
        remapped,
        descriptor: Some(kept),
    })
}

/// Walk `services.*.ports` and substitute every conflicting published port
/// in place, preserving each entry's form.
fn rewrite_services(
    doc: &mut Value,
    store: &ContainerStore,
    allocator: &PortAllocator,
) -> BTreeMap<String, u16> {
    let mut remapped = BTreeMap::new();
    let tracked = store.bound_ports();
    let mut drawn: HashSet<u16> = HashSet::new();

    let Some(services) = doc.get_mut("services").and_then(Value::as_mapping_mut) else {
        return remapped;
    };

    for (name, service) in services.iter_mut() {
        let service_name = name.as_str().unwrap_or_default().to_string();
        let Some(ports) = service.get_mut("ports").and_then(Value::as_sequence_mut) else {
            continue;
        };

        for entry in ports.iter_mut() {
            let Some((host, proto)) = published_port(entry) else {
                continue;
            };
            let conflicts = tracked.contains(&(host, proto.clone())) || !probe_listen(host);
            if !conflicts {
                continue;
            }

            let replacement = allocator.allocate_avoiding(store, &drawn);
            drawn.insert(replacement);
            set_published_port(entry, replacement);
            info!(
                "pre-plan: {}:{} -> {} ({})",
                service_name, host, replacement, proto
            );
            remapped.insert(format!("{}:{}", service_name, host), replacement);
        }
    }

    remapped
}

/// The `(host port, protocol)` a ports entry publishes, if any.
///
/// Handles the string form `"[IP:]H:C[/P]"` and the table form
/// `{published, target, protocol?}` with string-or-integer values.
/// Entries exposing only a container port have nothing to relocate.
fn published_port(entry: &Value) -> Option<(u16, String)> {
    match entry {
        Value::String(s) => {
            let (body, proto) = split_protocol(s);
            let parts: Vec<&str> = body.split(':').collect();
            let host = match parts.len() {
                2 => parts[0],
                3 => parts[1],
                _ => return None,
            };
            Some((host.parse().ok()?, proto.unwrap_or("tcp").to_string()))
        }
        Value::Mapping(map) => {
            let host = value_as_port(map.get("published")?)?;
            let proto = map
                .get("protocol")
                .and_then(Value::as_str)
                .unwrap_or("tcp")
                .to_string();
            Some((host, proto))
        }
        _ => None,
    }
}

/// Substitute the published port in place, string staying string (IP prefix
/// and protocol suffix intact) and table staying table (published keeping
/// its string/integer type).
fn set_published_port(entry: &mut Value, new_host: u16) {
    match entry {
        Value::String(s) => {
            let (body, proto) = split_protocol(s);
            let parts: Vec<&str> = body.split(':').collect();
            let rebuilt = match parts.len() {
                2 => format!("{}:{}", new_host, parts[1]),
                3 => format!("{}:{}:{}", parts[0], new_host, parts[2]),
                _ => return,
            };
            *s = match proto {
                Some(p) => format!("{}/{}", rebuilt, p),
                None => rebuilt,
            };
        }
        Value::Mapping(map) => {
            let was_string = matches!(map.get("published"), Some(Value::String(_)));
            let value = if was_string {
                Value::String(new_host.to_string())
            } else {
                Value::Number(new_host.into())
            };
            map.insert(Value::String("published".into()), value);
        }
        _ => {}
    }
}

fn split_protocol(s: &str) -> (&str, Option<&str>) {
    match s.rsplit_once('/') {
        Some((body, proto)) => (body, Some(proto)),
        None => (s, None),
    }
}

fn value_as_port(value: &Value) -> Option<u16> {
    match value {
        Value::Number(n) => u16::try_from(n.as_u64()?).ok(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
