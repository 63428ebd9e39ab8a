//! Container inventory model derived from `docker ps` output.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ports::parse::{parse_port_bindings, Binding};

/// Label asserting that this supervisor already owns a container's ports.
/// Presence is trusted; absence proves nothing (labels can be lost).
pub const SENTINEL_LABEL: &str = "com.dynamic-port-mapper.has-dynamic-ports";
pub const SENTINEL_VALUE: &str = "true";

/// Project label keys, most authoritative first.
const PROJECT_LABELS: &[&str] = &[
    "com.docker.compose.project",
    "docker-compose.project",
    "io.compose.project",
    "com.docker.project",
    "project",
];

/// Service label keys, same precedence order as the project keys.
const SERVICE_LABELS: &[&str] = &[
    "com.docker.compose.service",
    "docker-compose.service",
    "io.compose.service",
    "com.docker.service",
    "service",
];

/// One line of `docker ps --format {{json .}}` output.
///
/// The runtime contract guarantees `ID, Image, Command, RunningFor, Status,
/// Ports, Names`; `Labels` rides along on every daemon we target but is
/// tolerated missing.
#[derive(Debug, Deserialize)]
pub struct PsLine {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Image")]
    pub image: String,
    #[serde(rename = "Names")]
    pub names: String,
    #[serde(rename = "Status", default)]
    pub status: String,
    #[serde(rename = "Ports", default)]
    pub ports: String,
    #[serde(rename = "Labels", default)]
    pub labels: String,
}

/// Basic container information tracked by the store.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerInfo {
    pub id: String,
    /// Without leading slash.
    pub name: String,
    pub image: String,
    /// Human-readable, e.g. "Up 2 hours".
    pub status: String,
    /// Compose project, or empty when the container is standalone.
    pub project: String,
    /// Service name within the project, or empty.
    pub service: String,
    pub bindings: Vec<Binding>,
}

impl From<PsLine> for ContainerInfo {
    fn from(line: PsLine) -> Self {
        let name = line
            .names
            .split(',')
            .next()
            .unwrap_or("")
            .trim_start_matches('/')
            .to_string();
        let labels = parse_label_list(&line.labels);
        let (project, service) = infer_project_service(&labels, &name);

        ContainerInfo {
            id: line.id,
            name,
            image: line.image,
            status: line.status,
            project,
            service,
            bindings: parse_port_bindings(&line.ports),
        }
    }
}

/// Decode the `Labels` column (`k1=v1,k2=v2`) into a map.
pub fn parse_label_list(labels: &str) -> HashMap<String, String> {
    labels
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .collect()
}

/// Resolve the (project, service) pair for a container.
///
/// Compose labels win; when none are present the container name is split on
/// `_` (compose v1 naming, `project_service_1`) and as a last resort on `-`
/// (compose v2 naming, needs at least three parts to be trusted).
pub fn infer_project_service(
    labels: &HashMap<String, String>,
    name: &str,
) -> (String, String) {
    let project = first_label(labels, PROJECT_LABELS);
    let service = first_label(labels, SERVICE_LABELS);
    if let Some(project) = project {
        return (project, service.unwrap_or_default());
    }

    let underscore: Vec<&str> = name.split('_').collect();
    if underscore.len() >= 2 {
        return (underscore[0].to_string(), underscore[1].to_string());
    }

    let dash: Vec<&str> = name.split('-').collect();
    if dash.len() >= 3 {
        return (dash[0].to_string(), service.unwrap_or_default());
    }

    (String::new(), service.unwrap_or_default())
}

fn first_label(labels: &HashMap<String, String>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| labels.get(*k))
        .filter(|v| !v.is_empty())
        .cloned()
}
