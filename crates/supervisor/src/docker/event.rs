//! Event domain — container-scoped engine event streaming.
//!
//! Wraps `docker events --format {{json .}} --filter type=container` in a
//! lazy line stream. The child process dies with the stream handle, so a
//! dropped consumer can never leak a subscription.

use std::collections::HashMap;
use std::process::Stdio;

use async_stream::try_stream;
use futures_util::Stream;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use super::client::{DockerCli, DockerError};

/// One line of `docker events` output.
///
/// The daemon's legacy top-level `status`/`id` fields are the dispatch
/// keys; `Actor` carries the attribute map (name, image, compose labels).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct EventMessage {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub id: String,
    #[serde(rename = "Type", default)]
    pub typ: String,
    #[serde(rename = "Actor", default)]
    pub actor: EventActor,
    #[serde(default)]
    pub time: i64,
    #[serde(rename = "timeNano", default)]
    pub time_nano: i64,
    #[serde(default)]
    pub scope: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EventActor {
    #[serde(rename = "ID", default)]
    pub id: String,
    #[serde(rename = "Attributes", default)]
    pub attributes: HashMap<String, String>,
}

impl EventMessage {
    /// Container id, from the legacy field or the actor.
    pub fn container_id(&self) -> &str {
        if !self.id.is_empty() {
            &self.id
        } else {
            &self.actor.id
        }
    }
}

impl DockerCli {
    /// Subscribe to the engine's container event stream.
    ///
    /// Single-pass and unbounded; ends when the underlying process exits.
    /// Malformed lines are logged and skipped. A failure to spawn surfaces
    /// as the stream's first (and only) item.
    pub fn events(
        &self,
    ) -> impl Stream<Item = Result<EventMessage, DockerError>> + Send + 'static {
        let mut command = self.docker_command();
        try_stream! {
            let mut child = command
                .args([
                    "events",
                    "--format",
                    "{{json .}}",
                    "--filter",
                    "type=container",
                ])
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| DockerError::Unavailable(format!("failed to spawn events: {}", e)))?;

            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| DockerError::Unavailable("event stream has no stdout".into()))?;
            let mut lines = BufReader::new(stdout).lines();

            while let Some(line) = lines
                .next_line()
                .await
                .map_err(|e| DockerError::Unavailable(format!("event stream read: {}", e)))?
            {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<EventMessage>(line) {
                    Ok(event) => yield event,
                    Err(e) => warn!("skipping unparseable event line: {} ({})", line, e),
                }
            }
        }
    }
}
