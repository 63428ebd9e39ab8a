//! Container domain — list, inspect, lifecycle, run, and label verbs.

use tracing::warn;

use super::client::{DockerCli, DockerError};
use super::inventory::{ContainerInfo, PsLine};
use super::model::{ContainerDetails, RunSpec};

impl DockerCli {
    /// `docker ps --format {{json .}} --no-trunc` for all running containers.
    pub async fn list(&self) -> Result<Vec<ContainerInfo>, DockerError> {
        let stdout = self
            .exec(&["ps", "--format", "{{json .}}", "--no-trunc"])
            .await?;
        Ok(parse_ps_output(&stdout))
    }

    /// Full typed record for one container.
    pub async fn inspect(&self, id: &str) -> Result<ContainerDetails, DockerError> {
        let stdout = self.exec(&["inspect", id]).await?;
        parse_inspect_output(id, &stdout)
    }

    /// Stop with a grace period in seconds.
    pub async fn stop(&self, id: &str, grace_secs: u32) -> Result<(), DockerError> {
        let grace = grace_secs.to_string();
        self.exec(&["stop", "--time", &grace, id]).await?;
        Ok(())
    }

    pub async fn kill(&self, id: &str) -> Result<(), DockerError> {
        self.exec(&["kill", id]).await?;
        Ok(())
    }

    pub async fn remove(&self, id: &str) -> Result<(), DockerError> {
        self.exec(&["rm", id]).await?;
        Ok(())
    }

    /// Launch a detached container and return its id.
    pub async fn run(&self, spec: &RunSpec) -> Result<String, DockerError> {
        let args = spec.to_args();
        let argv: Vec<&str> = args.iter().map(String::as_str).collect();
        let stdout = self.exec(&argv).await?;
        parse_run_output(&stdout)
    }

    /// Read a single label value, `None` when unset.
    pub async fn get_label(&self, id: &str, key: &str) -> Result<Option<String>, DockerError> {
        let format = format!("{{{{index .Config.Labels \"{}\"}}}}", key);
        let stdout = self.exec(&["inspect", "--format", &format, id]).await?;
        let value = stdout.trim();
        if value.is_empty() || value == "<no value>" {
            Ok(None)
        } else {
            Ok(Some(value.to_string()))
        }
    }

    /// Best-effort label write on a live container.
    pub async fn update_label(
        &self,
        id: &str,
        key: &str,
        value: &str,
    ) -> Result<(), DockerError> {
        let pair = format!("{}={}", key, value);
        self.exec(&["container", "update", "--label", &pair, id])
            .await?;
        Ok(())
    }

    /// Render a compose descriptor to its canonical form.
    pub async fn compose_config(&self, path: &str) -> Result<String, DockerError> {
        let output = self
            .compose_command()
            .args(["-f", path, "config"])
            .output()
            .await
            .map_err(|e| DockerError::Unavailable(format!("failed to spawn compose: {}", e)))?;

        if output.status.success() {
            String::from_utf8(output.stdout)
                .map_err(|e| DockerError::Malformed(format!("non-utf8 compose output: {}", e)))
        } else {
            Err(DockerError::CommandFailed {
                verb: "compose config".to_string(),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

/// Decode `ps` output, one JSON object per line. Unparseable lines are
/// logged and skipped so one rogue line cannot poison a refresh.
pub(crate) fn parse_ps_output(stdout: &str) -> Vec<ContainerInfo> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match serde_json::from_str::<PsLine>(line) {
            Ok(ps) => Some(ContainerInfo::from(ps)),
            Err(e) => {
                warn!("skipping unparseable ps line: {} ({})", line, e);
                None
            }
        })
        .collect()
}

pub(crate) fn parse_inspect_output(
    id: &str,
    stdout: &str,
) -> Result<ContainerDetails, DockerError> {
    let mut records: Vec<ContainerDetails> = serde_json::from_str(stdout)
        .map_err(|e| DockerError::Malformed(format!("inspect {}: {}", id, e)))?;
    if records.is_empty() {
        return Err(DockerError::NotFound(id.to_string()));
    }
    Ok(records.remove(0))
}

pub(crate) fn parse_run_output(stdout: &str) -> Result<String, DockerError> {
    let id = stdout.lines().next().unwrap_or("").trim();
    if id.is_empty() {
        return Err(DockerError::Malformed("run produced no container id".into()));
    }
    Ok(id.to_string())
}
