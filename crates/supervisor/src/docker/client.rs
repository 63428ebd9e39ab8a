//! Docker client — CLI process gateway, core struct, error types.
//!
//! Domain methods live in sibling modules (`container`, `event`) which add
//! `impl DockerCli` blocks. Everything talks to the runtime by shelling out
//! to the `docker` / `docker-compose` binaries.

use thiserror::Error;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum DockerError {
    #[error("docker runtime unavailable: {0}")]
    Unavailable(String),
    #[error("container not found: {0}")]
    NotFound(String),
    #[error("unparseable runtime output: {0}")]
    Malformed(String),
    #[error("`{verb}` exited with status {status}: {stderr}")]
    CommandFailed {
        verb: String,
        status: i32,
        stderr: String,
    },
    #[error("recreate aborted: {0}")]
    RecreateFailed(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct DockerCli {
    /// Binary used for single-container verbs (`ps`, `inspect`, `run`, …).
    pub(super) docker_bin: String,
    /// Binary used for descriptor rendering (`docker-compose … config`).
    pub(super) compose_bin: String,
}

impl DockerCli {
    pub fn new(docker_bin: &str, compose_bin: &str) -> Self {
        DockerCli {
            docker_bin: docker_bin.to_string(),
            compose_bin: compose_bin.to_string(),
        }
    }

    /// Build a `tokio::process::Command` for the Docker CLI.
    pub(super) fn docker_command(&self) -> Command {
        Command::new(&self.docker_bin)
    }

    /// Build a `tokio::process::Command` for the compose CLI.
    pub(super) fn compose_command(&self) -> Command {
        Command::new(&self.compose_bin)
    }

    /// Run a docker subcommand to completion and return its stdout.
    ///
    /// Spawn failure means the runtime itself is unreachable. A non-zero
    /// exit is classified by stderr: the daemon's "No such container"
    /// family maps to [`DockerError::NotFound`], anything else surfaces as
    /// [`DockerError::CommandFailed`].
    pub(super) async fn exec(&self, args: &[&str]) -> Result<String, DockerError> {
        let output = self
            .docker_command()
            .args(args)
            .output()
            .await
            .map_err(|e| {
                DockerError::Unavailable(format!("failed to spawn {}: {}", self.docker_bin, e))
            })?;

        if output.status.success() {
            String::from_utf8(output.stdout)
                .map_err(|e| DockerError::Malformed(format!("non-utf8 output: {}", e)))
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if is_not_found(&stderr) {
                let id = args.last().copied().unwrap_or_default();
                return Err(DockerError::NotFound(id.to_string()));
            }
            Err(DockerError::CommandFailed {
                verb: args.first().copied().unwrap_or_default().to_string(),
                status: output.status.code().unwrap_or(-1),
                stderr,
            })
        }
    }
}

fn is_not_found(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("no such container") || lower.contains("no such object")
}
