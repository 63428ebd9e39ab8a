//! Compose launch path: pre-plan, hand off to docker-compose, clean up.

pub mod plan;

use std::path::Path;

use tokio::process::Command;
use tracing::{info, warn};

use crate::docker::client::DockerError;
use crate::state::AppState;

/// Pre-plan a descriptor and launch it through docker-compose, passing the
/// remaining CLI arguments straight through. Returns the runtime's exit
/// code; the rewritten descriptor (if any) is unlinked before returning.
pub async fn run_compose(
    state: &AppState,
    file: &str,
    args: &[String],
) -> Result<i32, DockerError> {
    // Snapshot what is already bound before judging conflicts.
    state.store.refresh(state.docker.as_ref()).await?;

    let outcome = plan::plan(
        state.docker.as_ref(),
        &state.store,
        &state.allocator,
        file,
    )
    .await?;

    for (key, port) in &outcome.remapped {
        info!("remapped {} -> {}", key, port);
    }

    let effective = outcome
        .descriptor
        .as_deref()
        .unwrap_or_else(|| Path::new(file));
    let code = exec_compose(&state.config.compose_bin, effective, args).await?;

    if let Some(path) = outcome.descriptor {
        if let Err(e) = std::fs::remove_file(&path) {
            warn!("could not unlink {}: {}", path.display(), e);
        }
    }
    Ok(code)
}

/// Run `docker-compose -f <file> <args…>` with inherited stdio.
async fn exec_compose(
    compose_bin: &str,
    file: &Path,
    args: &[String],
) -> Result<i32, DockerError> {
    let status = Command::new(compose_bin)
        .arg("-f")
        .arg(file)
        .args(args)
        .status()
        .await
        .map_err(|e| DockerError::Unavailable(format!("failed to spawn {}: {}", compose_bin, e)))?;
    Ok(status.code().unwrap_or(-1))
}
