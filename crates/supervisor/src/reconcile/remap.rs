//! Recreator — atomically replaces a container with an equivalent one
//! whose host binding on a given container-side port has been moved.
//!
//! "Atomic" from the supervisor's point of view: the id is committed to the
//! processed set before the first destructive step, so whatever events the
//! stop/remove/run sequence produces can never re-enter relocation. There
//! is no rollback; a half-finished sequence leaves the host one container
//! short until an operator intervenes.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{info, warn};

use crate::client::docker::DockerOps;
use crate::docker::client::DockerError;
use crate::docker::inventory::{SENTINEL_LABEL, SENTINEL_VALUE};
use crate::docker::model::{BoundPort, ContainerDetails, RunSpec};
use crate::state::AppState;

const STOP_GRACE_SECS: u32 = 10;
const POST_STOP_SETTLE: Duration = Duration::from_secs(1);

/// One scheduled port move.
#[derive(Debug, Clone)]
pub struct Relocation {
    pub container_port: u16,
    pub protocol: String,
    pub old_host_port: u16,
    /// Host port the binding was first observed on; survives the container.
    pub original_host_port: u16,
    pub new_host_port: u16,
}

impl Relocation {
    pub fn key(&self) -> String {
        format!("{}/{}", self.container_port, self.protocol)
    }
}

/// Replace `id` with an equivalent container whose binding on
/// `plan.container_port/protocol` sits on `plan.new_host_port`.
/// Returns the replacement's id.
pub async fn remap(state: &AppState, id: &str, plan: &Relocation) -> Result<String, DockerError> {
    let docker = state.docker.as_ref();

    state.store.mark_processed(docker, id).await;

    let details = docker
        .inspect(id)
        .await
        .map_err(|e| DockerError::RecreateFailed(format!("inspect {}: {}", id, e)))?;
    let spec = build_replacement_spec(&details, plan)
        .map_err(|e| DockerError::RecreateFailed(format!("port bindings of {}: {}", id, e)))?;

    if let Err(stop_err) = docker.stop(id, STOP_GRACE_SECS).await {
        warn!("stop {} failed ({}); killing", id, stop_err);
        docker
            .kill(id)
            .await
            .map_err(|e| DockerError::RecreateFailed(format!("kill {}: {}", id, e)))?;
    }
    tokio::time::sleep(POST_STOP_SETTLE).await;

    docker
        .remove(id)
        .await
        .map_err(|e| DockerError::RecreateFailed(format!("remove {}: {}", id, e)))?;

    let new_id = docker
        .run(&spec)
        .await
        .map_err(|e| DockerError::RecreateFailed(format!("launch replacement of {}: {}", id, e)))?;

    // Seed the original before the replacement shows up in any listing so
    // the relocated binding never reads as freshly bound.
    state
        .store
        .record_original(&spec.name, &plan.key(), plan.original_host_port);
    state.store.mark_processed(docker, &new_id).await;

    info!(
        "relocated {} ({}) {}: host {} -> {}; replacement {}",
        spec.name,
        id,
        plan.key(),
        plan.old_host_port,
        plan.new_host_port,
        new_id
    );
    Ok(new_id)
}

/// Collect the preserved attributes and rewrite exactly one binding.
///
/// Preserved: name, image, environment, mounts, network mode, restart
/// policy, labels, every other port binding verbatim. Knowingly dropped:
/// health checks, user, working dir, entrypoint/command overrides,
/// capabilities, sysctls, ulimits, devices, tmpfs, log config.
pub(crate) fn build_replacement_spec(
    details: &ContainerDetails,
    plan: &Relocation,
) -> Result<RunSpec, DockerError> {
    let mut ports = details.bound_ports()?;
    ports.retain(|p| !(p.container_port == plan.container_port && p.protocol == plan.protocol));
    ports.push(BoundPort {
        container_port: plan.container_port,
        protocol: plan.protocol.clone(),
        host_ip: String::new(),
        host_port: plan.new_host_port,
    });
    ports.sort_by(|a, b| {
        (a.container_port, &a.protocol, a.host_port).cmp(&(b.container_port, &b.protocol, b.host_port))
    });

    let mut labels: BTreeMap<String, String> = details
        .config
        .labels
        .clone()
        .unwrap_or_default()
        .into_iter()
        .collect();
    labels.insert(SENTINEL_LABEL.to_string(), SENTINEL_VALUE.to_string());

    Ok(RunSpec {
        name: details.container_name().to_string(),
        image: details.config.image.clone(),
        network_mode: details.host_config.network_mode.clone(),
        env: details.config.env.clone().unwrap_or_default(),
        mounts: details
            .mounts
            .iter()
            .map(|m| format!("{}:{}", m.source, m.destination))
            .collect(),
        restart: details.restart_flag(),
        labels,
        ports,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::client::docker::DockerOps;
    use crate::client::fake::{FakeContainer, FakeDocker};
    use crate::config::SupervisorConfig;

    fn relocation(cport: u16, proto: &str, old: u16, new: u16) -> Relocation {
        Relocation {
            container_port: cport,
            protocol: proto.to_string(),
            old_host_port: old,
            original_host_port: old,
            new_host_port: new,
        }
    }

    fn state_with(fake: Arc<FakeDocker>) -> AppState {
        AppState::new(fake, SupervisorConfig::default())
    }

    #[test]
    fn test_build_replacement_spec_rewrites_one_binding() {
        let json = r#"
        {
            "Name": "/web",
            "Config": {"Image": "nginx", "Env": ["A=1"], "Labels": {"x": "y"}},
            "HostConfig": {
                "NetworkMode": "bridge",
                "PortBindings": {
                    "80/tcp": [{"HostIp": "0.0.0.0", "HostPort": "8080"}],
                    "443/tcp": [{"HostIp": "10.0.0.1", "HostPort": "8443"}]
                }
            },
            "Mounts": [{"Source": "/srv", "Destination": "/data"}]
        }"#;
        let details: ContainerDetails = serde_json::from_str(json).unwrap();
        let spec =
            build_replacement_spec(&details, &relocation(80, "tcp", 8080, 12345)).unwrap();

        assert_eq!(spec.name, "web");
        assert_eq!(spec.image, "nginx");
        assert_eq!(spec.mounts, vec!["/srv:/data".to_string()]);
        assert_eq!(spec.labels.get("x"), Some(&"y".to_string()));
        assert_eq!(
            spec.labels.get(SENTINEL_LABEL),
            Some(&SENTINEL_VALUE.to_string())
        );

        let moved = spec.ports.iter().find(|p| p.container_port == 80).unwrap();
        assert_eq!(moved.host_port, 12345);
        assert_eq!(moved.host_ip, "");

        // The 443 binding is carried over verbatim, host ip included.
        let kept = spec.ports.iter().find(|p| p.container_port == 443).unwrap();
        assert_eq!(kept.host_port, 8443);
        assert_eq!(kept.host_ip, "10.0.0.1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_remap_replaces_container() {
        let fake = Arc::new(FakeDocker::new());
        fake.add_container(FakeContainer::new("old1", "web", "nginx").with_port(8080, 80, "tcp"))
            .await;
        let state = state_with(fake.clone());

        let new_id = remap(&state, "old1", &relocation(80, "tcp", 8080, 12345))
            .await
            .unwrap();

        assert_eq!(fake.removed().await, vec!["old1".to_string()]);
        let replacement = fake.container(&new_id).await.unwrap();
        assert_eq!(replacement.name, "web");
        assert_eq!(replacement.ports[0].host_port, 12345);
        assert_eq!(
            replacement.labels.get(SENTINEL_LABEL),
            Some(&SENTINEL_VALUE.to_string())
        );

        // Both the old and the new id are committed.
        assert!(state.store.is_processed(state.docker.as_ref(), "old1").await);
        assert!(state.store.is_processed(state.docker.as_ref(), &new_id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remap_seeds_original_for_refresh() {
        let fake = Arc::new(FakeDocker::new());
        fake.add_container(FakeContainer::new("old1", "web", "nginx").with_port(8080, 80, "tcp"))
            .await;
        let state = state_with(fake.clone());

        remap(&state, "old1", &relocation(80, "tcp", 8080, 12345))
            .await
            .unwrap();
        state.store.refresh(state.docker.as_ref()).await.unwrap();

        let all = state.store.get_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].bindings[0].host_port, 12345);
        assert_eq!(all[0].bindings[0].original_port, 8080);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remap_falls_back_to_kill() {
        let fake = Arc::new(FakeDocker::new());
        fake.add_container(FakeContainer::new("old1", "web", "nginx").with_port(8080, 80, "tcp"))
            .await;
        fake.fail_stop("old1").await;
        let state = state_with(fake.clone());

        let new_id = remap(&state, "old1", &relocation(80, "tcp", 8080, 12345))
            .await
            .unwrap();
        assert!(fake.container(&new_id).await.is_some());
        assert!(fake.container("old1").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remap_missing_container_fails() {
        let fake = Arc::new(FakeDocker::new());
        let state = state_with(fake);

        let err = remap(&state, "ghost", &relocation(80, "tcp", 8080, 12345))
            .await
            .unwrap_err();
        assert!(matches!(err, DockerError::RecreateFailed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remap_run_failure_leaves_no_replacement() {
        let fake = Arc::new(FakeDocker::new());
        fake.add_container(FakeContainer::new("old1", "web", "nginx").with_port(8080, 80, "tcp"))
            .await;
        let state = state_with(fake.clone());
        fake.fail_next_run();

        let err = remap(&state, "old1", &relocation(80, "tcp", 8080, 12345))
            .await
            .unwrap_err();
        assert!(matches!(err, DockerError::RecreateFailed(_)));
        // The old container is gone and nothing replaced it; the next
        // refresh observes the gap.
        assert!(fake.container("old1").await.is_none());
        assert!(DockerOps::list(&*fake).await.unwrap().is_empty());
    }
}
