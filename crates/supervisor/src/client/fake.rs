//! Fake — test double for runtime operations.
//!
//! Provides a deterministic [`FakeDocker`] that implements [`DockerOps`]
//! using in-memory state. Useful for unit-testing the reconciler and the
//! pre-planner without a running Docker daemon.

use std::collections::HashMap;
use std::pin::Pin;

use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::Mutex;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::client::docker::DockerOps;
use crate::docker::client::DockerError;
use crate::docker::event::EventMessage;
use crate::docker::inventory::{infer_project_service, ContainerInfo};
use crate::docker::model::{
    BoundPort, ContainerConfig, ContainerDetails, HostConfig, MountPoint, PortBindingEntry,
    RestartPolicy, RunSpec,
};
use crate::ports::parse::Binding;

// ── In-memory state ─────────────────────────────────────────────

/// A canned container for the fake store.
#[derive(Clone, Debug)]
pub struct FakeContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    pub network_mode: String,
    pub env: Vec<String>,
    pub mounts: Vec<String>,
    pub restart: Option<String>,
    pub labels: HashMap<String, String>,
    pub ports: Vec<BoundPort>,
    pub running: bool,
}

impl FakeContainer {
    pub fn new(id: &str, name: &str, image: &str) -> Self {
        FakeContainer {
            id: id.to_string(),
            name: name.to_string(),
            image: image.to_string(),
            network_mode: "bridge".to_string(),
            env: Vec::new(),
            mounts: Vec::new(),
            restart: None,
            labels: HashMap::new(),
            ports: Vec::new(),
            running: true,
        }
    }

    pub fn with_port(mut self, host_port: u16, container_port: u16, protocol: &str) -> Self {
        self.ports.push(BoundPort {
            container_port,
            protocol: protocol.to_string(),
            host_ip: "0.0.0.0".to_string(),
            host_port,
        });
        self
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    fn info(&self) -> ContainerInfo {
        let (project, service) = infer_project_service(&self.labels, &self.name);
        ContainerInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            image: self.image.clone(),
            status: "Up Less than a second".to_string(),
            project,
            service,
            bindings: self
                .ports
                .iter()
                .map(|p| Binding::new(p.container_port, p.host_port, &p.protocol))
                .collect(),
        }
    }

    fn details(&self) -> ContainerDetails {
        let mut port_bindings: HashMap<String, Option<Vec<PortBindingEntry>>> = HashMap::new();
        for port in &self.ports {
            port_bindings
                .entry(format!("{}/{}", port.container_port, port.protocol))
                .or_insert_with(|| Some(Vec::new()))
                .get_or_insert_with(Vec::new)
                .push(PortBindingEntry {
                    host_ip: port.host_ip.clone(),
                    host_port: port.host_port.to_string(),
                });
        }

        let restart_policy = self.restart.as_deref().map(|r| {
            let (name, count) = r.split_once(':').unwrap_or((r, "0"));
            RestartPolicy {
                name: name.to_string(),
                maximum_retry_count: count.parse().unwrap_or(0),
            }
        });

        ContainerDetails {
            name: format!("/{}", self.name),
            config: ContainerConfig {
                image: self.image.clone(),
                env: Some(self.env.clone()),
                labels: Some(self.labels.clone()),
            },
            host_config: HostConfig {
                network_mode: self.network_mode.clone(),
                port_bindings: Some(port_bindings),
                restart_policy,
            },
            mounts: self
                .mounts
                .iter()
                .map(|m| {
                    let (source, destination) = m.split_once(':').unwrap_or((m.as_str(), ""));
                    MountPoint {
                        source: source.to_string(),
                        destination: destination.to_string(),
                    }
                })
                .collect(),
        }
    }
}

/// Mutable inner state protected by a mutex.
#[derive(Default)]
struct Inner {
    containers: HashMap<String, FakeContainer>,
    compose_configs: HashMap<String, String>,
    removed: Vec<String>,
    run_specs: Vec<RunSpec>,
    fail_stop_ids: Vec<String>,
    next_id: u64,
}

/// A fake runtime client for deterministic testing.
///
/// All methods operate on in-memory state. The seed helpers allow
/// pre-populating containers and compose renders before running test code.
#[derive(Default)]
pub struct FakeDocker {
    inner: Mutex<Inner>,
    // Sync lock: `events()` registers subscribers without awaiting.
    event_senders: std::sync::Mutex<Vec<UnboundedSender<Result<EventMessage, DockerError>>>>,
    fail_next_list: std::sync::atomic::AtomicBool,
    fail_next_run: std::sync::atomic::AtomicBool,
}

impl FakeDocker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a container into the fake store.
    pub async fn add_container(&self, container: FakeContainer) {
        let mut state = self.inner.lock().await;
        state.containers.insert(container.id.clone(), container);
    }

    /// Seed a canonical compose render for a descriptor path.
    pub async fn add_compose_config(&self, path: &str, rendered: &str) {
        self.inner
            .lock()
            .await
            .compose_configs
            .insert(path.to_string(), rendered.to_string());
    }

    /// Make `stop` fail for an id, forcing callers onto the kill path.
    pub async fn fail_stop(&self, id: &str) {
        self.inner.lock().await.fail_stop_ids.push(id.to_string());
    }

    /// Make the next `list` call fail as if the daemon were unreachable.
    pub fn fail_next_list(&self) {
        self.fail_next_list
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }

    /// Make the next `run` call fail as the daemon would on a bad spec.
    pub fn fail_next_run(&self) {
        self.fail_next_run
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }

    /// Deliver an event to every subscribed stream.
    pub fn push_event(&self, event: EventMessage) {
        self.event_senders
            .lock()
            .unwrap()
            .retain(|tx| tx.send(Ok(event.clone())).is_ok());
    }

    /// Ids removed so far, in order.
    pub async fn removed(&self) -> Vec<String> {
        self.inner.lock().await.removed.clone()
    }

    /// Specs passed to `run` so far, in order.
    pub async fn run_specs(&self) -> Vec<RunSpec> {
        self.inner.lock().await.run_specs.clone()
    }

    pub async fn container(&self, id: &str) -> Option<FakeContainer> {
        self.inner.lock().await.containers.get(id).cloned()
    }

    pub async fn container_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.lock().await.containers.keys().cloned().collect();
        ids.sort();
        ids
    }
}

// ── DockerOps implementation ────────────────────────────────────

impl DockerOps for FakeDocker {
    fn list(
        &self,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Vec<ContainerInfo>, DockerError>> + Send + '_>> {
        Box::pin(async {
            if self
                .fail_next_list
                .swap(false, std::sync::atomic::Ordering::SeqCst)
            {
                return Err(DockerError::Unavailable("simulated list failure".into()));
            }
            let state = self.inner.lock().await;
            let mut infos: Vec<ContainerInfo> = state
                .containers
                .values()
                .filter(|c| c.running)
                .map(|c| c.info())
                .collect();
            infos.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(infos)
        })
    }

    fn inspect<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<ContainerDetails, DockerError>> + Send + 'a>> {
        Box::pin(async move {
            let state = self.inner.lock().await;
            state
                .containers
                .get(id)
                .map(|c| c.details())
                .ok_or_else(|| DockerError::NotFound(id.to_string()))
        })
    }

    fn stop<'a>(
        &'a self,
        id: &'a str,
        _grace_secs: u32,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<(), DockerError>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            if state.fail_stop_ids.iter().any(|f| f == id) {
                return Err(DockerError::CommandFailed {
                    verb: "stop".to_string(),
                    status: 1,
                    stderr: "simulated stop failure".to_string(),
                });
            }
            match state.containers.get_mut(id) {
                Some(c) => {
                    c.running = false;
                    Ok(())
                }
                None => Err(DockerError::NotFound(id.to_string())),
            }
        })
    }

    fn kill<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<(), DockerError>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            match state.containers.get_mut(id) {
                Some(c) => {
                    c.running = false;
                    Ok(())
                }
                None => Err(DockerError::NotFound(id.to_string())),
            }
        })
    }

    fn remove<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<(), DockerError>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            if state.containers.remove(id).is_none() {
                return Err(DockerError::NotFound(id.to_string()));
            }
            state.removed.push(id.to_string());
            Ok(())
        })
    }

    fn run<'a>(
        &'a self,
        spec: &'a RunSpec,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<String, DockerError>> + Send + 'a>> {
        Box::pin(async move {
            if self
                .fail_next_run
                .swap(false, std::sync::atomic::Ordering::SeqCst)
            {
                return Err(DockerError::CommandFailed {
                    verb: "run".to_string(),
                    status: 125,
                    stderr: "simulated run failure".to_string(),
                });
            }
            let mut state = self.inner.lock().await;
            state.next_id += 1;
            let id = format!("fake{:04}", state.next_id);
            state.run_specs.push(spec.clone());
            state.containers.insert(
                id.clone(),
                FakeContainer {
                    id: id.clone(),
                    name: spec.name.clone(),
                    image: spec.image.clone(),
                    network_mode: spec.network_mode.clone(),
                    env: spec.env.clone(),
                    mounts: spec.mounts.clone(),
                    restart: spec.restart.clone(),
                    labels: spec.labels.clone().into_iter().collect(),
                    ports: spec.ports.clone(),
                    running: true,
                },
            );
            Ok(id)
        })
    }

    fn get_label<'a>(
        &'a self,
        id: &'a str,
        key: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Option<String>, DockerError>> + Send + 'a>> {
        Box::pin(async move {
            let state = self.inner.lock().await;
            state
                .containers
                .get(id)
                .map(|c| c.labels.get(key).cloned())
                .ok_or_else(|| DockerError::NotFound(id.to_string()))
        })
    }

    fn update_label<'a>(
        &'a self,
        id: &'a str,
        key: &'a str,
        value: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<(), DockerError>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            match state.containers.get_mut(id) {
                Some(c) => {
                    c.labels.insert(key.to_string(), value.to_string());
                    Ok(())
                }
                None => Err(DockerError::NotFound(id.to_string())),
            }
        })
    }

    fn events(
        &self,
    ) -> Pin<Box<dyn tokio_stream::Stream<Item = Result<EventMessage, DockerError>> + Send>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.event_senders.lock().unwrap().push(tx);
        Box::pin(UnboundedReceiverStream::new(rx))
    }

    fn compose_config<'a>(
        &'a self,
        path: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<String, DockerError>> + Send + 'a>> {
        Box::pin(async move {
            let state = self.inner.lock().await;
            state.compose_configs.get(path).cloned().ok_or_else(|| {
                DockerError::CommandFailed {
                    verb: "compose config".to_string(),
                    status: 1,
                    stderr: format!("no such descriptor: {}", path),
                }
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_lifecycle() {
        let fake = FakeDocker::new();
        fake.add_container(FakeContainer::new("a1", "web", "nginx").with_port(8080, 80, "tcp"))
            .await;

        let listed = DockerOps::list(&fake).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].bindings[0].host_port, 8080);

        DockerOps::stop(&fake, "a1", 10).await.unwrap();
        assert!(DockerOps::list(&fake).await.unwrap().is_empty());

        DockerOps::remove(&fake, "a1").await.unwrap();
        assert!(matches!(
            DockerOps::inspect(&fake, "a1").await,
            Err(DockerError::NotFound(_))
        ));
        assert_eq!(fake.removed().await, vec!["a1".to_string()]);
    }

    #[tokio::test]
    async fn test_fake_run_creates_container() {
        let fake = FakeDocker::new();
        let spec = RunSpec {
            name: "web".into(),
            image: "nginx".into(),
            network_mode: "bridge".into(),
            ..RunSpec::default()
        };
        let id = DockerOps::run(&fake, &spec).await.unwrap();
        let details = DockerOps::inspect(&fake, &id).await.unwrap();
        assert_eq!(details.container_name(), "web");
        assert_eq!(fake.run_specs().await.len(), 1);
    }

    #[tokio::test]
    async fn test_fake_round_trips_inspect_shape() {
        let fake = FakeDocker::new();
        fake.add_container(
            FakeContainer::new("a1", "db", "postgres")
                .with_port(5432, 5432, "tcp")
                .with_label("com.docker.compose.project", "shop"),
        )
        .await;

        let details = DockerOps::inspect(&fake, "a1").await.unwrap();
        let ports = details.bound_ports().unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].host_port, 5432);
        assert_eq!(
            details.config.labels.unwrap().get("com.docker.compose.project"),
            Some(&"shop".to_string())
        );
    }
}
