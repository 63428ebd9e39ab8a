//! Reconciler — turns engine events into store updates and relocations.
//!
//! One reader task consumes the event stream and dispatches every event to
//! a fire-and-forget worker. Workers for different containers race freely;
//! workers for the same container are serialized by nothing but the
//! processed set, which is exactly why the set is consulted before any
//! destructive step.

pub mod remap;

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::sleep;
use tokio_stream::StreamExt;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::client::docker::DockerOps;
use crate::docker::client::DockerError;
use crate::docker::event::EventMessage;
use crate::state::{AppState, SharedState};
use remap::{remap, Relocation};

/// Wait after a start event so the runtime has committed the host config.
const START_SETTLE: Duration = Duration::from_millis(500);
/// Debounce for events with no dedicated handling.
const EVENT_DEBOUNCE: Duration = Duration::from_millis(300);
/// Backoff after the event stream ends normally.
const RESUBSCRIBE_AFTER_END: Duration = Duration::from_secs(5);
/// Backoff after the event consumer panics.
const RESUBSCRIBE_AFTER_PANIC: Duration = Duration::from_secs(2);

/// Events that end a container's life as far as the store is concerned.
const TERMINAL_EVENTS: &[&str] = &["die", "stop", "kill", "destroy", "remove"];

/// Host ports below this are privileged; a container that managed to bind
/// one was started outside this supervisor's policy and is moved into the
/// dynamic range no matter what else is running.
const PRIVILEGED_PORT_LIMIT: u16 = 1024;

/// Consume the event stream forever, re-subscribing when it ends or when
/// the consumer dies. Runs until the surrounding runtime shuts down.
pub async fn run_event_loop(state: SharedState, tracker: TaskTracker) {
    loop {
        let consumer = tokio::spawn(consume_events(state.clone(), tracker.clone()));
        match consumer.await {
            Ok(()) => {
                warn!(
                    "event stream ended; re-subscribing in {:?}",
                    RESUBSCRIBE_AFTER_END
                );
                sleep(RESUBSCRIBE_AFTER_END).await;
            }
            Err(e) if e.is_panic() => {
                error!(
                    "event consumer panicked; re-subscribing in {:?}",
                    RESUBSCRIBE_AFTER_PANIC
                );
                sleep(RESUBSCRIBE_AFTER_PANIC).await;
            }
            Err(_) => return,
        }
    }
}

async fn consume_events(state: SharedState, tracker: TaskTracker) {
    let mut stream = state.docker.events();
    while let Some(item) = stream.next().await {
        match item {
            Ok(event) => {
                if event.container_id().is_empty() {
                    continue;
                }
                let state = state.clone();
                tracker.spawn(handle_event(state, event));
            }
            Err(e) => warn!("event stream error: {}", e),
        }
    }
}

/// Worker body for a single event.
pub async fn handle_event(state: SharedState, event: EventMessage) {
    let id = event.container_id().to_string();
    match event.status.as_str() {
        "start" => {
            if let Err(e) = handle_start(&state, &id).await {
                warn!("start handling for {} failed: {}", id, e);
            }
        }
        status if TERMINAL_EVENTS.contains(&status) => {
            debug!("container {} reached terminal event `{}`", id, status);
            state.store.remove(&id);
            refresh(&state).await;
        }
        _ => {
            sleep(EVENT_DEBOUNCE).await;
            refresh(&state).await;
        }
    }
}

async fn refresh(state: &AppState) {
    if let Err(e) = state.store.refresh(state.docker.as_ref()).await {
        warn!("refresh failed: {}", e);
    }
}

/// Core start-event algorithm.
///
/// The processed-set check up front is the invariant that breaks restart
/// loops: once a container has been recreated or approved it is never
/// touched again, even when a duplicate or late event arrives.
pub async fn handle_start(state: &AppState, id: &str) -> Result<(), DockerError> {
    sleep(START_SETTLE).await;

    let docker = state.docker.as_ref();
    if state.store.is_processed(docker, id).await {
        refresh(state).await;
        return Ok(());
    }

    let details = match docker.inspect(id).await {
        Ok(details) => details,
        Err(DockerError::NotFound(_)) => {
            debug!("container {} vanished before inspection", id);
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    let bound = details.bound_ports()?;

    // Ports inside the dynamic range were assigned by this supervisor or a
    // prior run of it; a container living entirely in the range is settled.
    if bound
        .iter()
        .all(|p| state.allocator.in_range(p.host_port))
    {
        state.store.mark_processed(docker, id).await;
        refresh(state).await;
        return Ok(());
    }

    let mut drawn: HashSet<u16> = HashSet::new();
    let mut plans: Vec<Relocation> = Vec::new();
    for port in &bound {
        // A privileged port is never a legitimate long-term binding under
        // this policy; everything else moves only when another tracked
        // container already holds the same (port, protocol).
        let needs_move = port.host_port < PRIVILEGED_PORT_LIMIT
            || state
                .store
                .held_by_other(id, port.host_port, &port.protocol);
        if !needs_move {
            continue;
        }

        let new_port = state.allocator.allocate_avoiding(&state.store, &drawn);
        drawn.insert(new_port);
        let key = format!("{}/{}", port.container_port, port.protocol);
        let original = state
            .store
            .original_for(id, &key)
            .unwrap_or(port.host_port);
        plans.push(Relocation {
            container_port: port.container_port,
            protocol: port.protocol.clone(),
            old_host_port: port.host_port,
            original_host_port: original,
            new_host_port: new_port,
        });
    }

    if plans.is_empty() {
        state.store.mark_processed(docker, id).await;
        refresh(state).await;
        return Ok(());
    }

    if let Some(project) = details
        .config
        .labels
        .as_ref()
        .and_then(|l| l.get("com.docker.compose.project"))
    {
        warn!(
            "replacing container {} of compose project `{}`; the replacement \
             is divorced from the project's lifecycle",
            id, project
        );
    }

    // Committed before the first destructive step: if the replacement's
    // start event outruns the recreator's own bookkeeping, the processed
    // set already covers this id.
    state.store.mark_processed(docker, id).await;

    let mut current = id.to_string();
    for plan in &plans {
        info!(
            "relocating {} {}: host {} -> {}",
            current,
            plan.key(),
            plan.old_host_port,
            plan.new_host_port
        );
        current = remap(state, &current, plan).await?;
    }
    refresh(state).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::client::fake::{FakeContainer, FakeDocker};
    use crate::config::SupervisorConfig;

    fn state_with(fake: Arc<FakeDocker>) -> SharedState {
        Arc::new(AppState::new(fake, SupervisorConfig::default()))
    }

    fn start_event(id: &str) -> EventMessage {
        EventMessage {
            status: "start".to_string(),
            id: id.to_string(),
            typ: "container".to_string(),
            ..EventMessage::default()
        }
    }

    // A free registered port outside the range needs no action.
    #[tokio::test(start_paused = true)]
    async fn test_start_without_conflict_takes_no_action() {
        let fake = Arc::new(FakeDocker::new());
        fake.add_container(FakeContainer::new("a1", "app", "app").with_port(5000, 5000, "tcp"))
            .await;
        let state = state_with(fake.clone());

        handle_start(&state, "a1").await.unwrap();

        assert!(fake.run_specs().await.is_empty());
        assert!(state.store.is_processed(state.docker.as_ref(), "a1").await);
        let all = state.store.get_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].bindings[0].host_port, 5000);
        assert_eq!(all[0].bindings[0].original_port, 5000);
    }

    // A port held by another tracked container forces a relocation.
    #[tokio::test(start_paused = true)]
    async fn test_start_with_external_conflict_relocates() {
        let fake = Arc::new(FakeDocker::new());
        fake.add_container(FakeContainer::new("a1", "web", "nginx").with_port(8080, 80, "tcp"))
            .await;
        let state = state_with(fake.clone());
        state.store.refresh(state.docker.as_ref()).await.unwrap();

        fake.add_container(FakeContainer::new("b1", "api", "api").with_port(8080, 80, "tcp"))
            .await;
        handle_start(&state, "b1").await.unwrap();

        assert_eq!(fake.removed().await, vec!["b1".to_string()]);
        let specs = fake.run_specs().await;
        assert_eq!(specs.len(), 1);
        let new_port = specs[0].ports[0].host_port;
        assert!(state.allocator.in_range(new_port));

        let all = state.store.get_all();
        assert_eq!(all.len(), 2);
        let replacement = all.iter().find(|c| c.name == "api").unwrap();
        assert_ne!(replacement.id, "b1");
        assert_eq!(replacement.bindings[0].host_port, new_port);
        assert_eq!(replacement.bindings[0].original_port, 8080);
        // The untouched neighbor keeps its binding.
        let neighbor = all.iter().find(|c| c.name == "web").unwrap();
        assert_eq!(neighbor.bindings[0].host_port, 8080);
        // Runtime side agrees: the original id is gone for good.
        assert!(!fake.container_ids().await.contains(&"b1".to_string()));
    }

    // A binding already inside the dynamic range is left alone.
    #[tokio::test(start_paused = true)]
    async fn test_start_already_dynamic_is_approved() {
        let fake = Arc::new(FakeDocker::new());
        fake.add_container(FakeContainer::new("c1", "svc", "svc").with_port(54321, 80, "tcp"))
            .await;
        let state = state_with(fake.clone());

        handle_start(&state, "c1").await.unwrap();

        assert!(fake.run_specs().await.is_empty());
        assert!(state.store.is_processed(state.docker.as_ref(), "c1").await);
        let all = state.store.get_all();
        assert_eq!(all[0].bindings[0].host_port, 54321);
        assert_eq!(all[0].bindings[0].original_port, 54321);
    }

    // A privileged port is moved even with nothing else running.
    #[tokio::test(start_paused = true)]
    async fn test_start_privileged_port_relocates_unconditionally() {
        let fake = Arc::new(FakeDocker::new());
        fake.add_container(FakeContainer::new("d1", "edge", "nginx").with_port(80, 80, "tcp"))
            .await;
        let state = state_with(fake.clone());

        handle_start(&state, "d1").await.unwrap();

        let specs = fake.run_specs().await;
        assert_eq!(specs.len(), 1);
        assert!(state.allocator.in_range(specs[0].ports[0].host_port));
        let all = state.store.get_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].bindings[0].original_port, 80);
    }

    // The replacement's own start event must not re-relocate it.
    #[tokio::test(start_paused = true)]
    async fn test_no_restart_loop_after_remap() {
        let fake = Arc::new(FakeDocker::new());
        fake.add_container(FakeContainer::new("a1", "web", "nginx").with_port(8080, 80, "tcp"))
            .await;
        let state = state_with(fake.clone());
        state.store.refresh(state.docker.as_ref()).await.unwrap();

        fake.add_container(FakeContainer::new("e1", "api", "api").with_port(8080, 80, "tcp"))
            .await;
        handle_start(&state, "e1").await.unwrap();
        assert_eq!(fake.run_specs().await.len(), 1);

        let replacement_id = state
            .store
            .get_all()
            .into_iter()
            .find(|c| c.name == "api")
            .unwrap()
            .id;
        handle_start(&state, &replacement_id).await.unwrap();

        // Exactly one recreation in total.
        assert_eq!(fake.run_specs().await.len(), 1);
        assert_eq!(fake.removed().await.len(), 1);
    }

    // Property: feeding the same start event twice equals feeding it once.
    #[tokio::test(start_paused = true)]
    async fn test_duplicate_start_event_is_idempotent() {
        let fake = Arc::new(FakeDocker::new());
        fake.add_container(FakeContainer::new("a1", "web", "nginx").with_port(8080, 80, "tcp"))
            .await;
        let state = state_with(fake.clone());
        state.store.refresh(state.docker.as_ref()).await.unwrap();

        fake.add_container(FakeContainer::new("b1", "api", "api").with_port(8080, 80, "tcp"))
            .await;
        handle_start(&state, "b1").await.unwrap();
        let after_first = state.store.get_all();

        // The duplicate event arrives late, for an id that no longer exists.
        handle_start(&state, "b1").await.unwrap();
        let after_second = state.store.get_all();

        assert_eq!(fake.run_specs().await.len(), 1);
        assert_eq!(after_first.len(), after_second.len());
        for (a, b) in after_first.iter().zip(after_second.iter()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.bindings, b.bindings);
        }
    }

    // A container with several offending bindings is recreated per binding,
    // each remap chaining onto the previous replacement.
    #[tokio::test(start_paused = true)]
    async fn test_multi_binding_relocation_chains() {
        let fake = Arc::new(FakeDocker::new());
        fake.add_container(
            FakeContainer::new("m1", "edge", "proxy")
                .with_port(80, 80, "tcp")
                .with_port(443, 443, "tcp"),
        )
        .await;
        let state = state_with(fake.clone());

        handle_start(&state, "m1").await.unwrap();

        let specs = fake.run_specs().await;
        assert_eq!(specs.len(), 2);
        let all = state.store.get_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].bindings.len(), 2);
        let ports: Vec<u16> = all[0].bindings.iter().map(|b| b.host_port).collect();
        assert!(ports.iter().all(|p| state.allocator.in_range(*p)));
        assert_ne!(ports[0], ports[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_for_vanished_container_is_skipped() {
        let fake = Arc::new(FakeDocker::new());
        let state = state_with(fake.clone());
        handle_start(&state, "ghost").await.unwrap();
        assert!(fake.run_specs().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_event_drops_container() {
        let fake = Arc::new(FakeDocker::new());
        fake.add_container(FakeContainer::new("a1", "web", "nginx")).await;
        let state = state_with(fake.clone());
        state.store.refresh(state.docker.as_ref()).await.unwrap();
        state.store.mark_processed(state.docker.as_ref(), "a1").await;

        crate::client::docker::DockerOps::remove(&*fake, "a1")
            .await
            .unwrap();
        let event = EventMessage {
            status: "die".to_string(),
            id: "a1".to_string(),
            ..EventMessage::default()
        };
        handle_event(state.clone(), event).await;

        assert!(!state.store.contains("a1"));
        assert!(!state.store.is_processed(state.docker.as_ref(), "a1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unclassified_event_refreshes_after_debounce() {
        let fake = Arc::new(FakeDocker::new());
        fake.add_container(FakeContainer::new("a1", "web", "nginx")).await;
        let state = state_with(fake.clone());

        let event = EventMessage {
            status: "create".to_string(),
            id: "a1".to_string(),
            ..EventMessage::default()
        };
        handle_event(state.clone(), event).await;

        assert!(state.store.contains("a1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sentinel_label_alone_suppresses_relocation() {
        let fake = Arc::new(FakeDocker::new());
        // Looks like a conflict, but a prior supervisor run stamped it.
        fake.add_container(FakeContainer::new("a1", "web", "nginx").with_port(8080, 80, "tcp"))
            .await;
        let state = state_with(fake.clone());
        state.store.refresh(state.docker.as_ref()).await.unwrap();

        fake.add_container(
            FakeContainer::new("b1", "api", "api")
                .with_port(8080, 80, "tcp")
                .with_label(
                    crate::docker::inventory::SENTINEL_LABEL,
                    crate::docker::inventory::SENTINEL_VALUE,
                ),
        )
        .await;
        handle_start(&state, "b1").await.unwrap();

        assert!(fake.run_specs().await.is_empty());
    }

    // End-to-end through the event stream: reader dispatches, worker acts.
    #[tokio::test(start_paused = true)]
    async fn test_event_loop_dispatches_start() {
        let fake = Arc::new(FakeDocker::new());
        fake.add_container(FakeContainer::new("a1", "web", "nginx").with_port(8080, 80, "tcp"))
            .await;
        let state = state_with(fake.clone());
        state.store.refresh(state.docker.as_ref()).await.unwrap();

        let tracker = TaskTracker::new();
        let reader = tokio::spawn(consume_events(state.clone(), tracker.clone()));
        tokio::task::yield_now().await;

        fake.add_container(FakeContainer::new("b1", "api", "api").with_port(8080, 80, "tcp"))
            .await;
        fake.push_event(start_event("b1"));
        // Let the worker run through its settle sleep.
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(fake.run_specs().await.len(), 1);

        drop(fake);
        reader.abort();
        tracker.close();
        tracker.wait().await;
    }
}
