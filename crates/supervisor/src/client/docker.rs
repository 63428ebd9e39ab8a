//! Runtime trait — abstract interface over all container-runtime operations.
//!
//! Every domain module reaches the runtime through this trait.
//! `live.rs` provides the real CLI-backed implementation.
//! `fake.rs` provides a test double.

use std::pin::Pin;

use crate::docker::client::DockerError;
use crate::docker::event::EventMessage;
use crate::docker::inventory::ContainerInfo;
use crate::docker::model::{ContainerDetails, RunSpec};

/// Unified async interface over the container runtime.
///
/// Object-safe thanks to `Pin<Box<…>>` returns. Implementations must be
/// `Send + Sync` so they can live inside the shared app state.
pub trait DockerOps: Send + Sync {
    // ── Queries ─────────────────────────────────────────────────

    fn list(
        &self,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Vec<ContainerInfo>, DockerError>> + Send + '_>>;

    fn inspect<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<ContainerDetails, DockerError>> + Send + 'a>>;

    // ── Lifecycle ───────────────────────────────────────────────

    fn stop<'a>(
        &'a self,
        id: &'a str,
        grace_secs: u32,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<(), DockerError>> + Send + 'a>>;

    fn kill<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<(), DockerError>> + Send + 'a>>;

    fn remove<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<(), DockerError>> + Send + 'a>>;

    fn run<'a>(
        &'a self,
        spec: &'a RunSpec,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<String, DockerError>> + Send + 'a>>;

    // ── Labels ──────────────────────────────────────────────────

    fn get_label<'a>(
        &'a self,
        id: &'a str,
        key: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Option<String>, DockerError>> + Send + 'a>>;

    fn update_label<'a>(
        &'a self,
        id: &'a str,
        key: &'a str,
        value: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<(), DockerError>> + Send + 'a>>;

    // ── Events ──────────────────────────────────────────────────

    fn events(
        &self,
    ) -> Pin<Box<dyn tokio_stream::Stream<Item = Result<EventMessage, DockerError>> + Send>>;

    // ── Compose ─────────────────────────────────────────────────

    fn compose_config<'a>(
        &'a self,
        path: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<String, DockerError>> + Send + 'a>>;
}
