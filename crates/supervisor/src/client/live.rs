//! Live — implements `DockerOps` for the real CLI-backed `DockerCli`.

use std::pin::Pin;

use crate::client::docker::DockerOps;
use crate::docker::client::{DockerCli, DockerError};
use crate::docker::event::EventMessage;
use crate::docker::inventory::ContainerInfo;
use crate::docker::model::{ContainerDetails, RunSpec};

impl DockerOps for DockerCli {
    fn list(
        &self,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Vec<ContainerInfo>, DockerError>> + Send + '_>> {
        Box::pin(self.list())
    }

    fn inspect<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<ContainerDetails, DockerError>> + Send + 'a>> {
        Box::pin(self.inspect(id))
    }

    fn stop<'a>(
        &'a self,
        id: &'a str,
        grace_secs: u32,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<(), DockerError>> + Send + 'a>> {
        Box::pin(self.stop(id, grace_secs))
    }

    fn kill<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<(), DockerError>> + Send + 'a>> {
        Box::pin(self.kill(id))
    }

    fn remove<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<(), DockerError>> + Send + 'a>> {
        Box::pin(self.remove(id))
    }

    fn run<'a>(
        &'a self,
        spec: &'a RunSpec,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<String, DockerError>> + Send + 'a>> {
        Box::pin(self.run(spec))
    }

    fn get_label<'a>(
        &'a self,
        id: &'a str,
        key: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Option<String>, DockerError>> + Send + 'a>> {
        Box::pin(self.get_label(id, key))
    }

    fn update_label<'a>(
        &'a self,
        id: &'a str,
        key: &'a str,
        value: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<(), DockerError>> + Send + 'a>> {
        Box::pin(self.update_label(id, key, value))
    }

    fn events(
        &self,
    ) -> Pin<Box<dyn tokio_stream::Stream<Item = Result<EventMessage, DockerError>> + Send>> {
        Box::pin(DockerCli::events(self))
    }

    fn compose_config<'a>(
        &'a self,
        path: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<String, DockerError>> + Send + 'a>> {
        Box::pin(self.compose_config(path))
    }
}
