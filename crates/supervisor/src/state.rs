use std::sync::Arc;

use crate::client::docker::DockerOps;
use crate::config::SupervisorConfig;
use crate::ports::alloc::PortAllocator;
use crate::store::ContainerStore;

pub struct AppState {
    pub docker: Arc<dyn DockerOps>,
    pub store: ContainerStore,
    pub allocator: PortAllocator,
    pub config: SupervisorConfig,
}

impl AppState {
    pub fn new(docker: Arc<dyn DockerOps>, config: SupervisorConfig) -> Self {
        let allocator = PortAllocator::new(config.min_port, config.max_port);
        Self {
            docker,
            store: ContainerStore::new(),
            allocator,
            config,
        }
    }
}

pub type SharedState = Arc<AppState>;
