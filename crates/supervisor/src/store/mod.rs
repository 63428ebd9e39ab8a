//! Container store — the supervisor's authoritative view of the host.
//!
//! Three maps behind one `RwLock`: container records by id, the
//! original-port index, and the processed id set. Refresh swaps in a whole
//! new view under a single exclusive acquisition so readers never observe a
//! half-applied merge, and no runtime call is ever made while a lock is
//! held.

use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::RwLock;
use tracing::debug;

use crate::client::docker::DockerOps;
use crate::docker::client::DockerError;
use crate::docker::inventory::{ContainerInfo, SENTINEL_LABEL, SENTINEL_VALUE};

/// Synthetic group for containers without a project.
pub const STANDALONE_GROUP: &str = "standalone";

#[derive(Default)]
struct Inner {
    /// Records by container id, replaced wholesale on refresh.
    containers: HashMap<String, ContainerInfo>,
    /// `name → "<cport>/<proto>" → first-observed host port`.
    ///
    /// Keyed by name because recreation changes the id but preserves the
    /// name. An entry lives as long as its name stays in the listing; once
    /// the name disappears the entry is pruned on the next refresh, so an
    /// unrelated later container reusing the name starts from its own
    /// first-observed ports.
    originals: HashMap<String, HashMap<String, u16>>,
    /// Names whose `originals` entry must survive the next refresh even if
    /// the name is absent from it: the recreator seeds these between
    /// removing the old container and its replacement being listed.
    shielded: HashSet<String>,
    /// Ids this supervisor has examined and committed to.
    processed: HashSet<String>,
}

#[derive(Default)]
pub struct ContainerStore {
    inner: RwLock<Inner>,
}

impl ContainerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reload the view from a fresh listing.
    ///
    /// Present containers keep their first-observed `original` per
    /// container-side key; unseen keys are recorded with
    /// `original = current`. Processed ids, records, and original-port
    /// entries whose containers are absent from the listing are evicted
    /// (originals get a one-refresh grace when freshly seeded by the
    /// recreator). A failed listing leaves the prior view intact.
    pub async fn refresh(&self, docker: &dyn DockerOps) -> Result<(), DockerError> {
        let listed = docker.list().await?;

        let mut guard = self.inner.write();
        let inner = &mut *guard;

        let listed_names: HashSet<&str> = listed.iter().map(|c| c.name.as_str()).collect();
        let shielded = &inner.shielded;
        inner
            .originals
            .retain(|name, _| listed_names.contains(name.as_str()) || shielded.contains(name));
        inner.shielded.clear();

        let mut containers = HashMap::with_capacity(listed.len());
        for mut info in listed {
            let known = inner.originals.entry(info.name.clone()).or_default();
            for binding in &mut info.bindings {
                binding.original_port = *known
                    .entry(binding.key())
                    .or_insert(binding.host_port);
            }
            containers.insert(info.id.clone(), info);
        }
        inner.processed.retain(|id| containers.contains_key(id));
        inner.containers = containers;
        Ok(())
    }

    /// Deep copy of all tracked containers, ordered by name.
    pub fn get_all(&self) -> Vec<ContainerInfo> {
        let mut all: Vec<ContainerInfo> = self.inner.read().containers.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Containers grouped by project; the project-less land under
    /// [`STANDALONE_GROUP`].
    pub fn group_by_project(&self) -> BTreeMap<String, Vec<ContainerInfo>> {
        let mut groups: BTreeMap<String, Vec<ContainerInfo>> = BTreeMap::new();
        for info in self.get_all() {
            let project = if info.project.is_empty() {
                STANDALONE_GROUP.to_string()
            } else {
                info.project.clone()
            };
            groups.entry(project).or_default().push(info);
        }
        groups
    }

    /// Drop one container from the record map and the processed set.
    /// The original-port index is left alone: a replacement with the same
    /// name may be alive or about to be.
    pub fn remove(&self, id: &str) {
        let mut inner = self.inner.write();
        inner.containers.remove(id);
        inner.processed.remove(id);
    }

    /// Record an id as examined. The in-memory set is authoritative; the
    /// sentinel label is a best-effort on-disk mirror.
    pub async fn mark_processed(&self, docker: &dyn DockerOps, id: &str) {
        self.inner.write().processed.insert(id.to_string());
        if let Err(e) = docker.update_label(id, SENTINEL_LABEL, SENTINEL_VALUE).await {
            debug!("sentinel label write failed for {}: {}", id, e);
        }
    }

    /// Whether an id has been examined, consulting the sentinel label on a
    /// set miss. Positive label answers are cached.
    pub async fn is_processed(&self, docker: &dyn DockerOps, id: &str) -> bool {
        if self.inner.read().processed.contains(id) {
            return true;
        }
        match docker.get_label(id, SENTINEL_LABEL).await {
            Ok(Some(value)) if value == SENTINEL_VALUE => {
                self.inner.write().processed.insert(id.to_string());
                true
            }
            _ => false,
        }
    }

    /// Seed the original-port index for a (name, key) pair. First write
    /// wins; refreshes never move an original once it is on record. The
    /// name is also shielded from pruning through the next refresh, which
    /// may still run before the recreator's replacement shows up in a
    /// listing.
    pub fn record_original(&self, name: &str, key: &str, port: u16) {
        let mut inner = self.inner.write();
        inner.shielded.insert(name.to_string());
        inner
            .originals
            .entry(name.to_string())
            .or_default()
            .entry(key.to_string())
            .or_insert(port);
    }

    /// The `original` on record for a tracked container's binding.
    pub fn original_for(&self, id: &str, key: &str) -> Option<u16> {
        let inner = self.inner.read();
        let info = inner.containers.get(id)?;
        info.bindings
            .iter()
            .find(|b| b.key() == key)
            .map(|b| b.original_port)
    }

    /// Whether any tracked binding occupies `port`, regardless of protocol.
    pub fn port_in_use(&self, port: u16) -> bool {
        self.inner
            .read()
            .containers
            .values()
            .flat_map(|c| &c.bindings)
            .any(|b| b.host_port == port)
    }

    /// Whether a container other than `id` holds `(port, proto)`.
    pub fn held_by_other(&self, id: &str, port: u16, proto: &str) -> bool {
        self.inner
            .read()
            .containers
            .values()
            .filter(|c| c.id != id)
            .flat_map(|c| &c.bindings)
            .any(|b| b.host_port == port && b.protocol == proto)
    }

    /// Snapshot of every tracked `(host port, protocol)` pair.
    pub fn bound_ports(&self) -> HashSet<(u16, String)> {
        self.inner
            .read()
            .containers
            .values()
            .flat_map(|c| &c.bindings)
            .map(|b| (b.host_port, b.protocol.clone()))
            .collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().containers.contains_key(id)
    }
}
