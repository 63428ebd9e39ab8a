//! Port allocator for the dynamic range.
//!
//! Random selection instead of a linear scan: with a few dozen containers
//! in a 55k-wide range, a uniform draw almost always lands on a free port
//! on the first try and never herds concurrent allocations toward the
//! bottom of the range.

use std::collections::HashSet;
use std::net::TcpListener;

use rand::Rng;
use tracing::warn;

use crate::store::ContainerStore;

/// Probes per allocation before giving up on verification.
const MAX_PROBES: u32 = 100;

#[derive(Debug, Clone, Copy)]
pub struct PortAllocator {
    min: u16,
    max: u16,
}

impl PortAllocator {
    pub fn new(min: u16, max: u16) -> Self {
        PortAllocator { min, max }
    }

    pub fn min(&self) -> u16 {
        self.min
    }

    pub fn max(&self) -> u16 {
        self.max
    }

    /// Whether a port lies inside the dynamic range.
    pub fn in_range(&self, port: u16) -> bool {
        (self.min..=self.max).contains(&port)
    }

    /// Draw a free port from the dynamic range.
    ///
    /// A candidate is accepted when no tracked binding uses it (any
    /// protocol) and a local TCP listen succeeds. After [`MAX_PROBES`]
    /// rejections the next draw is returned unchecked; callers get a port
    /// either way and the degradation is only logged.
    pub fn allocate(&self, store: &ContainerStore) -> u16 {
        self.allocate_avoiding(store, &HashSet::new())
    }

    /// Like [`allocate`](Self::allocate) but also rejecting ports the
    /// caller has already drawn and not yet applied (the store cannot see
    /// those).
    pub fn allocate_avoiding(&self, store: &ContainerStore, reserved: &HashSet<u16>) -> u16 {
        let mut rng = rand::rng();
        for _ in 0..MAX_PROBES {
            let candidate = rng.random_range(self.min..=self.max);
            if reserved.contains(&candidate) || store.port_in_use(candidate) {
                continue;
            }
            if !probe_listen(candidate) {
                continue;
            }
            return candidate;
        }

        let fallback = rng.random_range(self.min..=self.max);
        warn!(
            "no verified free port after {} probes in [{}, {}]; handing out {} unchecked",
            MAX_PROBES, self.min, self.max, fallback
        );
        fallback
    }
}

/// True when the local interface will accept a listener on `port`.
/// The listener is dropped immediately; this is a probe, not a reservation.
pub fn probe_listen(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_within_range() {
        let store = ContainerStore::new();
        let alloc = PortAllocator::new(21000, 21999);
        for _ in 0..20 {
            let port = alloc.allocate(&store);
            assert!(alloc.in_range(port));
        }
    }

    #[test]
    fn test_single_port_range() {
        let store = ContainerStore::new();
        let alloc = PortAllocator::new(22345, 22345);
        assert_eq!(alloc.allocate(&store), 22345);
    }

    #[test]
    fn test_degraded_mode_still_returns_a_port() {
        let store = ContainerStore::new();
        // Hold the only port in the range so every probe fails.
        let _listener = TcpListener::bind(("127.0.0.1", 22346)).unwrap();
        let alloc = PortAllocator::new(22346, 22346);
        assert_eq!(alloc.allocate(&store), 22346);
    }

    #[test]
    fn test_reserved_ports_skipped_until_exhausted() {
        let store = ContainerStore::new();
        let alloc = PortAllocator::new(22400, 22401);
        let reserved = HashSet::from([22400]);
        // 22401 is the only acceptable candidate; the draw loop must find it.
        let port = alloc.allocate_avoiding(&store, &reserved);
        assert_eq!(port, 22401);
    }

    #[test]
    fn test_in_range_bounds() {
        let alloc = PortAllocator::new(10000, 65000);
        assert!(alloc.in_range(10000));
        assert!(alloc.in_range(65000));
        assert!(!alloc.in_range(9999));
        assert!(!alloc.in_range(65001));
    }

    #[test]
    fn test_probe_listen_reports_held_port() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(!probe_listen(port));
        drop(listener);
        assert!(probe_listen(port));
    }
}
