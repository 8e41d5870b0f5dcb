//! Per-instance write serialization
//!
//! Event appends, command inserts, checkpoint writes, and registry status
//! updates for one instance must not interleave. When every writer shares
//! this process, a per-instance async mutex provides that serialization;
//! the store's row-level locks cover writers in other processes.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

/// Map of per-instance async locks
///
/// Locks are created on first use and kept for the lifetime of the kernel;
/// instance ids are short and bounded by the registry, so the map does not
/// need eviction.
#[derive(Default)]
pub struct InstanceLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl InstanceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock handle for an instance; clones share the same underlying mutex
    pub fn for_instance(&self, instance_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(instance_id.to_string())
            .or_default()
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_instance_shares_a_lock() {
        let locks = InstanceLocks::new();
        let a = locks.for_instance("abc");
        let b = locks.for_instance("abc");

        let guard = a.lock().await;
        assert!(b.try_lock().is_err());
        drop(guard);
        assert!(b.try_lock().is_ok());
    }

    #[tokio::test]
    async fn test_different_instances_do_not_contend() {
        let locks = InstanceLocks::new();
        let a = locks.for_instance("abc");
        let b = locks.for_instance("def");

        let _guard = a.lock().await;
        assert!(b.try_lock().is_ok());
    }
}
