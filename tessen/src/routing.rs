//! Deterministic delegate routing.
//!
//! Every invocation from a given caller must land on the same delegate index
//! on every peer node: the substrate guarantees FIFO between any two
//! endpoints, so pinning the index is what turns per-endpoint FIFO into
//! per-(caller, target) ordering. The index is therefore derived from a
//! stable hash of the caller identity, never from the targets or from
//! load, and memoized on the caller for its lifetime
//! (see [`Invoker`](crate::Invoker)).
//!
//! Monitor subscriptions hash the watched pid instead, so that every
//! observer of the same process reaches the same delegate and their
//! subscriptions collapse into one.

use std::{
    hash::{Hash, Hasher},
    sync::Arc,
};

use crate::Pid;

/// Deterministic non-cryptographic hash of a process identity.
///
/// Stable for the lifetime of the cluster: it hashes the pid's `(node,
/// serial)` identity with a fixed-state hasher. Consistency is what matters
/// here, not strength.
pub fn stable_hash<M>(pid: &Pid<M>) -> u64 {
    let mut hasher = std::hash::DefaultHasher::new();
    pid.hash(&mut hasher);
    hasher.finish()
}

/// Registration name of the delegate at `index` under `prefix`.
pub fn delegate_name(prefix: &str, index: usize) -> Arc<str> {
    Arc::from(format!("{prefix}{index}"))
}

/// Delegate name a given identity hashes to within a pool of `pool_size`.
pub fn delegate_for<M>(pid: &Pid<M>, prefix: &str, pool_size: usize) -> Arc<str> {
    let size = pool_size.max(1) as u64;
    delegate_name(prefix, (stable_hash(pid) % size) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Delivery, NodeId};
    use tokio::sync::mpsc;

    fn pid(node: &str, serial: u64) -> Pid<u32> {
        let (tx, _rx) = mpsc::unbounded_channel::<Delivery<u32>>();
        Pid::new(NodeId::new(node), serial, tx)
    }

    #[test]
    fn hashing_is_deterministic() {
        let p = pid("a", 42);
        assert_eq!(stable_hash(&p), stable_hash(&p.clone()));
        assert_eq!(
            delegate_for(&p, "delegate_", 4),
            delegate_for(&p, "delegate_", 4)
        );
    }

    #[test]
    fn names_stay_within_the_pool() {
        for serial in 0..256 {
            let name = delegate_for(&pid("a", serial), "delegate_", 4);
            let index: usize = name.strip_prefix("delegate_").unwrap().parse().unwrap();
            assert!(index < 4);
        }
    }

    #[test]
    fn different_identities_spread_over_the_pool() {
        use std::collections::HashSet;

        let names: HashSet<_> = (0..64)
            .map(|serial| delegate_for(&pid("a", serial), "delegate_", 4))
            .collect();
        assert!(names.len() > 1);
    }

    #[test]
    fn zero_sized_pools_are_treated_as_one() {
        let p = pid("a", 7);
        assert_eq!(&*delegate_for(&p, "delegate_", 0), "delegate_0");
    }
}
