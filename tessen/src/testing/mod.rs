//! Test utilities: an in-memory multi-node substrate and a transport spy.
//!
//! [`Cluster`] implements [`Transport`](crate::Transport) entirely in
//! process memory: nodes are registries, processes are unbounded channels,
//! and "node down" is a reachability flag you flip with
//! [`Cluster::disconnect`]. Every endpoint-addressed send is recorded by a
//! [`TransportSpy`], which is how the coalescing and zero-traffic
//! guarantees are asserted.
//!
//! # Warning
//!
//! **Do not use in production.** Mailboxes are unbounded and the spy keeps
//! every record. For a real deployment, implement
//! [`Transport`](crate::Transport) over your actual substrate.

mod cluster;
mod spy;

pub use cluster::Cluster;
pub use spy::{SpyKind, SpyRecord, TransportSpy};

use std::time::Duration;

/// Poll `condition` until it holds or roughly a second has passed.
///
/// One-way delegate traffic (casts, monitor registrations) has no reply to
/// await; tests use this to settle on the resulting state instead of
/// sleeping for fixed intervals.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    condition()
}
