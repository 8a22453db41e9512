use std::sync::{Arc, Mutex};

use crate::NodeId;

/// How a recorded message was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpyKind {
    /// Unicast request/reply.
    Call,
    /// Multi-endpoint request/reply.
    MultiCall,
    /// Best-effort one-way send.
    Cast,
}

/// One endpoint-addressed send observed by the spy.
///
/// Sends to unreachable nodes are recorded with `delivered: false`; the
/// attempt still counts as an inter-node message, which is what the
/// coalescing invariant is stated over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpyRecord {
    pub node: NodeId,
    pub endpoint: Arc<str>,
    pub kind: SpyKind,
    pub delivered: bool,
}

/// Records every endpoint-addressed message flowing through a
/// [`Cluster`](crate::testing::Cluster).
///
/// Local invocations never touch the transport, so any record at all means
/// inter-node traffic happened.
///
/// ```rust,ignore
/// let (ok, failed) = invoker.invoke(targets, op).await;
/// assert_eq!(cluster.spy().sent_to(&node_b), 1);
/// ```
#[derive(Clone, Default)]
pub struct TransportSpy {
    records: Arc<Mutex<Vec<SpyRecord>>>,
}

impl TransportSpy {
    pub(crate) fn record(&self, node: &NodeId, endpoint: &str, kind: SpyKind, delivered: bool) {
        self.records
            .lock()
            .expect("spy records poisoned")
            .push(SpyRecord {
                node: node.clone(),
                endpoint: Arc::from(endpoint),
                kind,
                delivered,
            });
    }

    /// Returns true if no endpoint-addressed message was sent.
    pub fn is_empty(&self) -> bool {
        self.records.lock().expect("spy records poisoned").is_empty()
    }

    /// Total number of endpoint-addressed messages, delivered or not.
    pub fn sent_count(&self) -> usize {
        self.records.lock().expect("spy records poisoned").len()
    }

    /// Number of messages addressed to any endpoint on `node`.
    pub fn sent_to(&self, node: &NodeId) -> usize {
        self.records
            .lock()
            .expect("spy records poisoned")
            .iter()
            .filter(|r| r.node == *node)
            .count()
    }

    /// Number of messages addressed to a specific endpoint on `node`.
    pub fn sent_to_endpoint(&self, node: &NodeId, endpoint: &str) -> usize {
        self.records
            .lock()
            .expect("spy records poisoned")
            .iter()
            .filter(|r| r.node == *node && &*r.endpoint == endpoint)
            .count()
    }

    /// Snapshot of everything recorded so far, in send order.
    pub fn records(&self) -> Vec<SpyRecord> {
        self.records.lock().expect("spy records poisoned").clone()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.records.lock().expect("spy records poisoned").clear();
    }
}

impl std::fmt::Debug for TransportSpy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSpy")
            .field("records", &self.sent_count())
            .finish_non_exhaustive()
    }
}
