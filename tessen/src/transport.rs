use std::{collections::HashMap, fmt, future::Future};

use tokio::sync::{mpsc, oneshot};

use crate::{operation::RawOp, Message, MonitorId, NodeId, Outcome, Pid, ProcessInbox, Result};

/// Reply channel a delegate completes with the per-target outcome list.
pub type ReplySender<M> = oneshot::Sender<Vec<Outcome<M>>>;

/// Sending half of a delegate mailbox, registered under the delegate's name.
///
/// A request paired with `Some(reply)` is the request/reply form; `None` is
/// the one-way form. The mailbox is unbounded: back-pressure is not applied
/// at this layer, callers own it.
pub type DelegateMailbox<M> = mpsc::UnboundedSender<(DelegateRequest<M>, Option<ReplySender<M>>)>;

/// Receiving half of a delegate mailbox, owned by the worker.
pub type DelegateInbox<M> = mpsc::UnboundedReceiver<(DelegateRequest<M>, Option<ReplySender<M>>)>;

/// Wire shape of everything addressed to a delegate worker.
pub enum DelegateRequest<M> {
    /// Apply `op` to this node's entry in `groups`.
    ///
    /// The full per-node grouping is sent to every addressed delegate; each
    /// picks out its own node's targets and ignores the rest.
    Invoke {
        op: RawOp<M>,
        groups: HashMap<NodeId, Vec<Pid<M>>>,
    },

    /// Subscribe `observer` to the death of `watched` (a process on the
    /// delegate's node).
    Monitor { observer: Pid<M>, watched: Pid<M> },

    /// Remove `observer`'s subscription on `watched`.
    Demonitor { observer: Pid<M>, watched: Pid<M> },
}

impl<M> Clone for DelegateRequest<M> {
    fn clone(&self) -> Self {
        match self {
            DelegateRequest::Invoke { op, groups } => DelegateRequest::Invoke {
                op: op.clone(),
                groups: groups.clone(),
            },
            DelegateRequest::Monitor { observer, watched } => DelegateRequest::Monitor {
                observer: observer.clone(),
                watched: watched.clone(),
            },
            DelegateRequest::Demonitor { observer, watched } => DelegateRequest::Demonitor {
                observer: observer.clone(),
                watched: watched.clone(),
            },
        }
    }
}

impl<M> fmt::Debug for DelegateRequest<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DelegateRequest::Invoke { groups, .. } => f
                .debug_struct("Invoke")
                .field("groups", &groups.keys().collect::<Vec<_>>())
                .finish_non_exhaustive(),
            DelegateRequest::Monitor { observer, watched } => f
                .debug_struct("Monitor")
                .field("observer", observer)
                .field("watched", watched)
                .finish(),
            DelegateRequest::Demonitor { observer, watched } => f
                .debug_struct("Demonitor")
                .field("observer", observer)
                .field("watched", watched)
                .finish(),
        }
    }
}

/// Thin façade over the underlying message-passing substrate.
///
/// The fan-out core and the delegate workers are written against this trait
/// only; the crate assumes the substrate provides reliable in-order delivery
/// between any two endpoints, liveness notifications, and node-down
/// detection. The [`testing`](crate::testing) module ships an in-memory
/// multi-node implementation.
///
/// Handles are cheap to clone and shared freely across tasks.
///
/// # Contract
///
/// - [`call`](Self::call) and [`multi_call`](Self::multi_call) apply **no
///   timeout**. A finite timeout would require an intermediate process per
///   endpoint, which would break FIFO with preceding casts from the same
///   caller. Node-down detection is the sole escape hatch.
/// - Between any two endpoints, delivery is FIFO. The routing layer relies
///   on this to order invocations from one caller to one target.
/// - [`pool_size`](Self::pool_size) returns the smallest pool visible among
///   the referenced nodes, falling back to
///   [`DEFAULT_POOL_SIZE`](crate::DEFAULT_POOL_SIZE) when none is visible,
///   and never returns zero.
pub trait Transport<M: Message>: Clone + Send + Sync + 'static {
    /// Bind a delegate mailbox to `name` on `node`.
    fn register(&self, node: &NodeId, name: &str, mailbox: DelegateMailbox<M>) -> Result<()>;

    /// Synchronous request to the named endpoint on one node.
    ///
    /// Resolves with the delegate's reply, or `Err(NodeDown)` when the node
    /// is unreachable or the delegate disappears mid-request.
    fn call(
        &self,
        node: &NodeId,
        name: &str,
        request: DelegateRequest<M>,
    ) -> impl Future<Output = Result<Vec<Outcome<M>>>> + Send;

    /// Synchronous request to the named endpoint on every listed node.
    ///
    /// Resolves once every reachable endpoint replied and every unreachable
    /// node was reported down, yielding `(replies, unreachable_nodes)`.
    fn multi_call(
        &self,
        nodes: &[NodeId],
        name: &str,
        request: DelegateRequest<M>,
    ) -> impl Future<Output = (Vec<(NodeId, Vec<Outcome<M>>)>, Vec<NodeId>)> + Send;

    /// Best-effort one-way send to the named endpoint on every listed node.
    fn cast(&self, nodes: &[NodeId], name: &str, request: DelegateRequest<M>);

    /// Mint a fresh process identity on `node` and hand back its inbox.
    fn spawn(&self, node: &NodeId) -> (Pid<M>, ProcessInbox<M>);

    /// Native liveness subscription: deliver a
    /// [`Delivery::Down`](crate::Delivery::Down) to `observer` when
    /// `watched` dies. Watching an already-dead process fires immediately
    /// with [`ExitReason::NoProc`](crate::ExitReason::NoProc).
    fn monitor(&self, watched: &Pid<M>, observer: &Pid<M>) -> MonitorId;

    /// Cancel a native liveness subscription.
    fn demonitor(&self, monitor: MonitorId);

    /// Effective delegate pool size under `prefix` across `nodes`.
    fn pool_size(&self, nodes: &[NodeId], prefix: &str) -> usize;
}
