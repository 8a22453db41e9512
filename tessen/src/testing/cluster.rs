use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use futures_util::future::join_all;
use tokio::sync::{mpsc, oneshot};

use crate::{
    monitor::{DownNotice, MonitorRef},
    testing::{SpyKind, TransportSpy},
    transport::{DelegateMailbox, DelegateRequest},
    Delivery, Error, ExitReason, Message, MonitorId, NodeId, Outcome, Pid, ProcessInbox, Result,
    Transport, DEFAULT_POOL_SIZE,
};

struct Watcher<M> {
    monitor: MonitorId,
    observer: Pid<M>,
}

struct ProcessEntry<M> {
    watchers: Vec<Watcher<M>>,
}

struct NodeState<M> {
    reachable: bool,
    endpoints: HashMap<Arc<str>, DelegateMailbox<M>>,
    processes: HashMap<u64, ProcessEntry<M>>,
}

impl<M> NodeState<M> {
    fn new() -> Self {
        Self {
            reachable: true,
            endpoints: HashMap::new(),
            processes: HashMap::new(),
        }
    }
}

struct State<M> {
    nodes: HashMap<NodeId, NodeState<M>>,
    /// Maps a native subscription back to the watched process.
    watch_index: HashMap<MonitorId, (NodeId, u64)>,
}

struct Inner<M> {
    state: Mutex<State<M>>,
    spy: TransportSpy,
    serial: AtomicU64,
}

/// In-memory multi-node substrate.
///
/// Simulates a cluster inside one process: nodes hold endpoint registries
/// and process tables, inter-node reachability is a flag, and liveness is
/// driven by [`kill`](Self::kill). Cloning yields another handle to the
/// same cluster.
///
/// ```rust,ignore
/// let cluster = Cluster::<MyMsg>::new();
/// let a = cluster.add_node("a");
/// let b = cluster.add_node("b");
/// let pool = WorkerPool::start(&cluster, &b, &Config::default())?;
/// let (caller, _inbox) = cluster.spawn(&a);
/// let invoker = Invoker::new(caller, cluster.clone());
/// ```
pub struct Cluster<M: Message> {
    inner: Arc<Inner<M>>,
}

impl<M: Message> Clone for Cluster<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<M: Message> Default for Cluster<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Message> Cluster<M> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    nodes: HashMap::new(),
                    watch_index: HashMap::new(),
                }),
                spy: TransportSpy::default(),
                serial: AtomicU64::new(0),
            }),
        }
    }

    /// Add a node (idempotent) and return its id.
    pub fn add_node(&self, name: &str) -> NodeId {
        let node = NodeId::new(name);
        self.state()
            .nodes
            .entry(node.clone())
            .or_insert_with(NodeState::new);
        node
    }

    /// Make `node` unreachable: calls addressed to it fail with node-down,
    /// casts to it vanish.
    pub fn disconnect(&self, node: &NodeId) {
        if let Some(state) = self.state().nodes.get_mut(node) {
            state.reachable = false;
        }
    }

    /// Restore reachability of `node`.
    pub fn reconnect(&self, node: &NodeId) {
        if let Some(state) = self.state().nodes.get_mut(node) {
            state.reachable = true;
        }
    }

    /// Terminate a process, notifying every native watcher.
    pub fn kill(&self, pid: &Pid<M>, reason: ExitReason) {
        let watchers = {
            let mut state = self.state();
            let Some(entry) = state
                .nodes
                .get_mut(pid.node())
                .and_then(|n| n.processes.remove(&pid.serial()))
            else {
                return;
            };
            for watcher in &entry.watchers {
                state.watch_index.remove(&watcher.monitor);
            }
            entry.watchers
        };
        for watcher in watchers {
            watcher.observer.deliver_down(DownNotice {
                monitor: MonitorRef::Native(watcher.monitor),
                watched: pid.clone(),
                reason: reason.clone(),
            });
        }
    }

    /// Handle to the spy recording all endpoint-addressed traffic.
    pub fn spy(&self) -> TransportSpy {
        self.inner.spy.clone()
    }

    /// Number of native subscriptions currently held on `pid`.
    ///
    /// The monitor-multiplexing invariant is asserted through this: any
    /// number of observers of a remote process must show up as exactly one.
    pub fn native_watcher_count(&self, pid: &Pid<M>) -> usize {
        self.state()
            .nodes
            .get(pid.node())
            .and_then(|n| n.processes.get(&pid.serial()))
            .map_or(0, |entry| entry.watchers.len())
    }

    fn state(&self) -> MutexGuard<'_, State<M>> {
        self.inner.state.lock().expect("cluster state poisoned")
    }

    fn route<'a>(
        state: &'a State<M>,
        node: &NodeId,
        name: &str,
    ) -> Option<&'a DelegateMailbox<M>> {
        let node_state = state.nodes.get(node)?;
        if !node_state.reachable {
            return None;
        }
        node_state.endpoints.get(name)
    }
}

impl<M: Message> Transport<M> for Cluster<M> {
    fn register(&self, node: &NodeId, name: &str, mailbox: DelegateMailbox<M>) -> Result<()> {
        let mut state = self.state();
        let Some(node_state) = state.nodes.get_mut(node) else {
            return Err(Error::UnknownNode(node.clone()));
        };
        if node_state.endpoints.contains_key(name) {
            return Err(Error::DuplicateDelegateName(Arc::from(name)));
        }
        node_state.endpoints.insert(Arc::from(name), mailbox);
        Ok(())
    }

    async fn call(
        &self,
        node: &NodeId,
        name: &str,
        request: DelegateRequest<M>,
    ) -> Result<Vec<Outcome<M>>> {
        let reply_rx = {
            let state = self.state();
            let Some(mailbox) = Self::route(&state, node, name) else {
                self.inner.spy.record(node, name, SpyKind::Call, false);
                return Err(Error::NodeDown(node.clone()));
            };
            let (reply_tx, reply_rx) = oneshot::channel();
            if mailbox.send((request, Some(reply_tx))).is_err() {
                self.inner.spy.record(node, name, SpyKind::Call, false);
                return Err(Error::NodeDown(node.clone()));
            }
            self.inner.spy.record(node, name, SpyKind::Call, true);
            reply_rx
        };
        reply_rx.await.map_err(|_| Error::NodeDown(node.clone()))
    }

    async fn multi_call(
        &self,
        nodes: &[NodeId],
        name: &str,
        request: DelegateRequest<M>,
    ) -> (Vec<(NodeId, Vec<Outcome<M>>)>, Vec<NodeId>) {
        let mut pending = Vec::new();
        let mut unreachable = Vec::new();
        {
            let state = self.state();
            for node in nodes {
                let delivered = Self::route(&state, node, name).and_then(|mailbox| {
                    let (reply_tx, reply_rx) = oneshot::channel();
                    mailbox
                        .send((request.clone(), Some(reply_tx)))
                        .ok()
                        .map(|_| reply_rx)
                });
                match delivered {
                    Some(reply_rx) => {
                        self.inner.spy.record(node, name, SpyKind::MultiCall, true);
                        pending.push((node.clone(), reply_rx));
                    }
                    None => {
                        self.inner.spy.record(node, name, SpyKind::MultiCall, false);
                        unreachable.push(node.clone());
                    }
                }
            }
        }

        let mut replies = Vec::new();
        let joined = join_all(
            pending
                .into_iter()
                .map(|(node, reply_rx)| async move { (node, reply_rx.await) }),
        )
        .await;
        for (node, reply) in joined {
            match reply {
                Ok(outcomes) => replies.push((node, outcomes)),
                Err(_) => unreachable.push(node),
            }
        }
        (replies, unreachable)
    }

    fn cast(&self, nodes: &[NodeId], name: &str, request: DelegateRequest<M>) {
        let state = self.state();
        for node in nodes {
            let delivered = Self::route(&state, node, name)
                .is_some_and(|mailbox| mailbox.send((request.clone(), None)).is_ok());
            self.inner.spy.record(node, name, SpyKind::Cast, delivered);
        }
    }

    fn spawn(&self, node: &NodeId) -> (Pid<M>, ProcessInbox<M>) {
        let serial = self.inner.serial.fetch_add(1, Ordering::Relaxed) + 1;
        let (sender, inbox) = mpsc::unbounded_channel::<Delivery<M>>();
        let pid = Pid::new(node.clone(), serial, sender);
        self.state()
            .nodes
            .get_mut(node)
            .expect("spawn on unknown node")
            .processes
            .insert(serial, ProcessEntry {
                watchers: Vec::new(),
            });
        (pid, inbox)
    }

    fn monitor(&self, watched: &Pid<M>, observer: &Pid<M>) -> MonitorId {
        let id = MonitorId::new();
        let alive = {
            let mut state = self.state();
            match state
                .nodes
                .get_mut(watched.node())
                .and_then(|n| n.processes.get_mut(&watched.serial()))
            {
                Some(entry) => {
                    entry.watchers.push(Watcher {
                        monitor: id,
                        observer: observer.clone(),
                    });
                    state
                        .watch_index
                        .insert(id, (watched.node().clone(), watched.serial()));
                    true
                }
                None => false,
            }
        };
        if !alive {
            observer.deliver_down(DownNotice {
                monitor: MonitorRef::Native(id),
                watched: watched.clone(),
                reason: ExitReason::NoProc,
            });
        }
        id
    }

    fn demonitor(&self, monitor: MonitorId) {
        let mut state = self.state();
        let Some((node, serial)) = state.watch_index.remove(&monitor) else {
            return;
        };
        if let Some(entry) = state
            .nodes
            .get_mut(&node)
            .and_then(|n| n.processes.get_mut(&serial))
        {
            entry.watchers.retain(|w| w.monitor != monitor);
        }
    }

    fn pool_size(&self, nodes: &[NodeId], prefix: &str) -> usize {
        let state = self.state();
        nodes
            .iter()
            .filter_map(|node| state.nodes.get(node))
            .filter(|node_state| node_state.reachable)
            .filter_map(|node_state| {
                let count = node_state
                    .endpoints
                    .keys()
                    .filter(|name| is_pool_member(name, prefix))
                    .count();
                (count > 0).then_some(count)
            })
            .min()
            .unwrap_or(DEFAULT_POOL_SIZE)
    }
}

fn is_pool_member(name: &str, prefix: &str) -> bool {
    name.strip_prefix(prefix)
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

impl<M: Message> fmt::Debug for Cluster<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Cluster")
            .field("nodes", &state.nodes.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
