use std::{
    collections::HashMap,
    slice,
    sync::{Arc, OnceLock},
};

use crate::{
    monitor::MonitorRef,
    operation::{downcast_value, run_op, RawOp},
    routing,
    transport::DelegateRequest,
    Fault, Message, NodeId, Operation, Outcome, Pid, Result, Transport, DEFAULT_NAME_PREFIX,
};

/// Caller-side handle of the fan-out core.
///
/// An `Invoker` belongs to one caller process. It partitions target sets by
/// node, applies operations inline for local targets, and coalesces all
/// remote work for a node into a single message to one delegate worker
/// there.
///
/// The delegate index is derived from the caller's identity on first remote
/// dispatch and memoized for the invoker's lifetime. Combined with the
/// substrate's per-endpoint FIFO, this pins ordering: two operations issued
/// by the same caller against the same target are executed in send order.
/// Create one `Invoker` per caller and keep it; a fresh invoker is a fresh
/// caller as far as ordering is concerned.
///
/// ```rust,ignore
/// let invoker = Invoker::new(self_pid, transport);
/// let (confirms, failures) = invoker
///     .invoke(queues, Operation::send_call(QueueMessage::Confirm(seq)))
///     .await;
/// ```
pub struct Invoker<M: Message, S: Transport<M>> {
    identity: Pid<M>,
    prefix: Arc<str>,
    transport: S,
    /// Delegate name chosen on first remote dispatch, fixed thereafter.
    memo: OnceLock<Arc<str>>,
}

impl<M: Message, S: Transport<M>> Invoker<M, S> {
    pub fn new(identity: Pid<M>, transport: S) -> Self {
        Self {
            identity,
            prefix: Arc::from(DEFAULT_NAME_PREFIX),
            transport,
            memo: OnceLock::new(),
        }
    }

    /// Route through a pool registered under a different name prefix.
    /// Must be set before the first invocation.
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = Arc::from(prefix);
        self
    }

    /// The caller identity this invoker routes for.
    pub fn identity(&self) -> &Pid<M> {
        &self.identity
    }

    /// Apply `op` to every target, returning per-target successes and
    /// failures. Never raises: every input target appears in exactly one of
    /// the two lists. Cross-target order is unspecified.
    pub async fn invoke<R: Send + 'static>(
        &self,
        mut targets: Vec<Pid<M>>,
        op: Operation<M, R>,
    ) -> (Vec<(Pid<M>, R)>, Vec<(Pid<M>, Fault)>) {
        let op = op.raw();
        match targets.len() {
            0 => return (Vec::new(), Vec::new()),
            1 => {
                let target = targets.remove(0);
                let outcome = self.invoke_single(target, op).await;
                return split(vec![outcome]);
            }
            _ => {}
        }

        let (local, grouped) = self.partition(targets);
        let mut outcomes = Vec::new();

        if !grouped.is_empty() {
            let nodes: Vec<NodeId> = grouped.keys().cloned().collect();
            let name = self.remote_delegate(&nodes);
            let request = DelegateRequest::Invoke {
                op: op.clone(),
                groups: grouped.clone(),
            };
            let (replies, unreachable) = self.transport.multi_call(&nodes, &name, request).await;
            for (_, node_outcomes) in replies {
                outcomes.extend(node_outcomes);
            }
            for node in unreachable {
                if let Some(group) = grouped.get(&node) {
                    outcomes.extend(group.iter().map(|target| Outcome::Failure {
                        target: target.clone(),
                        fault: Fault::NodeDown(node.clone()),
                    }));
                }
            }
        }

        for target in local {
            outcomes.push(run_op(&op, target).await);
        }

        split(outcomes)
    }

    /// Apply `op` to a single target and return its bare value.
    ///
    /// This is the only shape in which failures propagate: the fault
    /// captured at the target's node is re-raised here as `Err`, and an
    /// unreachable node surfaces as [`Error::NodeDown`].
    pub async fn invoke_one<R: Send + 'static>(
        &self,
        target: &Pid<M>,
        op: Operation<M, R>,
    ) -> Result<R> {
        match self.invoke_single(target.clone(), op.raw()).await {
            Outcome::Success { value, .. } => Ok(downcast_value(value)),
            Outcome::Failure { fault, .. } => Err(fault.into()),
        }
    }

    /// Fire-and-forget variant of [`invoke`](Self::invoke): remote work goes
    /// out as one best-effort cast per node, local targets are applied
    /// inline, and all failures are dropped, node-down included.
    pub async fn invoke_no_result<R: Send + 'static>(
        &self,
        mut targets: Vec<Pid<M>>,
        op: Operation<M, R>,
    ) {
        let op = op.raw();
        match targets.len() {
            0 => return,
            1 => {
                let target = targets.remove(0);
                if target.node() == self.identity.node() {
                    let _ = run_op(&op, target).await;
                } else {
                    let node = target.node().clone();
                    let name = self.remote_delegate(slice::from_ref(&node));
                    let groups = HashMap::from([(node.clone(), vec![target])]);
                    self.transport
                        .cast(slice::from_ref(&node), &name, DelegateRequest::Invoke { op, groups });
                }
                return;
            }
            _ => {}
        }

        let (local, grouped) = self.partition(targets);

        if !grouped.is_empty() {
            let nodes: Vec<NodeId> = grouped.keys().cloned().collect();
            let name = self.remote_delegate(&nodes);
            self.transport.cast(
                &nodes,
                &name,
                DelegateRequest::Invoke {
                    op: op.clone(),
                    groups: grouped,
                },
            );
        }

        for target in local {
            let _ = run_op(&op, target).await;
        }
    }

    /// Deliver `message` synchronously to every target; successes carry the
    /// targets' replies.
    pub async fn call(
        &self,
        targets: Vec<Pid<M>>,
        message: M,
    ) -> (Vec<(Pid<M>, M)>, Vec<(Pid<M>, Fault)>) {
        self.invoke(targets, Operation::send_call(message)).await
    }

    /// Deliver `message` synchronously to one target and return its reply.
    pub async fn call_one(&self, target: &Pid<M>, message: M) -> Result<M> {
        self.invoke_one(target, Operation::send_call(message)).await
    }

    /// Deliver `message` asynchronously to every target, dropping failures.
    pub async fn cast(&self, targets: Vec<Pid<M>>, message: M) {
        self.invoke_no_result(targets, Operation::send_cast(message))
            .await
    }

    /// Deliver `message` asynchronously to one target, dropping failures.
    pub async fn cast_one(&self, target: &Pid<M>, message: M) {
        self.invoke_no_result(vec![target.clone()], Operation::send_cast(message))
            .await
    }

    /// Subscribe to the death of `watched`.
    ///
    /// A local target falls through to the substrate's native monitor. A
    /// remote target goes through the delegate on its node, chosen by
    /// hashing the **watched** pid so that every observer of the same
    /// process shares a single native subscription there. Returns
    /// immediately with the subscription handle.
    pub fn monitor(&self, watched: &Pid<M>) -> MonitorRef<M> {
        if watched.node() == self.identity.node() {
            return MonitorRef::Native(self.transport.monitor(watched, &self.identity));
        }
        let node = watched.node();
        let size = self.transport.pool_size(slice::from_ref(node), &self.prefix);
        let name = routing::delegate_for(watched, &self.prefix, size);
        self.transport.cast(
            slice::from_ref(node),
            &name,
            DelegateRequest::Monitor {
                observer: self.identity.clone(),
                watched: watched.clone(),
            },
        );
        MonitorRef::Delegate {
            name,
            watched: watched.clone(),
        }
    }

    /// Tear down a subscription created by [`monitor`](Self::monitor),
    /// dispatching on the handle variant.
    pub fn demonitor(&self, monitor: MonitorRef<M>) {
        match monitor {
            MonitorRef::Native(id) => self.transport.demonitor(id),
            MonitorRef::Delegate { name, watched } => {
                self.transport.cast(
                    slice::from_ref(watched.node()),
                    &name,
                    DelegateRequest::Demonitor {
                        observer: self.identity.clone(),
                        watched: watched.clone(),
                    },
                );
            }
        }
    }

    /// Single-target path shared by `invoke` and `invoke_one`: local targets
    /// apply inline, remote ones skip grouping and go out as one unicast
    /// request.
    async fn invoke_single(&self, target: Pid<M>, op: RawOp<M>) -> Outcome<M> {
        if target.node() == self.identity.node() {
            return run_op(&op, target).await;
        }
        let node = target.node().clone();
        let name = self.remote_delegate(slice::from_ref(&node));
        let groups = HashMap::from([(node.clone(), vec![target.clone()])]);
        match self
            .transport
            .call(&node, &name, DelegateRequest::Invoke { op, groups })
            .await
        {
            Ok(outcomes) => outcomes
                .into_iter()
                .next()
                .unwrap_or(Outcome::Failure {
                    target,
                    fault: Fault::NodeDown(node),
                }),
            Err(_) => Outcome::Failure {
                target,
                fault: Fault::NodeDown(node),
            },
        }
    }

    fn partition(&self, targets: Vec<Pid<M>>) -> (Vec<Pid<M>>, HashMap<NodeId, Vec<Pid<M>>>) {
        let mut local = Vec::new();
        let mut grouped: HashMap<NodeId, Vec<Pid<M>>> = HashMap::new();
        for target in targets {
            if target.node() == self.identity.node() {
                local.push(target);
            } else {
                grouped.entry(target.node().clone()).or_default().push(target);
            }
        }
        (local, grouped)
    }

    /// Resolve the delegate name for this caller, consulting the pool size
    /// only once: the memoized name is reused for every later invocation
    /// regardless of the peer set.
    fn remote_delegate(&self, nodes: &[NodeId]) -> Arc<str> {
        self.memo
            .get_or_init(|| {
                let size = self.transport.pool_size(nodes, &self.prefix);
                routing::delegate_for(&self.identity, &self.prefix, size)
            })
            .clone()
    }
}

fn split<M: Message, R: Send + 'static>(
    outcomes: Vec<Outcome<M>>,
) -> (Vec<(Pid<M>, R)>, Vec<(Pid<M>, Fault)>) {
    let mut successes = Vec::new();
    let mut failures = Vec::new();
    for outcome in outcomes {
        match outcome {
            Outcome::Success { target, value } => successes.push((target, downcast_value(value))),
            Outcome::Failure { target, fault } => failures.push((target, fault)),
        }
    }
    (successes, failures)
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use super::*;
    use crate::{testing::Cluster, Config, Delivery, Error, WorkerPool};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum TestMsg {
        Ping(u32),
        Pong(u32),
    }

    fn config(size: usize) -> Config {
        Config::default().with_pool_size(size)
    }

    fn serial_op() -> Operation<TestMsg, u64> {
        Operation::apply(|pid: Pid<TestMsg>| async move { pid.serial() })
    }

    struct Fixture {
        cluster: Cluster<TestMsg>,
        a: NodeId,
        b: NodeId,
        invoker: Invoker<TestMsg, Cluster<TestMsg>>,
        _pool: WorkerPool,
    }

    fn fixture() -> Fixture {
        let cluster = Cluster::<TestMsg>::new();
        let a = cluster.add_node("a");
        let b = cluster.add_node("b");
        let pool = WorkerPool::start(&cluster, &b, &config(4)).unwrap();
        let (caller, _inbox) = cluster.spawn(&a);
        let invoker = Invoker::new(caller, cluster.clone());
        Fixture {
            cluster,
            a,
            b,
            invoker,
            _pool: pool,
        }
    }

    #[tokio::test]
    async fn empty_target_list_sends_nothing() {
        let f = fixture();
        let (ok, failed) = f.invoker.invoke(Vec::new(), serial_op()).await;
        assert!(ok.is_empty());
        assert!(failed.is_empty());
        assert!(f.cluster.spy().is_empty());
    }

    #[tokio::test]
    async fn local_targets_never_touch_the_transport() {
        let f = fixture();
        let locals: Vec<_> = (0..3).map(|_| f.cluster.spawn(&f.a).0).collect();

        let (ok, failed) = f.invoker.invoke(locals.clone(), serial_op()).await;

        assert!(failed.is_empty());
        assert_eq!(ok.len(), 3);
        for (pid, serial) in &ok {
            assert_eq!(*serial, pid.serial());
        }
        assert!(f.cluster.spy().is_empty());
    }

    #[tokio::test]
    async fn remote_targets_are_coalesced_into_one_message() {
        let f = fixture();
        let remotes: Vec<_> = (0..5).map(|_| f.cluster.spawn(&f.b).0).collect();

        let (ok, failed) = f.invoker.invoke(remotes, serial_op()).await;

        assert!(failed.is_empty());
        assert_eq!(ok.len(), 5);
        assert_eq!(f.cluster.spy().sent_count(), 1);
        assert_eq!(f.cluster.spy().sent_to(&f.b), 1);
    }

    #[tokio::test]
    async fn mixed_targets_with_an_unreachable_node() {
        let f = fixture();
        let c = f.cluster.add_node("c");
        let _pc = WorkerPool::start(&f.cluster, &c, &config(4)).unwrap();

        let p1 = f.cluster.spawn(&f.a).0;
        let p2 = f.cluster.spawn(&f.a).0;
        let p3 = f.cluster.spawn(&f.b).0;
        let p4 = f.cluster.spawn(&f.b).0;
        let p5 = f.cluster.spawn(&c).0;

        f.cluster.disconnect(&c);

        let targets = vec![p1, p2, p3, p4, p5.clone()];
        let (ok, failed) = f.invoker.invoke(targets.clone(), serial_op()).await;

        assert_eq!(ok.len(), 4);
        for (pid, serial) in &ok {
            assert_eq!(*serial, pid.serial());
        }
        assert_eq!(failed, vec![(p5, Fault::NodeDown(c.clone()))]);

        // Every input target shows up exactly once across the two lists.
        let mut seen: Vec<_> = ok
            .iter()
            .map(|(p, _)| p.clone())
            .chain(failed.iter().map(|(p, _)| p.clone()))
            .collect();
        seen.sort_by_key(|p| p.serial());
        let mut expected = targets;
        expected.sort_by_key(|p| p.serial());
        assert_eq!(seen, expected);

        // One coalesced message per remote node, reachable or not.
        assert_eq!(f.cluster.spy().sent_to(&f.b), 1);
        assert_eq!(f.cluster.spy().sent_to(&c), 1);
        assert_eq!(f.cluster.spy().sent_count(), 2);
    }

    #[tokio::test]
    async fn every_target_on_a_down_node_fails() {
        let f = fixture();
        let remotes: Vec<_> = (0..3).map(|_| f.cluster.spawn(&f.b).0).collect();
        f.cluster.disconnect(&f.b);

        let (ok, failed) = f.invoker.invoke(remotes.clone(), serial_op()).await;

        assert!(ok.is_empty());
        assert_eq!(failed.len(), 3);
        for (_, fault) in &failed {
            assert_eq!(*fault, Fault::NodeDown(f.b.clone()));
        }
    }

    #[tokio::test]
    async fn single_remote_target_skips_grouping() {
        let f = fixture();
        let p = f.cluster.spawn(&f.b).0;

        let (ok, failed) = f.invoker.invoke(vec![p.clone()], serial_op()).await;

        assert!(failed.is_empty());
        assert_eq!(ok, vec![(p.clone(), p.serial())]);
        assert_eq!(f.cluster.spy().sent_count(), 1);
    }

    #[tokio::test]
    async fn single_target_failure_is_reraised() {
        let f = fixture();
        let p = f.cluster.spawn(&f.b).0;

        let op = Operation::<TestMsg, u32>::try_apply(|_p| async move { Err::<u32, &str>("boom") });
        let err = f.invoker.invoke_one(&p, op).await.unwrap_err();
        assert_eq!(err, Error::Invocation(Fault::error("boom")));

        let op = Operation::<TestMsg, u32>::apply(|_p| async move { panic!("kaboom") });
        match f.invoker.invoke_one(&p, op).await.unwrap_err() {
            Error::Invocation(Fault::Panic { reason, .. }) => assert!(reason.contains("kaboom")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn single_target_on_a_down_node_is_a_node_down_error() {
        let f = fixture();
        let p = f.cluster.spawn(&f.b).0;
        f.cluster.disconnect(&f.b);

        let err = f.invoker.invoke_one(&p, serial_op()).await.unwrap_err();
        assert_eq!(err, Error::NodeDown(f.b.clone()));
    }

    #[tokio::test]
    async fn list_shape_returns_failures_instead_of_raising() {
        let f = fixture();
        let p1 = f.cluster.spawn(&f.b).0;
        let p2 = f.cluster.spawn(&f.b).0;

        let failing = p1.clone();
        let op = Operation::<TestMsg, u64>::try_apply(move |p| {
            let failing = failing.clone();
            async move {
                if p == failing {
                    Err("selective failure")
                } else {
                    Ok(p.serial())
                }
            }
        });

        let (ok, failed) = f.invoker.invoke(vec![p1.clone(), p2.clone()], op).await;
        assert_eq!(ok, vec![(p2.clone(), p2.serial())]);
        assert_eq!(failed, vec![(p1, Fault::error("selective failure"))]);
    }

    #[tokio::test]
    async fn targets_within_a_node_run_in_list_order() {
        let f = fixture();
        let remotes: Vec<_> = (0..3).map(|_| f.cluster.spawn(&f.b).0).collect();
        let expected: Vec<u64> = remotes.iter().map(|p| p.serial()).collect();

        let order = Arc::new(Mutex::new(Vec::new()));
        let op = {
            let order = order.clone();
            Operation::<TestMsg, ()>::apply(move |p| {
                let order = order.clone();
                async move {
                    order.lock().unwrap().push(p.serial());
                }
            })
        };

        let (ok, failed) = f.invoker.invoke(remotes, op).await;
        assert_eq!(ok.len(), 3);
        assert!(failed.is_empty());
        assert_eq!(*order.lock().unwrap(), expected);
    }

    #[tokio::test]
    async fn routing_is_pinned_per_caller() {
        let f = fixture();
        let p1 = f.cluster.spawn(&f.b).0;
        let p2 = f.cluster.spawn(&f.b).0;

        let expected = routing::delegate_for(f.invoker.identity(), "delegate_", 4);

        f.invoker.invoke(vec![p1], serial_op()).await;
        f.invoker.invoke(vec![p2], serial_op()).await;

        let records = f.cluster.spy().records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].endpoint, expected);
        assert_eq!(records[1].endpoint, expected);
    }

    #[tokio::test]
    async fn cast_then_call_arrive_in_order() {
        let f = fixture();
        let (p, mut inbox) = f.cluster.spawn(&f.b);

        f.invoker.cast_one(&p, TestMsg::Ping(1)).await;

        let server = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(delivery) = inbox.recv().await {
                match delivery {
                    Delivery::Cast(m) => seen.push(m),
                    Delivery::Call(m, reply) => {
                        seen.push(m);
                        let _ = reply.send(TestMsg::Pong(2));
                        break;
                    }
                    Delivery::Down(_) => {}
                }
            }
            seen
        });

        let reply = f.invoker.call_one(&p, TestMsg::Ping(2)).await.unwrap();
        assert_eq!(reply, TestMsg::Pong(2));
        assert_eq!(
            server.await.unwrap(),
            vec![TestMsg::Ping(1), TestMsg::Ping(2)]
        );
    }

    #[tokio::test]
    async fn fire_and_forget_swallows_node_down() {
        let f = fixture();
        let c = f.cluster.add_node("c");
        let _pc = WorkerPool::start(&f.cluster, &c, &config(4)).unwrap();

        let (reachable, mut inbox) = f.cluster.spawn(&f.b);
        let lost = f.cluster.spawn(&c).0;
        f.cluster.disconnect(&c);

        f.invoker
            .cast(vec![reachable, lost], TestMsg::Ping(7))
            .await;

        let delivery = tokio::time::timeout(Duration::from_secs(1), inbox.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(delivery, Delivery::Cast(TestMsg::Ping(7))));
    }

    #[tokio::test]
    async fn custom_prefixes_route_to_their_own_pool() {
        let cluster = Cluster::<TestMsg>::new();
        let a = cluster.add_node("a");
        let b = cluster.add_node("b");
        let _pool = WorkerPool::start(
            &cluster,
            &b,
            &config(2).with_name_prefix("mux_"),
        )
        .unwrap();

        let (caller, _inbox) = cluster.spawn(&a);
        let invoker = Invoker::new(caller, cluster.clone()).with_prefix("mux_");
        let p = cluster.spawn(&b).0;

        let (ok, failed) = invoker.invoke(vec![p.clone()], serial_op()).await;
        assert_eq!(ok, vec![(p.clone(), p.serial())]);
        assert!(failed.is_empty());

        let records = cluster.spy().records();
        assert!(records[0].endpoint.starts_with("mux_"));
    }

    #[tokio::test]
    async fn local_call_replies_inline() {
        let f = fixture();
        let (p, mut inbox) = f.cluster.spawn(&f.a);

        let server = tokio::spawn(async move {
            if let Some(Delivery::Call(TestMsg::Ping(n), reply)) = inbox.recv().await {
                let _ = reply.send(TestMsg::Pong(n));
            }
        });

        let reply = f.invoker.call_one(&p, TestMsg::Ping(5)).await.unwrap();
        assert_eq!(reply, TestMsg::Pong(5));
        assert!(f.cluster.spy().is_empty());
        server.await.unwrap();
    }
}
