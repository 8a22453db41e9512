use std::{
    collections::{hash_map::Entry, HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use tokio_util::sync::CancellationToken;

use crate::{
    monitor::{DownNotice, MonitorRef},
    operation::run_op,
    transport::{DelegateInbox, DelegateRequest, ReplySender},
    Config, Delivery, Message, MonitorId, NodeId, Pid, ProcessInbox, Transport,
};

/// A delegate worker: the long-lived server process that receives coalesced
/// invocations for its node and serves the distributed monitor protocol.
///
/// Each worker owns a single mailbox and processes it sequentially, so
/// invocations from one caller are executed in send order. Operations are
/// applied to the worker's own node's targets in the list order the caller
/// grouped them; all failures, error returns and panics alike, are
/// captured into structured outcomes and a worker never dies on one.
///
/// Workers are normally started through [`WorkerPool`](crate::WorkerPool).
pub struct DelegateWorker<M: Message, S: Transport<M>> {
    node: NodeId,
    name: Arc<str>,
    /// Substrate identity used as the observer of native subscriptions;
    /// down notices for watched processes arrive on its inbox.
    identity: Pid<M>,
    mailbox: DelegateInbox<M>,
    inbox: ProcessInbox<M>,
    /// Invariant: an entry exists iff its observer set is non-empty, and
    /// holds exactly one native subscription on the watched process.
    monitors: HashMap<Pid<M>, (MonitorId, HashSet<Pid<M>>)>,
    transport: S,
    cancel: CancellationToken,
    hibernate_after: Duration,
}

impl<M: Message, S: Transport<M>> DelegateWorker<M, S> {
    pub fn new(
        transport: S,
        node: NodeId,
        name: Arc<str>,
        mailbox: DelegateInbox<M>,
        cancel: CancellationToken,
        config: &Config,
    ) -> Self {
        let (identity, inbox) = transport.spawn(&node);
        Self {
            node,
            name,
            identity,
            mailbox,
            inbox,
            monitors: HashMap::new(),
            transport,
            cancel,
            hibernate_after: config.hibernate_after(),
        }
    }

    /// The worker's registration name.
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                message = self.mailbox.recv() => {
                    let Some((request, reply)) = message else {
                        break;
                    };
                    self.handle(request, reply).await;
                }

                delivery = self.inbox.recv() => {
                    match delivery {
                        Some(Delivery::Down(notice)) => self.watched_died(notice),
                        Some(_) => {}
                        None => break,
                    }
                }

                _ = tokio::time::sleep(self.hibernate_after) => self.hibernate(),
            }
        }
    }

    async fn handle(&mut self, request: DelegateRequest<M>, reply: Option<ReplySender<M>>) {
        match request {
            DelegateRequest::Invoke { op, groups } => {
                let targets = groups.get(&self.node).cloned().unwrap_or_default();
                let mut outcomes = Vec::with_capacity(targets.len());
                for target in targets {
                    outcomes.push(run_op(&op, target).await);
                }
                if let Some(reply) = reply {
                    if reply.send(outcomes).is_err() {
                        tracing::warn!(delegate = %self.name, "caller went away before the reply was delivered");
                    }
                }
            }
            DelegateRequest::Monitor { observer, watched } => self.add_observer(observer, watched),
            DelegateRequest::Demonitor { observer, watched } => {
                self.drop_observer(&observer, &watched)
            }
        }
    }

    /// Add an observer for `watched`, establishing the single native
    /// subscription when this is the first one.
    fn add_observer(&mut self, observer: Pid<M>, watched: Pid<M>) {
        match self.monitors.entry(watched) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().1.insert(observer);
            }
            Entry::Vacant(entry) => {
                let id = self.transport.monitor(entry.key(), &self.identity);
                entry.insert((id, HashSet::from([observer])));
            }
        }
    }

    /// Remove an observer; the last one out cancels the native subscription.
    fn drop_observer(&mut self, observer: &Pid<M>, watched: &Pid<M>) {
        let Entry::Occupied(mut entry) = self.monitors.entry(watched.clone()) else {
            return;
        };
        entry.get_mut().1.remove(observer);
        if entry.get().1.is_empty() {
            let (id, _) = entry.remove();
            self.transport.demonitor(id);
        }
    }

    /// Native down notice arrived: fan it out to every observer with the
    /// composite handle they hold, then drop the table entry.
    fn watched_died(&mut self, notice: DownNotice<M>) {
        let Some((_, observers)) = self.monitors.remove(&notice.watched) else {
            return;
        };
        for observer in observers {
            observer.deliver_down(DownNotice {
                monitor: MonitorRef::Delegate {
                    name: self.name.clone(),
                    watched: notice.watched.clone(),
                },
                watched: notice.watched.clone(),
                reason: notice.reason.clone(),
            });
        }
    }

    /// Idle resource hint: give back spare table capacity.
    fn hibernate(&mut self) {
        self.monitors.shrink_to_fit();
        tracing::trace!(delegate = %self.name, "hibernating");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::{
        testing::{eventually, Cluster},
        Config, Delivery, ExitReason, Invoker, MonitorRef, Transport, WorkerPool,
    };

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum TestMsg {
        #[allow(dead_code)]
        Ping(u32),
    }

    fn config() -> Config {
        Config::default().with_pool_size(4)
    }

    #[tokio::test]
    async fn observers_share_one_native_subscription() {
        let cluster = Cluster::<TestMsg>::new();
        let a = cluster.add_node("a");
        let b = cluster.add_node("b");
        let _pool = WorkerPool::start(&cluster, &b, &config()).unwrap();

        let (watched, _watched_inbox) = cluster.spawn(&b);
        let mut observers = Vec::new();
        for _ in 0..3 {
            let (pid, inbox) = cluster.spawn(&a);
            observers.push((Invoker::new(pid, cluster.clone()), inbox));
        }

        let refs: Vec<_> = observers
            .iter()
            .map(|(invoker, _)| invoker.monitor(&watched))
            .collect();

        // All observers land on the same delegate: routing is keyed on the
        // watched pid, not the observer.
        assert_eq!(refs[0], refs[1]);
        assert_eq!(refs[1], refs[2]);
        assert!(matches!(refs[0], MonitorRef::Delegate { .. }));

        assert!(eventually(|| cluster.native_watcher_count(&watched) == 1).await);

        cluster.kill(&watched, ExitReason::other("boom"));

        for (_, inbox) in &mut observers {
            let delivery = tokio::time::timeout(Duration::from_secs(1), inbox.recv())
                .await
                .unwrap()
                .unwrap();
            match delivery {
                Delivery::Down(notice) => {
                    assert_eq!(notice.monitor, refs[0]);
                    assert_eq!(notice.watched, watched);
                    assert_eq!(notice.reason, ExitReason::other("boom"));
                }
                other => panic!("unexpected delivery: {other:?}"),
            }
        }

        assert_eq!(cluster.native_watcher_count(&watched), 0);
    }

    #[tokio::test]
    async fn last_demonitor_cancels_the_native_subscription() {
        let cluster = Cluster::<TestMsg>::new();
        let a = cluster.add_node("a");
        let b = cluster.add_node("b");
        let _pool = WorkerPool::start(&cluster, &b, &config()).unwrap();

        let (watched, _watched_inbox) = cluster.spawn(&b);
        let (o1, _i1) = cluster.spawn(&a);
        let (o2, _i2) = cluster.spawn(&a);
        let first = Invoker::new(o1, cluster.clone());
        let second = Invoker::new(o2, cluster.clone());

        let ref1 = first.monitor(&watched);
        let ref2 = second.monitor(&watched);
        assert!(eventually(|| cluster.native_watcher_count(&watched) == 1).await);

        first.demonitor(ref1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cluster.native_watcher_count(&watched), 1);

        second.demonitor(ref2);
        assert!(eventually(|| cluster.native_watcher_count(&watched) == 0).await);
    }

    #[tokio::test]
    async fn monitoring_a_dead_remote_process_fires_noproc() {
        let cluster = Cluster::<TestMsg>::new();
        let a = cluster.add_node("a");
        let b = cluster.add_node("b");
        let _pool = WorkerPool::start(&cluster, &b, &config()).unwrap();

        let (watched, _watched_inbox) = cluster.spawn(&b);
        cluster.kill(&watched, ExitReason::Normal);

        let (observer, mut inbox) = cluster.spawn(&a);
        let invoker = Invoker::new(observer, cluster.clone());
        let monitor = invoker.monitor(&watched);

        let delivery = tokio::time::timeout(Duration::from_secs(1), inbox.recv())
            .await
            .unwrap()
            .unwrap();
        match delivery {
            Delivery::Down(notice) => {
                assert_eq!(notice.monitor, monitor);
                assert_eq!(notice.reason, ExitReason::NoProc);
            }
            other => panic!("unexpected delivery: {other:?}"),
        }
    }

    #[tokio::test]
    async fn local_monitor_uses_the_native_fast_path() {
        let cluster = Cluster::<TestMsg>::new();
        let a = cluster.add_node("a");

        let (watched, _watched_inbox) = cluster.spawn(&a);
        let (observer, mut inbox) = cluster.spawn(&a);
        let invoker = Invoker::new(observer, cluster.clone());

        let monitor = invoker.monitor(&watched);
        assert!(matches!(monitor, MonitorRef::Native(_)));
        assert_eq!(cluster.native_watcher_count(&watched), 1);
        // No delegate traffic for the local case.
        assert!(cluster.spy().is_empty());

        cluster.kill(&watched, ExitReason::Normal);
        let delivery = tokio::time::timeout(Duration::from_secs(1), inbox.recv())
            .await
            .unwrap()
            .unwrap();
        match delivery {
            Delivery::Down(notice) => {
                assert_eq!(notice.monitor, monitor);
                assert_eq!(notice.watched, watched);
                assert_eq!(notice.reason, ExitReason::Normal);
            }
            other => panic!("unexpected delivery: {other:?}"),
        }
    }

    #[tokio::test]
    async fn local_demonitor_cancels_the_native_subscription() {
        let cluster = Cluster::<TestMsg>::new();
        let a = cluster.add_node("a");

        let (watched, _watched_inbox) = cluster.spawn(&a);
        let (observer, _inbox) = cluster.spawn(&a);
        let invoker = Invoker::new(observer, cluster.clone());

        let monitor = invoker.monitor(&watched);
        assert_eq!(cluster.native_watcher_count(&watched), 1);
        invoker.demonitor(monitor);
        assert_eq!(cluster.native_watcher_count(&watched), 0);
    }
}
