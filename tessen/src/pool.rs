use std::sync::Arc;

use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;

use crate::{delegate::DelegateWorker, routing, Config, Error, Message, NodeId, Result, Transport};

/// Fixed-size set of delegate workers on one node.
///
/// Workers are registered under `prefix0 .. prefix(size-1)` at node startup
/// and live until [`shutdown`](Self::shutdown); there is no dynamic creation
/// or teardown during normal operation. The pool size bounds the routing
/// hash, so it should be uniform across the cluster (see
/// [`Config`](crate::Config)).
///
/// ```rust,ignore
/// let pool = WorkerPool::start(&transport, &node, &Config::default())?;
/// // ... serve traffic ...
/// pool.shutdown().await?;
/// ```
#[derive(Debug)]
pub struct WorkerPool {
    node: NodeId,
    prefix: Arc<str>,
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl WorkerPool {
    /// Register and spawn `config.pool_size()` workers on `node`.
    pub fn start<M, S>(transport: &S, node: &NodeId, config: &Config) -> Result<Self>
    where
        M: Message,
        S: Transport<M>,
    {
        let mut pool = WorkerPool {
            node: node.clone(),
            prefix: config.name_prefix(),
            cancel: CancellationToken::new(),
            tasks: JoinSet::new(),
        };
        for index in 0..config.pool_size() {
            pool.start_worker(transport, config, index)?;
        }
        Ok(pool)
    }

    /// Register and spawn a single worker at `index`, returning its name.
    pub fn start_worker<M, S>(
        &mut self,
        transport: &S,
        config: &Config,
        index: usize,
    ) -> Result<Arc<str>>
    where
        M: Message,
        S: Transport<M>,
    {
        let name = routing::delegate_name(&self.prefix, index);
        let (mailbox, inbox) = mpsc::unbounded_channel();
        transport.register(&self.node, &name, mailbox)?;
        let worker = DelegateWorker::new(
            transport.clone(),
            self.node.clone(),
            name.clone(),
            inbox,
            self.cancel.child_token(),
            config,
        );
        self.tasks.spawn(worker.run());
        Ok(name)
    }

    /// Number of workers currently running.
    pub fn size(&self) -> usize {
        self.tasks.len()
    }

    /// The node this pool serves.
    pub fn node(&self) -> &NodeId {
        &self.node
    }

    /// The registration prefix of this pool's workers.
    pub fn prefix(&self) -> &Arc<str> {
        &self.prefix
    }

    /// Stop every worker and await their tasks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if a worker task panicked.
    pub async fn shutdown(mut self) -> Result<()> {
        self.cancel.cancel();
        while let Some(joined) = self.tasks.join_next().await {
            joined.map_err(|e| Error::Internal(Arc::new(e)))?;
        }
        Ok(())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
