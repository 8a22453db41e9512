use std::{fmt, hash};

use tokio::sync::{mpsc, oneshot};

use crate::{monitor::DownNotice, Error, NodeId, Result};

/// Receiving half of a process inbox, as handed out by
/// [`Transport::spawn`](crate::Transport::spawn).
pub type ProcessInbox<M> = mpsc::UnboundedReceiver<Delivery<M>>;

/// What a process inbox receives.
///
/// User messages arrive as [`Cast`](Delivery::Cast) (asynchronous) or
/// [`Call`](Delivery::Call) (synchronous, carrying a reply channel the
/// receiver is expected to complete). Monitor notifications arrive as
/// [`Down`](Delivery::Down).
#[derive(Debug)]
pub enum Delivery<M> {
    Cast(M),
    Call(M, oneshot::Sender<M>),
    Down(DownNotice<M>),
}

/// Opaque handle to a process somewhere in the cluster.
///
/// A `Pid` carries its home [`NodeId`], a node-unique serial, and the
/// process's mailbox sender. Identity (equality, hashing, ordering of
/// outcomes) is determined by `(node, serial)` alone; the sender is
/// transport plumbing.
///
/// `Pid`s are cheap to clone and are the unit the fan-out core partitions,
/// groups, and reports outcomes on.
pub struct Pid<M> {
    node: NodeId,
    serial: u64,
    sender: mpsc::UnboundedSender<Delivery<M>>,
}

impl<M> Pid<M> {
    pub(crate) fn new(node: NodeId, serial: u64, sender: mpsc::UnboundedSender<Delivery<M>>) -> Self {
        Self {
            node,
            serial,
            sender,
        }
    }

    /// The node this process lives on.
    #[inline]
    pub fn node(&self) -> &NodeId {
        &self.node
    }

    /// Node-unique serial of this process.
    #[inline]
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Send an asynchronous message to this process.
    pub fn cast(&self, message: M) -> Result<()> {
        self.sender
            .send(Delivery::Cast(message))
            .map_err(|_| Error::MailboxClosed)
    }

    /// Send a synchronous message and await the reply. No timeout is applied.
    pub async fn call(&self, message: M) -> Result<M> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(Delivery::Call(message, reply_tx))
            .map_err(|_| Error::MailboxClosed)?;
        reply_rx.await.map_err(|_| Error::NoReply)
    }

    /// Deliver a monitor notification, ignoring a closed inbox. Observers
    /// may legitimately be gone by the time their watched process dies.
    pub(crate) fn deliver_down(&self, notice: DownNotice<M>) {
        let _ = self.sender.send(Delivery::Down(notice));
    }
}

impl<M> Clone for Pid<M> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
            serial: self.serial,
            sender: self.sender.clone(),
        }
    }
}

impl<M> PartialEq for Pid<M> {
    fn eq(&self, other: &Self) -> bool {
        self.serial == other.serial && self.node == other.node
    }
}

impl<M> Eq for Pid<M> {}

impl<M> hash::Hash for Pid<M> {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        self.node.hash(state);
        self.serial.hash(state);
    }
}

impl<M> fmt::Debug for Pid<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pid")
            .field("node", &self.node)
            .field("serial", &self.serial)
            .finish_non_exhaustive()
    }
}

impl<M> fmt::Display for Pid<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.serial)
    }
}
