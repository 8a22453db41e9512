use std::sync::Arc;

use crate::{Fault, NodeId};

/// The single error type for all Tessen operations.
///
/// Every fallible Tessen API returns `tessen::Result<T>` (alias for
/// `Result<T, tessen::Error>`). List-shaped invocations never return an
/// error; per-target failures come back as structured [`Fault`]s instead.
/// `Error` surfaces on the single-target shape (where the captured fault is
/// re-raised in the caller) and on registration and shutdown paths.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// A single-target invocation failed; carries the fault captured at the
    /// target's node.
    #[error(transparent)]
    Invocation(Fault),

    #[error("node '{0}' is down")]
    NodeDown(NodeId),

    #[error("process mailbox closed")]
    MailboxClosed,

    #[error("no reply from call target")]
    NoReply,

    #[error("delegate '{0}' is already registered")]
    DuplicateDelegateName(Arc<str>),

    #[error("unknown node '{0}'")]
    UnknownNode(NodeId),

    #[error("worker task failed: {0}")]
    Internal(#[source] Arc<dyn std::error::Error + Send + Sync>),
}

impl From<Fault> for Error {
    fn from(fault: Fault) -> Self {
        match fault {
            Fault::NodeDown(node) => Error::NodeDown(node),
            other => Error::Invocation(other),
        }
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Invocation(a), Self::Invocation(b)) => a == b,
            (Self::NodeDown(a), Self::NodeDown(b)) => a == b,
            (Self::MailboxClosed, Self::MailboxClosed) => true,
            (Self::NoReply, Self::NoReply) => true,
            (Self::DuplicateDelegateName(a), Self::DuplicateDelegateName(b)) => a == b,
            (Self::UnknownNode(a), Self::UnknownNode(b)) => a == b,
            (Self::Internal(a), Self::Internal(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for Error {}
