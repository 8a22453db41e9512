use std::fmt;

use crate::{operation::OpaqueValue, NodeId, Pid};

/// Structured failure payload attached to a target that could not be served.
///
/// The `trace` fields are best-effort: a trace that cannot be captured or
/// carried across nodes is recorded as `None`; the variant and `reason` are
/// the semantic payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    /// The operation returned an error while being applied at the target's node.
    #[error("operation failed: {reason}")]
    Error {
        reason: String,
        trace: Option<String>,
    },

    /// The operation panicked while being applied. The panic is caught at the
    /// apply site and never unwinds a delegate worker.
    #[error("operation panicked: {reason}")]
    Panic {
        reason: String,
        trace: Option<String>,
    },

    /// The target's node was unreachable. Synthesized on the caller side for
    /// every target grouped onto a node the substrate reported down.
    #[error("node '{0}' went down")]
    NodeDown(NodeId),
}

impl Fault {
    pub fn error(reason: impl Into<String>) -> Self {
        Fault::Error {
            reason: reason.into(),
            trace: None,
        }
    }

    pub fn is_node_down(&self) -> bool {
        matches!(self, Fault::NodeDown(_))
    }
}

/// Per-target result of applying an operation.
///
/// This is the shape delegates reply with and the fan-out core merges on.
/// The public API flattens a list of outcomes into separate success and
/// failure lists, recovering the operation's typed value on the way out.
pub enum Outcome<M> {
    Success { target: Pid<M>, value: OpaqueValue },
    Failure { target: Pid<M>, fault: Fault },
}

impl<M> Outcome<M> {
    pub fn target(&self) -> &Pid<M> {
        match self {
            Outcome::Success { target, .. } | Outcome::Failure { target, .. } => target,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}

impl<M> fmt::Debug for Outcome<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success { target, .. } => f
                .debug_struct("Success")
                .field("target", target)
                .finish_non_exhaustive(),
            Outcome::Failure { target, fault } => f
                .debug_struct("Failure")
                .field("target", target)
                .field("fault", fault)
                .finish(),
        }
    }
}
