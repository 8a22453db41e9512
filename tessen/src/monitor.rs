use std::{fmt, sync::Arc};

use uuid::Uuid;

use crate::Pid;

/// Handle of a native liveness subscription, backed by a UUID v4.
///
/// Returned by [`Transport::monitor`](crate::Transport::monitor). IDs are
/// random (not monotonic); they only need to be unique for the lifetime of
/// the subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct MonitorId(u128);

impl MonitorId {
    /// Generate a new random monitor ID (UUID v4).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().as_u128())
    }

    /// Returns the raw `u128` value.
    pub fn value(&self) -> u128 {
        self.0
    }
}

impl fmt::Display for MonitorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Uuid::from_u128(self.0))
    }
}

impl Default for MonitorId {
    fn default() -> Self {
        MonitorId::new()
    }
}

/// Subscription handle returned by [`Invoker::monitor`](crate::Invoker::monitor).
///
/// Watching a process on the observer's own node falls through to the
/// substrate's native monitor and yields [`Native`](MonitorRef::Native).
/// Watching a remote process goes through the delegate protocol and yields
/// the composite [`Delegate`](MonitorRef::Delegate) handle.
/// [`Invoker::demonitor`](crate::Invoker::demonitor) dispatches on the variant.
pub enum MonitorRef<M> {
    Native(MonitorId),
    Delegate { name: Arc<str>, watched: Pid<M> },
}

impl<M> Clone for MonitorRef<M> {
    fn clone(&self) -> Self {
        match self {
            MonitorRef::Native(id) => MonitorRef::Native(*id),
            MonitorRef::Delegate { name, watched } => MonitorRef::Delegate {
                name: name.clone(),
                watched: watched.clone(),
            },
        }
    }
}

impl<M> PartialEq for MonitorRef<M> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (MonitorRef::Native(a), MonitorRef::Native(b)) => a == b,
            (
                MonitorRef::Delegate { name: a, watched: x },
                MonitorRef::Delegate { name: b, watched: y },
            ) => a == b && x == y,
            _ => false,
        }
    }
}

impl<M> Eq for MonitorRef<M> {}

impl<M> fmt::Debug for MonitorRef<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorRef::Native(id) => f.debug_tuple("Native").field(id).finish(),
            MonitorRef::Delegate { name, watched } => f
                .debug_struct("Delegate")
                .field("name", name)
                .field("watched", watched)
                .finish(),
        }
    }
}

/// Why a watched process went away.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExitReason {
    Normal,
    /// The process was already dead when the monitor was established.
    NoProc,
    Other(Arc<str>),
}

impl ExitReason {
    pub fn other(reason: &str) -> Self {
        ExitReason::Other(Arc::from(reason))
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Normal => write!(f, "normal"),
            ExitReason::NoProc => write!(f, "noproc"),
            ExitReason::Other(reason) => write!(f, "{reason}"),
        }
    }
}

/// Notification that a watched process died, delivered to every observer as
/// [`Delivery::Down`](crate::Delivery::Down).
pub struct DownNotice<M> {
    /// The subscription this notice belongs to, in the shape the observer
    /// originally received it (native or composite).
    pub monitor: MonitorRef<M>,
    pub watched: Pid<M>,
    pub reason: ExitReason,
}

impl<M> Clone for DownNotice<M> {
    fn clone(&self) -> Self {
        Self {
            monitor: self.monitor.clone(),
            watched: self.watched.clone(),
            reason: self.reason.clone(),
        }
    }
}

impl<M> PartialEq for DownNotice<M> {
    fn eq(&self, other: &Self) -> bool {
        self.monitor == other.monitor
            && self.watched == other.watched
            && self.reason == other.reason
    }
}

impl<M> Eq for DownNotice<M> {}

impl<M> fmt::Debug for DownNotice<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownNotice")
            .field("monitor", &self.monitor)
            .field("watched", &self.watched)
            .field("reason", &self.reason)
            .finish()
    }
}
