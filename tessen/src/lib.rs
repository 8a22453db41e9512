#![cfg_attr(docsrs, feature(doc_cfg))]
//! # Tessen
//!
//! A cross-node invocation multiplexer for Tokio.
//!
//! Tessen sits between a broadcaster (say, a routing layer fanning a message
//! to thousands of queue processes) and the per-process mailboxes that
//! eventually receive it. Instead of paying one inter-node message per
//! remote target, it partitions the target set by node and sends each peer
//! node a single coalesced request, which a delegate worker there unpacks
//! and applies locally, while preserving the order of operations issued by
//! any one caller against any one target.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tessen::{testing::Cluster, Config, Invoker, Operation, WorkerPool};
//!
//! #[derive(Clone, Debug)]
//! enum QueueMessage {
//!     Confirm(u64),
//! }
//!
//! # #[tokio::main] async fn main() -> tessen::Result {
//! let cluster = Cluster::<QueueMessage>::new();
//! let here = cluster.add_node("here");
//! let there = cluster.add_node("there");
//! let pool = WorkerPool::start(&cluster, &there, &Config::default())?;
//!
//! let (caller, _inbox) = cluster.spawn(&here);
//! let invoker = Invoker::new(caller, cluster.clone());
//!
//! // One message crosses to "there", no matter how many targets live on it.
//! let (confirmed, failed) = invoker
//!     .invoke(targets, Operation::send_call(QueueMessage::Confirm(42)))
//!     .await;
//! # pool.shutdown().await }
//! ```
//!
//! ## Core Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Invoker`] | Caller-side fan-out: partition, coalesce, merge outcomes |
//! | [`Operation`] | Captured unary function applied to each target |
//! | [`Pid`] | Opaque process handle carrying its home node |
//! | [`Outcome`] / [`Fault`] | Per-target result with structured failure payload |
//! | [`DelegateWorker`] | Server executing coalesced requests on its node |
//! | [`WorkerPool`] | Fixed-size, deterministically named delegate pool |
//! | [`MonitorRef`] | Native or delegate-multiplexed liveness subscription |
//! | [`Transport`] | Façade over the underlying message substrate |
//!
//! ## Ordering
//!
//! Routing hashes the **caller's** identity into the delegate pool and
//! memoizes the result for the caller's lifetime, so every invocation from
//! one caller flows through the same delegate on every node. The substrate
//! guarantees FIFO between any two endpoints; together that means a `cast`
//! followed by a `call` from the same caller reaches the target in that
//! order. No ordering holds between different callers or across different
//! targets, not even between targets of one coalesced invocation.
//!
//! ## Failure Model
//!
//! List-shaped invocations never raise: every target comes back in either
//! the success list or the failure list, with operation errors, caught
//! panics, and synthesized node-down faults all represented as [`Fault`]s.
//! The single-target shape re-raises the captured fault in the caller as
//! [`Error`]. Fire-and-forget drops failures entirely. Requests apply **no
//! timeout**; node-down detection by the substrate is the only escape
//! hatch, which is precisely what keeps FIFO intact.
//!
//! ## Monitors
//!
//! [`Invoker::monitor`] watches a process anywhere in the cluster. Remote
//! watches are multiplexed: all observers of one process share a single
//! native subscription held by the delegate on its node, chosen by hashing
//! the watched pid.
//!
//! ## Features
//!
//! - **`test-harness`** - In-memory [`testing::Cluster`], transport spy, and
//!   settle helpers for tests and examples
//! - **`serde`** - Serialization derives on plain data types (e.g. [`NodeId`],
//!   [`Config`])
//!
//! ## Examples
//!
//! See the `examples/` directory:
//!
//! - `fanout.rs` - Coalesced invocation across two nodes
//! - `watchdog.rs` - Multiplexed remote monitors

mod config;
mod delegate;
mod error;
mod fanout;
mod message;
mod monitor;
mod node_id;
mod operation;
mod outcome;
mod pid;
mod pool;
mod routing;
mod transport;

#[cfg(any(test, feature = "test-harness"))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-harness")))]
pub mod testing;

pub use config::{Config, DEFAULT_NAME_PREFIX, DEFAULT_POOL_SIZE};
pub use delegate::DelegateWorker;
pub use error::Error;
pub use fanout::Invoker;
pub use message::Message;
pub use monitor::{DownNotice, ExitReason, MonitorId, MonitorRef};
pub use node_id::NodeId;
pub use operation::{OpaqueValue, Operation, RawOp};
pub use outcome::{Fault, Outcome};
pub use pid::{Delivery, Pid, ProcessInbox};
pub use pool::WorkerPool;
pub use routing::{delegate_for, delegate_name, stable_hash};
pub use transport::{DelegateInbox, DelegateMailbox, DelegateRequest, ReplySender, Transport};

/// Convenience alias for `Result<T, tessen::Error>`.
pub type Result<T = ()> = std::result::Result<T, Error>;
