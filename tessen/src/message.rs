/// Marker trait for application messages carried between processes.
///
/// Messages must be `Send + Sync + Clone + 'static` because they:
/// - Cross task boundaries and live inside spawned delegate workers (Send, 'static)
/// - Are captured inside operations shared behind `Arc` (Sync)
/// - Fan out to many targets from a single template (Clone)
///
/// A blanket implementation covers every type satisfying the bounds, so
/// plain enums and structs work without ceremony:
///
/// ```rust
/// #[derive(Clone, Debug)]
/// enum QueueMessage {
///     Confirm(u64),
///     Flush,
/// }
/// // QueueMessage already implements tessen::Message.
/// ```
pub trait Message: Send + Sync + Clone + 'static {}

impl<T> Message for T where T: Send + Sync + Clone + 'static {}
