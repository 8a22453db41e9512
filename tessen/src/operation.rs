use std::{any::Any, fmt, future::Future, marker::PhantomData, panic::AssertUnwindSafe, sync::Arc};

use futures_util::{future::BoxFuture, FutureExt};

use crate::{Fault, Message, Outcome, Pid};

/// Type-erased value produced by an operation. The concrete type is fixed at
/// [`Operation`] construction and recovered by downcast on the caller side.
pub type OpaqueValue = Box<dyn Any + Send>;

type OpFn<M> = dyn Fn(Pid<M>) -> BoxFuture<'static, std::result::Result<OpaqueValue, Fault>>
    + Send
    + Sync;

/// The erased form of an [`Operation`], as it travels inside a
/// [`DelegateRequest`](crate::DelegateRequest). Opaque; delegates apply it,
/// nothing else can be done with it.
pub struct RawOp<M>(Arc<OpFn<M>>);

impl<M> Clone for RawOp<M> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<M> fmt::Debug for RawOp<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawOp").finish_non_exhaustive()
    }
}

/// A captured unary function applied to each target of an invocation.
///
/// Operations run on the target's home node: inline in the caller for local
/// targets, inside a delegate worker for remote ones. The value type `R` is
/// erased while the operation crosses the delegate boundary and restored when
/// outcomes are merged, so [`Invoker::invoke`](crate::Invoker::invoke)
/// returns typed successes.
///
/// # Constructors
///
/// | Constructor | Use |
/// |-------------|-----|
/// | [`apply`](Self::apply) | Infallible async function of the target |
/// | [`try_apply`](Self::try_apply) | Fallible; the error's `Display` output is captured |
/// | [`send_call`](Self::send_call) | Deliver a message synchronously, value is the reply |
/// | [`send_cast`](Self::send_cast) | Deliver a message asynchronously |
///
/// ```rust,ignore
/// let op = Operation::apply(|pid: Pid<QueueMessage>| async move { pid.serial() });
/// let (serials, failures) = invoker.invoke(targets, op).await;
/// ```
pub struct Operation<M, R> {
    run: RawOp<M>,
    _value: PhantomData<fn() -> R>,
}

impl<M, R> Clone for Operation<M, R> {
    fn clone(&self) -> Self {
        Self {
            run: self.run.clone(),
            _value: PhantomData,
        }
    }
}

impl<M, R> fmt::Debug for Operation<M, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation").finish_non_exhaustive()
    }
}

impl<M: Message, R: Send + 'static> Operation<M, R> {
    /// Capture an infallible async function of the target.
    pub fn apply<F, Fut>(f: F) -> Self
    where
        F: Fn(Pid<M>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        Self::from_fn(move |pid| {
            let fut = f(pid);
            async move { Ok(Box::new(fut.await) as OpaqueValue) }.boxed()
        })
    }

    /// Capture a fallible async function of the target. An `Err` return is
    /// recorded as [`Fault::Error`] with the error's `Display` rendering.
    pub fn try_apply<F, Fut, E>(f: F) -> Self
    where
        F: Fn(Pid<M>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        E: fmt::Display,
    {
        Self::from_fn(move |pid| {
            let fut = f(pid);
            async move {
                match fut.await {
                    Ok(value) => Ok(Box::new(value) as OpaqueValue),
                    Err(e) => Err(Fault::error(e.to_string())),
                }
            }
            .boxed()
        })
    }

    fn from_fn<F>(f: F) -> Self
    where
        F: Fn(Pid<M>) -> BoxFuture<'static, std::result::Result<OpaqueValue, Fault>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            run: RawOp(Arc::new(f)),
            _value: PhantomData,
        }
    }

    pub(crate) fn raw(&self) -> RawOp<M> {
        self.run.clone()
    }
}

impl<M: Message> Operation<M, M> {
    /// Deliver `message` to each target synchronously; the per-target value
    /// is the target's reply.
    pub fn send_call(message: M) -> Self {
        Self::try_apply(move |pid: Pid<M>| {
            let message = message.clone();
            async move { pid.call(message).await }
        })
    }
}

impl<M: Message> Operation<M, ()> {
    /// Deliver `message` to each target asynchronously.
    pub fn send_cast(message: M) -> Self {
        Self::try_apply(move |pid: Pid<M>| {
            let message = message.clone();
            async move { pid.cast(message) }
        })
    }
}

/// Apply an erased operation to one target, capturing error returns and
/// panics into a structured [`Outcome`]. This is the single apply site used
/// by both the caller-local path and the delegate workers.
pub(crate) async fn run_op<M: Message>(op: &RawOp<M>, target: Pid<M>) -> Outcome<M> {
    let run = op.0.clone();
    let applied = {
        let target = target.clone();
        AssertUnwindSafe(async move { run.as_ref()(target).await }).catch_unwind()
    };
    match applied.await {
        Ok(Ok(value)) => Outcome::Success { target, value },
        Ok(Err(fault)) => Outcome::Failure { target, fault },
        Err(payload) => Outcome::Failure {
            target,
            fault: Fault::Panic {
                reason: panic_reason(payload),
                trace: None,
            },
        },
    }
}

/// Recover the typed value fixed at [`Operation`] construction.
pub(crate) fn downcast_value<R: 'static>(value: OpaqueValue) -> R {
    *value
        .downcast::<R>()
        .expect("operation value type is fixed at construction")
}

fn panic_reason(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(s) => *s,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(s) => (*s).to_string(),
            Err(_) => "opaque panic payload".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Delivery, NodeId};
    use tokio::sync::mpsc;

    fn pid(serial: u64) -> (Pid<u32>, crate::ProcessInbox<u32>) {
        let (tx, rx) = mpsc::unbounded_channel::<Delivery<u32>>();
        (Pid::new(NodeId::new("a"), serial, tx), rx)
    }

    #[tokio::test]
    async fn apply_produces_a_typed_success() {
        let (target, _inbox) = pid(3);
        let op = Operation::<u32, u64>::apply(|p| async move { p.serial() * 2 });

        match run_op(&op.raw(), target.clone()).await {
            Outcome::Success { target: t, value } => {
                assert_eq!(t, target);
                assert_eq!(downcast_value::<u64>(value), 6);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn error_returns_are_captured_with_their_display() {
        let (target, _inbox) = pid(1);
        let op = Operation::<u32, u32>::try_apply(|_p| async move { Err::<u32, &str>("boom") });

        match run_op(&op.raw(), target).await {
            Outcome::Failure { fault, .. } => {
                assert_eq!(fault, Fault::error("boom"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn panics_are_caught_into_structured_faults() {
        let (target, _inbox) = pid(1);
        let op = Operation::<u32, u32>::apply(|_p| async move { panic!("kaboom") });

        match run_op(&op.raw(), target).await {
            Outcome::Failure {
                fault: Fault::Panic { reason, .. },
                ..
            } => assert!(reason.contains("kaboom")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_call_surfaces_a_closed_inbox_as_a_fault() {
        let (target, inbox) = pid(1);
        drop(inbox);
        let op = Operation::send_call(9u32);

        match run_op(&op.raw(), target).await {
            Outcome::Failure {
                fault: Fault::Error { .. },
                ..
            } => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
