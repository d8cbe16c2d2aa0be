use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::oneshot;

/// How a unit of submitted work ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Applied and committed by the writer.
    Committed,
    /// Nothing to do: the file was up to date, unsupported or gone.
    Skipped,
    /// The batch carrying the work failed and was rolled back.
    RolledBack,
    /// Dropped before the writer got to it (shutdown or cache invalidation).
    Cancelled,
}

/// Fires the paired [`CompletionHandle`]. Dropping it without calling
/// [`Completer::complete`] resolves the handle as [`Outcome::Cancelled`].
pub struct Completer {
    tx: oneshot::Sender<Outcome>,
}

impl Completer {
    pub fn complete(self, outcome: Outcome) {
        let _ = self.tx.send(outcome);
    }
}

impl fmt::Debug for Completer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// Cloneable, awaitable result of submitted work. Clones observe the same
/// outcome.
#[derive(Clone)]
pub struct CompletionHandle {
    inner: Shared<BoxFuture<'static, Outcome>>,
}

pub fn completion() -> (Completer, CompletionHandle) {
    let (tx, rx) = oneshot::channel();
    let inner = async move { rx.await.unwrap_or(Outcome::Cancelled) }
        .boxed()
        .shared();
    (Completer { tx }, CompletionHandle { inner })
}

impl CompletionHandle {
    /// A handle that is already resolved.
    pub fn completed(outcome: Outcome) -> Self {
        Self {
            inner: futures::future::ready(outcome).boxed().shared(),
        }
    }

    /// Blocks the calling thread until the work is done.
    pub fn wait(&self) -> Outcome {
        futures::executor::block_on(self.inner.clone())
    }

    pub fn try_outcome(&self) -> Option<Outcome> {
        self.inner.clone().now_or_never()
    }

    pub fn is_done(&self) -> bool {
        self.try_outcome().is_some()
    }

    /// True when both handles were produced by the same [`completion`] call.
    pub fn same_as(&self, other: &CompletionHandle) -> bool {
        self.inner.ptr_eq(&other.inner)
    }
}

impl Future for CompletionHandle {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx)
    }
}

impl fmt::Debug for CompletionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionHandle")
            .field("outcome", &self.try_outcome())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_outcome() {
        let (completer, handle) = completion();
        let other = handle.clone();
        assert!(handle.same_as(&other));
        assert!(!handle.is_done());

        completer.complete(Outcome::Committed);
        assert_eq!(handle.wait(), Outcome::Committed);
        assert_eq!(other.try_outcome(), Some(Outcome::Committed));
    }

    #[test]
    fn test_dropped_completer_cancels() {
        let (completer, handle) = completion();
        drop(completer);
        assert_eq!(handle.wait(), Outcome::Cancelled);
    }

    #[tokio::test]
    async fn test_handle_is_awaitable() {
        let (completer, handle) = completion();
        tokio::spawn(async move { completer.complete(Outcome::Skipped) });
        assert_eq!(handle.await, Outcome::Skipped);
    }
}
