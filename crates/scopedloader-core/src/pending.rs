//! `PendingValue`: a value requested from a loader but not yet dispatched.
//!
//! Each queued key owns the sending half of a oneshot channel; the dispatch
//! cycle that carries the key sends the outcome once (primed values are sent
//! at creation). Clones share one receiver, so every caller that loaded an
//! equal key observes the same result. A sender dropped without sending
//! resolves the value to [`LoadError::Cancelled`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use futures::future::{self, Shared};
use futures::FutureExt;

use crate::error::LoadError;

type Outcome<V> = Result<V, LoadError>;

/// Shared, future-like handle to a loader result.
pub struct PendingValue<V> {
    inner: Shared<oneshot::Receiver<Outcome<V>>>,
    loader: Arc<str>,
}

/// Sending half of a [`PendingValue`], held by the loader's queue.
pub(crate) struct Completer<V> {
    tx: oneshot::Sender<Outcome<V>>,
}

impl<V> Completer<V> {
    /// Send the outcome. Ignored if every receiver is gone.
    pub(crate) fn complete(self, outcome: Outcome<V>) {
        let _ = self.tx.send(outcome);
    }
}

impl<V> Clone for PendingValue<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            loader: self.loader.clone(),
        }
    }
}

impl<V: Clone> PendingValue<V> {
    pub(crate) fn channel(loader: Arc<str>) -> (Self, Completer<V>) {
        let (tx, rx) = oneshot::channel();
        let pending = Self {
            inner: rx.shared(),
            loader,
        };
        (pending, Completer { tx })
    }

    pub(crate) fn completed(loader: Arc<str>, outcome: Outcome<V>) -> Self {
        let (pending, completer) = Self::channel(loader);
        completer.complete(outcome);
        pending
    }

    fn settle(&self, received: Result<Outcome<V>, oneshot::Canceled>) -> Outcome<V> {
        received.unwrap_or_else(|_| {
            Err(LoadError::Cancelled {
                loader: self.loader.to_string(),
            })
        })
    }

    /// Returns `true` once a dispatch (or prime) has completed this value.
    pub fn is_done(&self) -> bool {
        self.get_now().is_some()
    }

    /// Returns `true` if this value completed with an error.
    pub fn is_failed(&self) -> bool {
        matches!(self.get_now(), Some(Err(_)))
    }

    /// The outcome, if already available. Never blocks.
    pub fn get_now(&self) -> Option<Outcome<V>> {
        if let Some(received) = self.inner.peek() {
            return Some(self.settle(received.clone()));
        }
        // Nothing has polled the receiver since it was sent to.
        self.inner.clone().now_or_never().map(|r| self.settle(r))
    }

    /// Returns `true` if both handles share one receiver.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.inner.ptr_eq(&other.inner)
    }

    /// Await every value, failing on the first error.
    pub async fn join_all(pending: Vec<PendingValue<V>>) -> Result<Vec<V>, LoadError> {
        future::try_join_all(pending).await
    }
}

impl<V: Clone> Future for PendingValue<V> {
    type Output = Outcome<V>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        this.inner.poll_unpin(cx).map(|r| this.settle(r))
    }
}

impl<V: Clone> std::fmt::Debug for PendingValue<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingValue")
            .field("loader", &self.loader)
            .field("done", &self.inner.peek().is_some())
            .finish()
    }
}
