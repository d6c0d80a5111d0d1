// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Broadcast cancellation handles.
//!
//! A [`Cancellable`] wraps a [`CancellationToken`] and adds synchronous
//! handlers, which the worker pool needs to react to cancellation of a
//! body that is blocked on a thread rather than awaiting a future.
//!
//! ```text
//! request ctx ──cancel()──► child (discovery) ──► child (probe A)
//!                                             └──► child (probe B)
//! ```
//!
//! Cancelling a parent cancels every child. Cancelling a child never
//! touches its parent or siblings.

use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;

/// Identifier returned by [`Cancellable::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Handlers {
    next_id: u64,
    entries: Vec<(HandlerId, Handler)>,
}

struct Inner {
    token: CancellationToken,
    handlers: Mutex<Handlers>,
    /// Forwarding handler registered on the parent, removed on drop.
    parent: Option<(Weak<Inner>, HandlerId)>,
}

impl Inner {
    fn disconnect(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.lock();
        let before = handlers.entries.len();
        handlers.entries.retain(|(entry, _)| *entry != id);
        handlers.entries.len() != before
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some((parent, id)) = self.parent.take() {
            if let Some(parent) = parent.upgrade() {
                parent.disconnect(id);
            }
        }
    }
}

/// Cloneable, thread-safe cancellation handle.
#[derive(Clone)]
pub struct Cancellable {
    inner: Arc<Inner>,
}

impl Cancellable {
    /// Create a fresh, uncancelled handle.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                token: CancellationToken::new(),
                handlers: Mutex::new(Handlers::default()),
                parent: None,
            }),
        }
    }

    /// Create a child handle, cancelled whenever `self` is.
    ///
    /// The child detaches from `self` once its last clone is dropped.
    pub fn child(&self) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let weak = weak.clone();
            let id = self.connect(move || {
                if let Some(inner) = weak.upgrade() {
                    Cancellable { inner }.cancel();
                }
            });
            Inner {
                token: self.inner.token.child_token(),
                handlers: Mutex::new(Handlers::default()),
                parent: id.map(|id| (Arc::downgrade(&self.inner), id)),
            }
        });
        Self { inner }
    }

    /// Cancel this handle and every child, running connected handlers.
    pub fn cancel(&self) {
        self.inner.token.cancel();
        let entries = std::mem::take(&mut self.inner.handlers.lock().entries);
        for (_, handler) in entries {
            handler();
        }
    }

    /// Whether [`cancel`](Self::cancel) was called on this handle or a parent.
    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Wait until the handle is cancelled.
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await
    }

    /// Underlying token, for use in `tokio::select!`.
    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    /// Run `handler` once when the handle is cancelled.
    ///
    /// If the handle is already cancelled the handler runs immediately on
    /// the calling thread and `None` is returned.
    pub fn connect<F>(&self, handler: F) -> Option<HandlerId>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut handlers = self.inner.handlers.lock();
        if self.inner.token.is_cancelled() {
            drop(handlers);
            handler();
            return None;
        }
        let id = HandlerId(handlers.next_id);
        handlers.next_id += 1;
        handlers.entries.push((id, Box::new(handler)));
        Some(id)
    }

    /// Remove a handler registered with [`connect`](Self::connect).
    ///
    /// Returns false if the handler already ran or was never registered.
    pub fn disconnect(&self, id: HandlerId) -> bool {
        self.inner.disconnect(id)
    }
}

impl Default for Cancellable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Cancellable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cancellable")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_cancel_runs_handlers_once() {
        let cancellable = Cancellable::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        assert!(cancellable
            .connect(move || {
                h.fetch_add(1, Ordering::SeqCst);
            })
            .is_some());

        cancellable.cancel();
        cancellable.cancel();
        assert!(cancellable.is_cancelled());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_connect_after_cancel_runs_immediately() {
        let cancellable = Cancellable::new();
        cancellable.cancel();

        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let id = cancellable.connect(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert!(id.is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disconnect() {
        let cancellable = Cancellable::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let id = cancellable
            .connect(move || {
                h.fetch_add(1, Ordering::SeqCst);
            })
            .expect("handler registered");

        assert!(cancellable.disconnect(id));
        assert!(!cancellable.disconnect(id));
        cancellable.cancel();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_child_follows_parent_only() {
        let parent = Cancellable::new();
        let a = parent.child();
        let b = parent.child();

        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        b.connect(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });

        a.cancel();
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
        assert!(!parent.is_cancelled());

        parent.cancel();
        assert!(b.is_cancelled());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropped_children_detach_from_parent() {
        let parent = Cancellable::new();
        for _ in 0..1000 {
            let child = parent.child();
            let clone = child.clone();
            drop(child);
            assert!(!clone.is_cancelled());
        }
        assert_eq!(parent.inner.handlers.lock().entries.len(), 0);

        let kept = parent.child();
        let grandchild = kept.child();
        assert_eq!(parent.inner.handlers.lock().entries.len(), 1);
        drop(grandchild);
        assert_eq!(kept.inner.handlers.lock().entries.len(), 0);

        parent.cancel();
        assert!(kept.is_cancelled());
    }

    #[test]
    fn test_child_of_cancelled_parent_is_cancelled() {
        let parent = Cancellable::new();
        parent.cancel();
        let child = parent.child();
        assert!(child.is_cancelled());
        assert_eq!(parent.inner.handlers.lock().entries.len(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves() {
        let cancellable = Cancellable::new();
        let c = cancellable.clone();
        let waiter = tokio::spawn(async move { c.cancelled().await });
        cancellable.cancel();
        waiter.await.expect("waiter task");
    }
}
