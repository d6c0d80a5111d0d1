// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Single-assignment, cancellable task handles.
//!
//! A [`Task<T>`] completes exactly once with a value, an error, or a
//! cancellation. It can be driven three ways:
//!
//! ```text
//!  Task::spawn(fut)            async body on the tokio runtime, raced
//!                              against the task's cancellable
//!  Task::run_in_thread(body)   blocking body on a WorkerPool thread,
//!                              completes when the body returns
//!  Task::run_in_thread_sync    same, but the caller blocks until done
//! ```
//!
//! Completion is observed either through the callback given at creation
//! or by awaiting the task (it implements [`Future`]). Callbacks are
//! dispatched onto the runtime that was current when the task was
//! created, so a callback never runs inside the call that completed the
//! task.
//!
//! # Cancellation
//!
//! With `check_cancellable` (the default) reading the result after the
//! cancellable fired always yields [`Error::Cancelled`], whatever the body
//! stored. With `return_on_cancel`, a threaded task completes as soon as
//! its cancellable fires; the body keeps running in the background and
//! whatever it stores afterwards is discarded.

pub mod cancel;
pub mod pool;

pub use cancel::{Cancellable, HandlerId};
pub use pool::{WorkerPool, DEFAULT_MAX_THREADS};

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use tokio::runtime::Handle;
use tracing::{error, trace};

use crate::error::Error;
use pool::Schedulable;

/// Completion callback.
pub type Callback<T> = Box<dyn FnOnce(Task<T>) + Send + 'static>;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

struct State<T> {
    source_tag: Option<&'static str>,
    priority: i32,
    check_cancellable: bool,
    return_on_cancel: bool,
    result_set: bool,
    result: Option<Result<T, Error>>,
    threaded: bool,
    synchronous: bool,
    thread_complete: bool,
    thread_cancelled: bool,
    blocking_other: bool,
    completed: bool,
    callback: Option<Callback<T>>,
    waker: Option<Waker>,
    data: Option<Box<dyn Any + Send>>,
    cancel_handler: Option<HandlerId>,
    pool: Option<WorkerPool>,
}

struct Inner<T> {
    id: u64,
    cancellable: Option<Cancellable>,
    runtime: Option<Handle>,
    state: Mutex<State<T>>,
    done: Condvar,
}

impl<T> Inner<T> {
    fn cancellable_fired(&self) -> bool {
        self.cancellable.as_ref().is_some_and(Cancellable::is_cancelled)
    }
}

impl<T: Send + 'static> Schedulable for Inner<T> {
    fn blocking_other(&self) -> bool {
        self.state.lock().blocking_other
    }

    fn is_cancelled(&self) -> bool {
        self.state.lock().check_cancellable && self.cancellable_fired()
    }

    fn priority(&self) -> i32 {
        self.state.lock().priority
    }
}

/// Shared handle to a single-assignment asynchronous result.
pub struct Task<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + 'static> Task<T> {
    /// Create a task observed by awaiting it.
    pub fn new(cancellable: Option<Cancellable>) -> Self {
        Self::build(cancellable, None)
    }

    /// Create a task whose completion invokes `callback`.
    pub fn with_callback<F>(cancellable: Option<Cancellable>, callback: F) -> Self
    where
        F: FnOnce(Task<T>) + Send + 'static,
    {
        Self::build(cancellable, Some(Box::new(callback)))
    }

    fn build(cancellable: Option<Cancellable>, callback: Option<Callback<T>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
                cancellable,
                runtime: Handle::try_current().ok(),
                state: Mutex::new(State {
                    source_tag: None,
                    priority: 0,
                    check_cancellable: true,
                    return_on_cancel: false,
                    result_set: false,
                    result: None,
                    threaded: false,
                    synchronous: false,
                    thread_complete: false,
                    thread_cancelled: false,
                    blocking_other: false,
                    completed: false,
                    callback,
                    waker: None,
                    data: None,
                    cancel_handler: None,
                    pool: None,
                }),
                done: Condvar::new(),
            }),
        }
    }

    /// Process-unique task id.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The task's cancellable, if any.
    pub fn cancellable(&self) -> Option<&Cancellable> {
        self.inner.cancellable.as_ref()
    }

    pub fn source_tag(&self) -> Option<&'static str> {
        self.inner.state.lock().source_tag
    }

    /// Informational tag naming the operation, used in logs.
    pub fn set_source_tag(&self, tag: &'static str) {
        self.inner.state.lock().source_tag = Some(tag);
    }

    pub fn priority(&self) -> i32 {
        self.inner.state.lock().priority
    }

    /// Worker pool priority; lower values run sooner.
    pub fn set_priority(&self, priority: i32) {
        self.inner.state.lock().priority = priority;
    }

    /// Attach arbitrary data to the task, replacing any previous data.
    pub fn set_task_data<D: Any + Send>(&self, data: D) {
        self.inner.state.lock().data = Some(Box::new(data));
    }

    /// Run `f` with the task data, if it is present and of type `D`.
    pub fn with_task_data<D: Any + Send, R>(&self, f: impl FnOnce(Option<&mut D>) -> R) -> R {
        let mut state = self.inner.state.lock();
        f(state.data.as_mut().and_then(|d| d.downcast_mut::<D>()))
    }

    pub fn check_cancellable(&self) -> bool {
        self.inner.state.lock().check_cancellable
    }

    /// Whether reading the result consults the cancellable.
    ///
    /// # Panics
    ///
    /// Disabling the check while return-on-cancel is enabled is a
    /// contract violation.
    pub fn set_check_cancellable(&self, check: bool) {
        let mut state = self.inner.state.lock();
        assert!(
            check || !state.return_on_cancel,
            "task {}: cannot disable cancellation checks while return-on-cancel is set",
            self.inner.id
        );
        state.check_cancellable = check;
    }

    pub fn return_on_cancel(&self) -> bool {
        self.inner.state.lock().return_on_cancel
    }

    /// Complete a threaded task as soon as its cancellable fires.
    ///
    /// Returns false, without changing anything, if the worker already
    /// observed cancellation. Enabling it at that point still completes
    /// the task.
    pub fn set_return_on_cancel(&self, enabled: bool) -> bool {
        let mut state = self.inner.state.lock();
        assert!(
            state.check_cancellable || !enabled,
            "task {}: return-on-cancel requires cancellation checks",
            self.inner.id
        );

        if !state.threaded {
            state.return_on_cancel = enabled;
            return true;
        }

        if state.thread_cancelled {
            if enabled && !state.return_on_cancel {
                state.return_on_cancel = true;
                drop(state);
                self.thread_complete();
            }
            return false;
        }

        state.return_on_cancel = enabled;
        true
    }

    /// Store a successful result.
    ///
    /// # Panics
    ///
    /// Panics if a result was already stored.
    pub fn return_value(&self, value: T) {
        self.set_result(Ok(value));
    }

    /// Store an error.
    ///
    /// # Panics
    ///
    /// Panics if a result was already stored.
    pub fn return_error(&self, err: Error) {
        self.set_result(Err(err));
    }

    /// Store a cancellation error if the cancellable fired.
    pub fn return_error_if_cancelled(&self) -> bool {
        if self.inner.cancellable_fired() {
            self.return_error(Error::Cancelled);
            true
        } else {
            false
        }
    }

    /// Whether an error is stored (without consuming it).
    pub fn had_error(&self) -> bool {
        let state = self.inner.state.lock();
        if state.check_cancellable && self.inner.cancellable_fired() {
            return true;
        }
        matches!(state.result, Some(Err(_)))
    }

    /// Whether the task reached completion.
    pub fn is_completed(&self) -> bool {
        self.inner.state.lock().completed
    }

    /// Take the result.
    ///
    /// # Panics
    ///
    /// Panics if no result is available (never set or already taken) and
    /// the task was not cancelled.
    pub fn propagate(&self) -> Result<T, Error> {
        let mut state = self.inner.state.lock();
        if state.check_cancellable && self.inner.cancellable_fired() {
            state.result = None;
            return Err(Error::Cancelled);
        }
        match state.result.take() {
            Some(result) => result,
            None => panic!(
                "task {} ({}) has no result to propagate",
                self.inner.id,
                state.source_tag.unwrap_or("untagged")
            ),
        }
    }

    /// Drive an async body on the runtime and store its output.
    ///
    /// The body is dropped as soon as the task's cancellable fires, which
    /// releases whatever sockets it held.
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = Result<T, Error>> + Send + 'static,
    {
        let handle = match self.inner.runtime.clone().or_else(|| Handle::try_current().ok()) {
            Some(handle) => handle,
            None => {
                self.return_error(Error::Internal("no async runtime to drive task".into()));
                return;
            }
        };

        let task = self.clone();
        let cancellable = self.inner.cancellable.clone();
        handle.spawn(async move {
            let result = match cancellable {
                Some(cancellable) => tokio::select! {
                    biased;
                    _ = cancellable.cancelled() => Err(Error::Cancelled),
                    result = fut => result,
                },
                None => fut.await,
            };
            task.set_result(result);
        });
    }

    /// Run a blocking body on `pool`.
    ///
    /// The task completes when `body` returns, unless return-on-cancel is
    /// set and the cancellable fires first.
    pub fn run_in_thread<F>(&self, pool: &WorkerPool, body: F)
    where
        F: FnOnce(&Task<T>, Option<&Cancellable>) + Send + 'static,
    {
        self.start_thread(pool, body, false);
    }

    /// Run a blocking body on `pool` and block until it completes.
    ///
    /// No callback is dispatched; read the outcome with
    /// [`propagate`](Self::propagate).
    pub fn run_in_thread_sync<F>(&self, pool: &WorkerPool, body: F)
    where
        F: FnOnce(&Task<T>, Option<&Cancellable>) + Send + 'static,
    {
        self.start_thread(pool, body, true);

        let mut state = self.inner.state.lock();
        while !state.thread_complete {
            self.inner.done.wait(&mut state);
        }
        state.completed = true;
    }

    fn start_thread<F>(&self, pool: &WorkerPool, body: F, synchronous: bool)
    where
        F: FnOnce(&Task<T>, Option<&Cancellable>) + Send + 'static,
    {
        let nested = pool.owns_current_thread();
        let cancelled_early = {
            let mut state = self.inner.state.lock();
            assert!(
                !state.threaded,
                "task {} already runs in a thread",
                self.inner.id
            );
            state.threaded = true;
            state.synchronous = synchronous;

            let early = state.return_on_cancel && self.inner.cancellable_fired();
            if early {
                state.thread_cancelled = true;
                state.thread_complete = true;
            } else {
                state.pool = Some(pool.clone());
                state.blocking_other = nested;
            }
            early
        };

        let job = self.thread_job(body);
        let sched: Arc<dyn Schedulable> = self.inner.clone();

        if cancelled_early {
            // The body still runs; its outcome is discarded.
            pool.push(sched, job);
            if !synchronous {
                self.complete(self.inner.state.lock());
            }
            return;
        }

        if nested {
            pool.grow();
        }

        if let Some(cancellable) = &self.inner.cancellable {
            let task = self.clone();
            let id = cancellable.connect(move || task.on_thread_cancelled());
            let mut state = self.inner.state.lock();
            if state.thread_complete {
                drop(state);
                if let Some(id) = id {
                    cancellable.disconnect(id);
                }
            } else {
                state.cancel_handler = id;
            }
        }

        trace!(
            "[TaskPool] task {} ({}) queued on {}",
            self.inner.id,
            self.source_tag().unwrap_or("untagged"),
            pool.name()
        );
        pool.push(sched, job);
    }

    fn thread_job<F>(&self, body: F) -> Box<dyn FnOnce() + Send + 'static>
    where
        F: FnOnce(&Task<T>, Option<&Cancellable>) + Send + 'static,
    {
        let task = self.clone();
        Box::new(move || {
            let cancellable = task.inner.cancellable.clone();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(&task, cancellable.as_ref())));
            if outcome.is_err() {
                error!("[TaskPool] task {} body panicked", task.inner.id);
                let mut state = task.inner.state.lock();
                if !state.result_set {
                    state.result_set = true;
                    state.result = Some(Err(Error::Internal("worker body panicked".into())));
                }
            }
            task.thread_complete();
        })
    }

    fn on_thread_cancelled(&self) {
        let pool = self.inner.state.lock().pool.clone();
        if let Some(pool) = pool {
            pool.resort();
        }

        let return_now = {
            let mut state = self.inner.state.lock();
            state.thread_cancelled = true;
            state.return_on_cancel
        };
        if return_now {
            self.thread_complete();
        }
    }

    fn thread_complete(&self) {
        let (synchronous, handler, pool, blocking) = {
            let mut state = self.inner.state.lock();
            if state.thread_complete {
                return;
            }
            state.thread_complete = true;
            (
                state.synchronous,
                state.cancel_handler.take(),
                state.pool.take(),
                state.blocking_other,
            )
        };

        if let (Some(id), Some(cancellable)) = (handler, &self.inner.cancellable) {
            cancellable.disconnect(id);
        }
        if blocking {
            if let Some(pool) = pool {
                pool.shrink();
            }
        }

        if synchronous {
            let _state = self.inner.state.lock();
            self.inner.done.notify_all();
        } else {
            self.complete(self.inner.state.lock());
        }
    }

    fn set_result(&self, result: Result<T, Error>) {
        let mut state = self.inner.state.lock();
        assert!(
            !state.result_set,
            "task {} ({}) completed twice",
            self.inner.id,
            state.source_tag.unwrap_or("untagged")
        );
        state.result_set = true;
        state.result = Some(result);

        // Threaded tasks complete when the body returns.
        if state.threaded {
            return;
        }
        self.complete(state);
    }

    fn complete(&self, mut state: MutexGuard<'_, State<T>>) {
        if state.completed {
            return;
        }
        state.completed = true;
        let waker = state.waker.take();
        let callback = state.callback.take();
        drop(state);

        self.inner.done.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
        if let Some(callback) = callback {
            self.dispatch(callback);
        }
    }

    fn dispatch(&self, callback: Callback<T>) {
        let task = self.clone();
        match &self.inner.runtime {
            Some(handle) => {
                handle.spawn(async move { callback(task) });
            }
            None => callback(task),
        }
    }
}

impl<T: Send + 'static> Future for Task<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        {
            let mut state = self.inner.state.lock();
            if !state.completed {
                state.waker = Some(cx.waker().clone());
                return Poll::Pending;
            }
        }
        Poll::Ready(self.propagate())
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("source_tag", &state.source_tag)
            .field("completed", &state.completed)
            .field("threaded", &state.threaded)
            .finish()
    }
}
