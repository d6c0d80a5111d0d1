// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Worker pool executing the blocking bodies of tasks.
//!
//! ```text
//!   push(job) ──► queue (kept sorted) ──► idle worker / new worker ──► job()
//!                      ▲
//!   resort() ──────────┘   (a queued task was cancelled)
//!
//!   worker body pushes and blocks on a nested task:
//!       max_threads += 1  ... nested task completes ...  max_threads -= 1
//! ```
//!
//! Queue order:
//! 1. tasks blocking another task (nested work) first,
//! 2. then tasks whose cancellable already fired, so they drain quickly,
//! 3. then by priority, lower values sooner,
//! 4. then FIFO.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::cell::Cell;
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, trace};

/// Default number of worker threads.
pub const DEFAULT_MAX_THREADS: usize = 10;

/// How long an idle worker lingers before exiting.
const IDLE_LINGER: Duration = Duration::from_secs(15);

thread_local! {
    /// Address of the `Shared` of the pool owning this thread, 0 outside workers.
    static WORKER_OF: Cell<usize> = const { Cell::new(0) };
}

/// Scheduling view of a queued task.
pub(crate) trait Schedulable: Send + Sync {
    fn blocking_other(&self) -> bool;
    fn is_cancelled(&self) -> bool;
    fn priority(&self) -> i32;
}

struct Job {
    seq: u64,
    sched: Arc<dyn Schedulable>,
    run: Box<dyn FnOnce() + Send + 'static>,
}

impl Job {
    fn sort_key(&self) -> (bool, bool, i32, u64) {
        (
            !self.sched.blocking_other(),
            !self.sched.is_cancelled(),
            self.sched.priority(),
            self.seq,
        )
    }
}

struct PoolState {
    queue: Vec<Job>,
    max_threads: usize,
    threads: usize,
    idle: usize,
    next_seq: u64,
    next_worker: u64,
    shutdown: bool,
}

struct Shared {
    name: String,
    state: Mutex<PoolState>,
    work: Condvar,
}

/// Bounded, growable pool of OS threads.
#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<Shared>,
}

impl WorkerPool {
    /// Create a pool allowing at most `max_threads` concurrent workers.
    pub fn new(name: impl Into<String>, max_threads: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                state: Mutex::new(PoolState {
                    queue: Vec::new(),
                    max_threads: max_threads.max(1),
                    threads: 0,
                    idle: 0,
                    next_seq: 0,
                    next_worker: 0,
                    shutdown: false,
                }),
                work: Condvar::new(),
            }),
        }
    }

    /// Process-wide default pool.
    pub fn global() -> &'static WorkerPool {
        static GLOBAL: OnceLock<WorkerPool> = OnceLock::new();
        GLOBAL.get_or_init(|| WorkerPool::new("realm-task", DEFAULT_MAX_THREADS))
    }

    /// Pool name, used for worker thread names.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// True when called from one of this pool's worker threads.
    pub fn owns_current_thread(&self) -> bool {
        WORKER_OF.with(Cell::get) == pool_key(&self.shared)
    }

    /// Current thread limit (including temporary growth).
    pub fn max_threads(&self) -> usize {
        self.shared.state.lock().max_threads
    }

    /// Change the thread limit.
    pub fn set_max_threads(&self, max_threads: usize) {
        let mut state = self.shared.state.lock();
        state.max_threads = max_threads.max(1);
        self.spawn_for_backlog(&mut state);
        self.shared.work.notify_all();
    }

    /// Number of live worker threads.
    pub fn num_threads(&self) -> usize {
        self.shared.state.lock().threads
    }

    /// Number of jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Stop accepting new workers; existing ones drain the queue and exit.
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        state.shutdown = true;
        self.shared.work.notify_all();
    }

    pub(crate) fn push(&self, sched: Arc<dyn Schedulable>, run: Box<dyn FnOnce() + Send + 'static>) {
        let mut state = self.shared.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.queue.push(Job { seq, sched, run });
        state.queue.sort_by_cached_key(Job::sort_key);

        if state.idle > 0 {
            self.shared.work.notify_one();
        }
        self.spawn_for_backlog(&mut state);
    }

    /// Re-sort the queue after a queued task changed state.
    pub(crate) fn resort(&self) {
        let mut state = self.shared.state.lock();
        state.queue.sort_by_cached_key(Job::sort_key);
    }

    /// Allow one extra worker while a worker is blocked on nested work.
    pub(crate) fn grow(&self) {
        let mut state = self.shared.state.lock();
        state.max_threads += 1;
        trace!("[TaskPool] {} grown to {} threads", self.shared.name, state.max_threads);
        self.spawn_for_backlog(&mut state);
    }

    /// Undo a [`grow`](Self::grow) once the nested work completed.
    pub(crate) fn shrink(&self) {
        let mut state = self.shared.state.lock();
        state.max_threads = state.max_threads.saturating_sub(1).max(1);
        trace!("[TaskPool] {} shrunk to {} threads", self.shared.name, state.max_threads);
    }

    fn spawn_for_backlog(&self, state: &mut MutexGuard<'_, PoolState>) {
        while !state.shutdown
            && state.queue.len() > state.idle
            && state.threads < state.max_threads
        {
            let id = state.next_worker;
            state.next_worker += 1;
            state.threads += 1;

            let shared = self.shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", self.shared.name, id))
                .spawn(move || worker_loop(shared));
            if let Err(e) = spawned {
                error!("[TaskPool] failed to spawn worker for {}: {}", self.shared.name, e);
                state.threads -= 1;
                break;
            }
            debug!("[TaskPool] {} started worker {}", self.shared.name, id);
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("WorkerPool")
            .field("name", &self.shared.name)
            .field("max_threads", &state.max_threads)
            .field("threads", &state.threads)
            .field("queued", &state.queue.len())
            .finish()
    }
}

fn pool_key(shared: &Arc<Shared>) -> usize {
    Arc::as_ptr(shared) as usize
}

fn worker_loop(shared: Arc<Shared>) {
    WORKER_OF.with(|w| w.set(pool_key(&shared)));

    let mut state = shared.state.lock();
    loop {
        if state.threads > state.max_threads {
            break;
        }
        if !state.queue.is_empty() {
            let job = state.queue.remove(0);
            MutexGuard::unlocked(&mut state, || (job.run)());
            continue;
        }
        if state.shutdown {
            break;
        }

        state.idle += 1;
        let timed_out = shared.work.wait_for(&mut state, IDLE_LINGER).timed_out();
        state.idle -= 1;
        if timed_out && state.queue.is_empty() {
            break;
        }
    }
    state.threads -= 1;
    trace!("[TaskPool] {} worker exiting", shared.name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
    use std::sync::mpsc;

    struct Fixed {
        blocking: bool,
        cancelled: AtomicBool,
        priority: AtomicI32,
    }

    impl Fixed {
        fn new(blocking: bool, cancelled: bool, priority: i32) -> Arc<Self> {
            Arc::new(Self {
                blocking,
                cancelled: AtomicBool::new(cancelled),
                priority: AtomicI32::new(priority),
            })
        }
    }

    impl Schedulable for Fixed {
        fn blocking_other(&self) -> bool {
            self.blocking
        }
        fn is_cancelled(&self) -> bool {
            self.cancelled.load(Ordering::SeqCst)
        }
        fn priority(&self) -> i32 {
            self.priority.load(Ordering::SeqCst)
        }
    }

    /// Occupy the single worker until the returned sender fires.
    fn block_pool(pool: &WorkerPool) -> mpsc::Sender<()> {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel::<()>();
        pool.push(
            Fixed::new(false, false, 0),
            Box::new(move || {
                started_tx.send(()).expect("started");
                let _ = release_rx.recv();
            }),
        );
        started_rx.recv().expect("blocker started");
        release_tx
    }

    #[test]
    fn test_runs_jobs_on_named_threads() {
        let pool = WorkerPool::new("test-pool", 2);
        let other = WorkerPool::new("other-pool", 1);
        let (tx, rx) = mpsc::channel();
        let (p, o) = (pool.clone(), other.clone());
        pool.push(
            Fixed::new(false, false, 0),
            Box::new(move || {
                let name = thread::current().name().map(str::to_string);
                tx.send((name, p.owns_current_thread(), o.owns_current_thread()))
                    .expect("send");
            }),
        );

        let (name, ours, theirs) = rx.recv_timeout(Duration::from_secs(5)).expect("job ran");
        assert!(name.expect("named").starts_with("test-pool-"));
        assert!(ours);
        assert!(!theirs);
        assert!(!pool.owns_current_thread());
    }

    #[test]
    fn test_queue_order() {
        let pool = WorkerPool::new("order", 1);
        let release = block_pool(&pool);

        let (tx, rx) = mpsc::channel();
        let jobs = [
            ("low-priority", Fixed::new(false, false, 5)),
            ("high-priority", Fixed::new(false, false, -5)),
            ("cancelled", Fixed::new(false, true, 10)),
            ("blocking", Fixed::new(true, false, 10)),
            ("fifo-a", Fixed::new(false, false, 0)),
            ("fifo-b", Fixed::new(false, false, 0)),
        ];
        for (label, sched) in jobs {
            let tx = tx.clone();
            pool.push(sched, Box::new(move || tx.send(label).expect("send")));
        }
        assert_eq!(pool.queued(), 6);
        release.send(()).expect("release");

        let order: Vec<_> = (0..6)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).expect("job ran"))
            .collect();
        assert_eq!(
            order,
            vec!["blocking", "cancelled", "high-priority", "fifo-a", "fifo-b", "low-priority"]
        );
    }

    #[test]
    fn test_resort_after_cancel() {
        let pool = WorkerPool::new("resort", 1);
        let release = block_pool(&pool);

        let (tx, rx) = mpsc::channel();
        let first = Fixed::new(false, false, 0);
        let second = Fixed::new(false, false, 0);

        let t = tx.clone();
        pool.push(first, Box::new(move || t.send("first").expect("send")));
        pool.push(second.clone(), Box::new(move || tx.send("second").expect("send")));

        second.cancelled.store(true, Ordering::SeqCst);
        pool.resort();
        release.send(()).expect("release");

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).expect("ran"), "second");
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).expect("ran"), "first");
    }

    #[test]
    fn test_grow_and_shrink() {
        let pool = WorkerPool::new("grow", 1);
        assert_eq!(pool.max_threads(), 1);
        pool.grow();
        assert_eq!(pool.max_threads(), 2);
        pool.shrink();
        assert_eq!(pool.max_threads(), 1);
        pool.shrink();
        assert_eq!(pool.max_threads(), 1);
    }

    #[test]
    fn test_growth_unblocks_backlog() {
        let pool = WorkerPool::new("backlog", 1);
        let release = block_pool(&pool);

        let (tx, rx) = mpsc::channel();
        pool.push(
            Fixed::new(false, false, 0),
            Box::new(move || tx.send(()).expect("send")),
        );
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        pool.grow();
        rx.recv_timeout(Duration::from_secs(5))
            .expect("extra worker picked up the job");
        release.send(()).expect("release");
    }
}
