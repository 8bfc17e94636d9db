//! Workers that run scheduled units of work one at a time.
//!
//! A [`Scheduler`] hands out one [`Worker`] per lane. Tasks scheduled on the
//! same worker never overlap; tasks on different workers may run in parallel.

use crate::{
    sync::{AtomicBool, Ordering, fence},
    token::DrainToken,
};
use crossbeam_queue::SegQueue;
use derive_more::Debug;
use std::sync::Arc;

/// Unit of work accepted by a [`Worker`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Serialized execution context.
pub trait Worker: Send + Sync + 'static {
    /// Run `task` exactly once, later, after every task previously scheduled
    /// on this worker. A no-op once the worker is disposed.
    fn schedule(&self, task: Task);
    /// Release the worker. Pending tasks are dropped without running.
    fn dispose(&self);
}

/// Factory of [`Worker`]s.
pub trait Scheduler {
    /// Worker type handed out by this scheduler.
    type Worker: Worker;
    /// Create a fresh worker.
    fn create_worker(&self) -> Self::Worker;
}

/// Scheduler whose workers drain their task queues on a rayon thread pool.
#[must_use]
#[derive(Debug, Clone, Default)]
pub struct RayonScheduler {
    #[debug(skip)]
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl RayonScheduler {
    /// Use rayon's global thread pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a dedicated thread pool.
    pub fn with_pool(pool: Arc<rayon::ThreadPool>) -> Self {
        Self { pool: Some(pool) }
    }
}

impl Scheduler for RayonScheduler {
    type Worker = RayonWorker;

    fn create_worker(&self) -> RayonWorker {
        RayonWorker {
            inner: Arc::new(SerialQueue {
                tasks: SegQueue::new(),
                token: DrainToken::new(),
                disposed: AtomicBool::new(false),
                pool: self.pool.clone(),
            }),
        }
    }
}

/// Worker created by [`RayonScheduler`].
#[derive(Debug)]
pub struct RayonWorker {
    inner: Arc<SerialQueue>,
}

#[derive(Debug)]
struct SerialQueue {
    #[debug(skip)]
    tasks: SegQueue<Task>,
    token: DrainToken,
    disposed: AtomicBool,
    #[debug(skip)]
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl SerialQueue {
    fn spawn(self: Arc<Self>) {
        match self.pool.clone() {
            Some(pool) => pool.spawn(move || self.run()),
            None => rayon::spawn(move || self.run()),
        }
    }

    fn run(&self) {
        let mut missed = 1;
        loop {
            while let Some(task) = self.tasks.pop() {
                if self.disposed.load(Ordering::Acquire) {
                    self.clear();
                    return;
                }
                task();
            }
            if self.disposed.load(Ordering::Acquire) {
                self.clear();
                return;
            }
            missed = self.token.leave(missed);
            if missed == 0 {
                break;
            }
        }
    }

    fn clear(&self) {
        while self.tasks.pop().is_some() {}
    }
}

impl Worker for RayonWorker {
    fn schedule(&self, task: Task) {
        if self.inner.disposed.load(Ordering::Acquire) {
            return;
        }
        self.inner.tasks.push(task);
        // Pairs with the fence in `dispose`: either we see the flag, or the
        // disposing side sees our task when it clears.
        fence(Ordering::SeqCst);
        if self.inner.disposed.load(Ordering::Relaxed) {
            self.inner.clear();
            return;
        }
        if self.inner.token.enter() {
            Arc::clone(&self.inner).spawn();
        }
    }

    fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        fence(Ordering::SeqCst);
        if self.inner.token.enter() {
            // Idle: drop whatever is queued and keep the token so the queue is
            // never drained again.
            self.inner.clear();
        }
    }
}

/// Scheduler whose workers run every task inline on the scheduling thread.
///
/// Useful when the caller already serializes work, e.g. behind a drain token,
/// and only wants the producer/consumer decoupling of a lane without a hop to
/// another thread.
///
/// Lanes on this scheduler drain on whichever thread signals them, so a
/// consumer's `request` may deliver items synchronously, before it returns,
/// on the requesting thread. Consumers that rely on requests never
/// re-entering them should use [`RayonScheduler`] instead.
#[must_use]
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateScheduler;

impl Scheduler for ImmediateScheduler {
    type Worker = ImmediateWorker;

    fn create_worker(&self) -> ImmediateWorker {
        ImmediateWorker {
            disposed: AtomicBool::new(false),
        }
    }
}

/// Worker created by [`ImmediateScheduler`].
#[derive(Debug)]
pub struct ImmediateWorker {
    disposed: AtomicBool,
}

impl Worker for ImmediateWorker {
    fn schedule(&self, task: Task) {
        if !self.disposed.load(Ordering::Acquire) {
            task();
        }
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }
}
