#![allow(dead_code)]

use parallel_lanes::{
    Error, ErrorSink, ParallelFlow, Scheduler, Subscriber, Subscription, Task, Worker,
};
use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

/// Scheduler whose workers only run tasks when the test says so.
///
/// All workers share one FIFO; each task is tagged with its worker so that
/// `dispose` drops exactly that worker's pending tasks.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    tasks: Arc<Mutex<VecDeque<(usize, Task)>>>,
    workers: Arc<AtomicUsize>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run queued tasks, including ones they schedule, until none are left.
    /// Returns the number of tasks run.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            // The lock must be released before running: tasks schedule more.
            let Some((_, task)) = self.tasks.lock().pop_front() else {
                return ran;
            };
            task();
            ran += 1;
        }
    }

    pub fn pending(&self) -> usize {
        self.tasks.lock().len()
    }
}

impl Scheduler for ManualScheduler {
    type Worker = ManualWorker;

    fn create_worker(&self) -> ManualWorker {
        ManualWorker {
            id: self.workers.fetch_add(1, Ordering::Relaxed),
            tasks: Arc::clone(&self.tasks),
            disposed: AtomicBool::new(false),
        }
    }
}

pub struct ManualWorker {
    id: usize,
    tasks: Arc<Mutex<VecDeque<(usize, Task)>>>,
    disposed: AtomicBool,
}

impl Worker for ManualWorker {
    fn schedule(&self, task: Task) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        self.tasks.lock().push_back((self.id, task));
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let dropped: VecDeque<_> = {
            let mut tasks = self.tasks.lock();
            let (mine, others) = tasks.drain(..).partition(|(id, _)| *id == self.id);
            *tasks = others;
            mine
        };
        // Dropped outside the lock: dropping a task may release a lane.
        drop(dropped);
    }
}

/// Upstream subscription that only records what it is asked for.
#[derive(Debug, Default)]
pub struct TestUpstream {
    requests: Mutex<Vec<u64>>,
    cancels: AtomicUsize,
}

impl TestUpstream {
    pub fn new() -> Arc<Self> {
        Arc::default()
    }

    pub fn requests(&self) -> Vec<u64> {
        self.requests.lock().clone()
    }

    pub fn requested(&self) -> u64 {
        self.requests.lock().iter().sum()
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::Acquire)
    }
}

impl Subscription for TestUpstream {
    fn request(&self, n: u64) {
        self.requests.lock().push(n);
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::AcqRel);
    }
}

pub struct Events<T> {
    pub items: Vec<T>,
    pub errors: Vec<Error>,
    pub completions: usize,
    subscription: Option<Arc<dyn Subscription>>,
}

impl<T> Default for Events<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            errors: Vec::new(),
            completions: 0,
            subscription: None,
        }
    }
}

/// Subscriber recording every signal, requesting `initial` items on
/// subscription.
pub struct Recorder<T> {
    events: Arc<Mutex<Events<T>>>,
    initial: u64,
}

/// Test-side view of a [`Recorder`].
#[derive(Clone)]
pub struct Observer<T> {
    events: Arc<Mutex<Events<T>>>,
}

pub fn recorder<T>(initial: u64) -> (Recorder<T>, Observer<T>) {
    let events = Arc::new(Mutex::new(Events::default()));
    (
        Recorder {
            events: Arc::clone(&events),
            initial,
        },
        Observer { events },
    )
}

impl<T: Send> Subscriber<T> for Recorder<T> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        self.events.lock().subscription = Some(Arc::clone(&subscription));
        if self.initial != 0 {
            subscription.request(self.initial);
        }
    }

    fn on_next(&mut self, item: T) {
        self.events.lock().items.push(item);
    }

    fn on_error(&mut self, error: Error) {
        self.events.lock().errors.push(error);
    }

    fn on_complete(&mut self) {
        self.events.lock().completions += 1;
    }
}

impl<T: Clone> Observer<T> {
    pub fn items(&self) -> Vec<T> {
        self.events.lock().items.clone()
    }
}

impl<T> Observer<T> {
    pub fn completions(&self) -> usize {
        self.events.lock().completions
    }

    pub fn error_count(&self) -> usize {
        self.events.lock().errors.len()
    }

    pub fn with_errors<R>(&self, f: impl FnOnce(&[Error]) -> R) -> R {
        f(&self.events.lock().errors)
    }

    fn subscription(&self) -> Arc<dyn Subscription> {
        self.events
            .lock()
            .subscription
            .clone()
            .expect("recorder was subscribed")
    }

    // Both go through a cloned handle: the call may synchronously re-enter
    // the recorder.
    pub fn request(&self, n: u64) {
        self.subscription().request(n);
    }

    pub fn cancel(&self) {
        self.subscription().cancel();
    }
}

/// Error sink collecting everything it receives.
pub fn capture_sink() -> (ErrorSink, Arc<Mutex<Vec<Error>>>) {
    let captured = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let captured = Arc::clone(&captured);
        ErrorSink::from_fn(move |error| captured.lock().push(error))
    };
    (sink, captured)
}

/// Parallel flow whose lane subscribers are driven by hand.
pub struct ManualFlow<T> {
    lanes: usize,
    subscribers: Arc<Mutex<Vec<Box<dyn Subscriber<T>>>>>,
}

/// Test-side handle on the subscribers of a [`ManualFlow`].
pub struct ManualLanes<T> {
    subscribers: Arc<Mutex<Vec<Box<dyn Subscriber<T>>>>>,
}

pub fn manual_flow<T>(lanes: usize) -> (ManualFlow<T>, ManualLanes<T>) {
    let subscribers = Arc::new(Mutex::new(Vec::new()));
    (
        ManualFlow {
            lanes,
            subscribers: Arc::clone(&subscribers),
        },
        ManualLanes { subscribers },
    )
}

impl<T: Send + 'static> ParallelFlow<T> for ManualFlow<T> {
    fn parallelism(&self) -> usize {
        self.lanes
    }

    fn subscribe(self, subscribers: Vec<Box<dyn Subscriber<T>>>) {
        *self.subscribers.lock() = subscribers;
    }
}

impl<T> ManualLanes<T> {
    pub fn subscribe(&self, lane: usize, upstream: Arc<dyn Subscription>) {
        self.subscribers.lock()[lane].on_subscribe(upstream);
    }

    pub fn next(&self, lane: usize, item: T) {
        self.subscribers.lock()[lane].on_next(item);
    }

    pub fn error(&self, lane: usize, error: Error) {
        self.subscribers.lock()[lane].on_error(error);
    }

    pub fn complete(&self, lane: usize) {
        self.subscribers.lock()[lane].on_complete();
    }
}
