mod drain;

use crate::{
    config::{Config, ErrorSink},
    demand,
    error::Error,
    flow::{ParallelFlow, Subscriber, Subscription, SubscriptionCell, validate},
    sync::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    token::DrainToken,
    types::SyncUnsafeCell,
    worker::{Scheduler, Worker},
};
use core::num::NonZeroUsize;
use crossbeam_queue::ArrayQueue;
use derive_more::Debug;
use std::sync::{Arc, Weak};

/// Parallel flow whose lanes are each replayed on a dedicated worker.
///
/// Created by [`ParallelFlow::run_on`]. Every lane gets its own
/// [`LaneScheduler`]: a bounded hand-off buffer of `config.prefetch()` items
/// and one worker from the scheduler.
#[must_use]
#[derive(Debug)]
pub struct RunOn<P, S> {
    #[debug(skip)]
    source: P,
    #[debug(skip)]
    scheduler: S,
    config: Config,
}

impl<P, S> RunOn<P, S> {
    pub(crate) fn new(source: P, scheduler: S, config: Config) -> Self {
        Self {
            source,
            scheduler,
            config,
        }
    }
}

impl<T, P, S> ParallelFlow<T> for RunOn<P, S>
where
    T: Send + 'static,
    P: ParallelFlow<T>,
    S: Scheduler,
{
    fn parallelism(&self) -> usize {
        self.source.parallelism()
    }

    fn subscribe(self, mut subscribers: Vec<Box<dyn Subscriber<T>>>) {
        if !validate(self.parallelism(), &mut subscribers) {
            return;
        }
        let Self {
            source,
            scheduler,
            config,
        } = self;
        let lanes = subscribers
            .into_iter()
            .enumerate()
            .map(|(index, consumer)| {
                let lane = LaneScheduler::new(
                    index,
                    consumer,
                    config.prefetch(),
                    scheduler.create_worker(),
                    config.error_sink().clone(),
                );
                Box::new(LaneInput::new(lane)) as Box<dyn Subscriber<T>>
            })
            .collect();
        source.subscribe(lanes);
    }
}

/// One lane's hand-off point between an upstream producer and a downstream
/// consumer living on a dedicated worker.
///
/// The producer side ([`attach`](Self::attach), [`on_item`](Self::on_item),
/// [`on_error`](Self::on_error), [`on_complete`](Self::on_complete)) may be
/// driven from any thread but must be driven serially. The consumer controls
/// the lane through the [`Subscription`] it receives on attach; its
/// callbacks only ever run on the worker, inside a drain pass.
#[derive(Debug)]
pub struct LaneScheduler<T, W> {
    index: usize,
    prefetch: usize,
    /// Replenishment watermark: `prefetch - prefetch / 4`.
    limit: usize,
    #[debug(skip)]
    queue: ArrayQueue<T>,
    #[debug(skip)]
    worker: W,
    upstream: SubscriptionCell,
    /// Only touched by the drain owner, or by `attach` while it holds the
    /// drain token. Dropped once the lane terminates.
    consumer: SyncUnsafeCell<Option<Box<dyn Subscriber<T>>>>,
    /// Items delivered since the last replenishment request. Drain owner only.
    consumed: AtomicUsize,
    done: AtomicBool,
    /// Written by the producer before `done` is published, taken by the drain
    /// owner after observing `done`.
    error: SyncUnsafeCell<Option<Error>>,
    cancelled: AtomicBool,
    requested: AtomicU64,
    token: DrainToken,
    #[debug(skip)]
    error_sink: ErrorSink,
    #[debug(skip)]
    this: Weak<Self>,
}

impl<T, W> LaneScheduler<T, W>
where
    T: Send + 'static,
    W: Worker,
{
    /// Create lane `index` delivering to `consumer` on `worker`, with a
    /// hand-off buffer of `capacity` items.
    pub fn new(
        index: usize,
        consumer: Box<dyn Subscriber<T>>,
        capacity: NonZeroUsize,
        worker: W,
        error_sink: ErrorSink,
    ) -> Arc<Self> {
        let prefetch = capacity.get();
        Arc::new_cyclic(|this| Self {
            index,
            prefetch,
            limit: prefetch - (prefetch >> 2),
            queue: ArrayQueue::new(prefetch),
            worker,
            upstream: SubscriptionCell::new(),
            consumer: SyncUnsafeCell::new(Some(consumer)),
            consumed: AtomicUsize::new(0),
            done: AtomicBool::new(false),
            error: SyncUnsafeCell::new(None),
            cancelled: AtomicBool::new(false),
            requested: AtomicU64::new(0),
            token: DrainToken::new(),
            error_sink,
            this: this.clone(),
        })
    }

    /// Lane index within its parallel flow.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Hand-off buffer capacity, which is also the initial upstream request.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.prefetch
    }

    /// Connect the lane to its upstream: give the consumer its subscription,
    /// then request `capacity` items upstream to open the prefetch window.
    pub fn attach(&self, upstream: Arc<dyn Subscription>) {
        if !self.upstream.set(upstream) {
            tracing::warn!(lane = self.index, "lane attached twice");
            self.error_sink
                .report(Error::AlreadyAttached { lane: self.index });
            return;
        }
        let Some(this) = self.this.upgrade() else {
            return;
        };
        tracing::trace!(lane = self.index, prefetch = self.prefetch, "lane attached");

        // Hold the drain token while the consumer runs `on_subscribe`, so a
        // request it makes cannot start a pass on the worker concurrently.
        let held = self.token.enter();
        assert!(held, "LaneScheduler::attach: [1]");
        // SAFETY: We own the drain token, so no pass touches the consumer.
        unsafe { self.with_consumer(|consumer| consumer.on_subscribe(this)) };
        if self.token.leave(1) != 0 {
            if self.cancelled.load(Ordering::Acquire) {
                // Cancelled from `on_subscribe`: its `enter` failed, so the
                // release is ours.
                // SAFETY: We own the drain token and never leave it.
                unsafe { self.release() };
                return;
            }
            self.schedule_owned();
        }

        if !self.cancelled.load(Ordering::Acquire) {
            self.upstream.request(self.prefetch as u64);
        }
    }

    /// Accept one item from upstream.
    ///
    /// A full buffer means upstream ignored the lane's demand; the lane then
    /// fails with [`Error::Overflow`].
    pub fn on_item(&self, item: T) {
        if self.done.load(Ordering::Acquire) || self.cancelled.load(Ordering::Acquire) {
            return;
        }
        if self.queue.push(item).is_err() {
            tracing::warn!(lane = self.index, capacity = self.prefetch, "hand-off buffer overflow");
            self.upstream.cancel();
            self.on_error(Error::Overflow {
                lane: self.index,
                capacity: self.prefetch,
            });
            return;
        }
        self.schedule();
    }

    /// Terminate the lane with `error` once all buffered items are discarded.
    pub fn on_error(&self, error: Error) {
        if self.done.load(Ordering::Acquire) || self.cancelled.load(Ordering::Acquire) {
            self.error_sink.report(error);
            return;
        }
        // SAFETY: The producer is the only writer and the drain only reads
        // after observing `done`, which is published below.
        unsafe { self.error.with_mut(|slot| *slot = Some(error)) };
        self.done.store(true, Ordering::Release);
        self.schedule();
    }

    /// Terminate the lane normally once all buffered items are delivered.
    pub fn on_complete(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        self.schedule();
    }

    fn schedule(&self) {
        if self.token.enter() {
            self.schedule_owned();
        }
    }

    /// Run a drain pass on the worker. The caller must own the drain token.
    fn schedule_owned(&self) {
        if let Some(this) = self.this.upgrade() {
            let pass = DrainPass(Some(this));
            self.worker.schedule(Box::new(move || pass.run()));
        }
    }

    /// # Safety
    ///
    /// The caller must own the drain token.
    unsafe fn with_consumer(&self, f: impl FnOnce(&mut dyn Subscriber<T>)) {
        // SAFETY: Guaranteed by the caller.
        unsafe {
            self.consumer.with_mut(|consumer| {
                if let Some(consumer) = consumer {
                    f(consumer.as_mut());
                }
            });
        }
    }

    /// Drop the buffer and the consumer.
    ///
    /// # Safety
    ///
    /// The caller must own the drain token and keep it forever.
    unsafe fn release(&self) {
        while self.queue.pop().is_some() {}
        // SAFETY: Guaranteed by the caller.
        drop(unsafe { self.consumer.with_mut(Option::take) });
    }
}

impl<T, W> Subscription for LaneScheduler<T, W>
where
    T: Send + 'static,
    W: Worker,
{
    fn request(&self, n: u64) {
        if n == 0 {
            tracing::warn!(lane = self.index, "zero demand requested");
            self.error_sink.report(Error::InvalidDemand(n));
            return;
        }
        demand::add(&self.requested, n);
        self.schedule();
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(lane = self.index, "lane cancelled");
        self.upstream.cancel();
        self.worker.dispose();
        // Take the token for good: the buffer is discarded and no pass runs
        // again. A pass already in flight observes `cancelled` and releases.
        if self.token.enter() {
            // SAFETY: We own the drain token and never leave it.
            unsafe { self.release() };
        }
    }
}

/// Drain pass handed to a worker. It carries the drain token: a worker that
/// drops it unrun (after `dispose`) makes it release the lane instead.
struct DrainPass<T, W>(Option<Arc<LaneScheduler<T, W>>>)
where
    T: Send + 'static,
    W: Worker;

impl<T, W> DrainPass<T, W>
where
    T: Send + 'static,
    W: Worker,
{
    fn run(mut self) {
        if let Some(lane) = self.0.take() {
            lane.drain();
        }
    }
}

impl<T, W> Drop for DrainPass<T, W>
where
    T: Send + 'static,
    W: Worker,
{
    fn drop(&mut self) {
        if let Some(lane) = self.0.take() {
            tracing::trace!(lane = lane.index, "drain pass dropped by disposed worker");
            // SAFETY: The pass owned the drain token and nobody else will run
            // one on this lane again.
            unsafe { lane.release() };
        }
    }
}

/// [`Subscriber`] adapter through which an upstream drives a
/// [`LaneScheduler`].
#[derive(Debug)]
pub struct LaneInput<T, W> {
    lane: Arc<LaneScheduler<T, W>>,
}

impl<T, W> LaneInput<T, W> {
    /// Wrap `lane`.
    #[must_use]
    pub fn new(lane: Arc<LaneScheduler<T, W>>) -> Self {
        Self { lane }
    }

    /// The wrapped lane.
    #[must_use]
    pub fn lane(&self) -> &Arc<LaneScheduler<T, W>> {
        &self.lane
    }
}

impl<T, W> Subscriber<T> for LaneInput<T, W>
where
    T: Send + 'static,
    W: Worker,
{
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        self.lane.attach(subscription);
    }

    fn on_next(&mut self, item: T) {
        self.lane.on_item(item);
    }

    fn on_error(&mut self, error: Error) {
        self.lane.on_error(error);
    }

    fn on_complete(&mut self) {
        self.lane.on_complete();
    }
}
