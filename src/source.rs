//! Pre-split parallel sources.

use crate::{
    demand::{self, UNBOUNDED},
    flow::{ParallelFlow, Subscriber, Subscription, validate},
    sync::{AtomicBool, AtomicU64, Ordering},
    token::DrainToken,
    types::SyncUnsafeCell,
};
use derive_more::Debug;
use std::sync::Arc;

/// Parallel flow with one iterator per lane.
///
/// Each lane emits its iterator's items on demand, on whichever thread issued
/// the request that made them deliverable, and completes when the iterator is
/// exhausted.
#[must_use]
#[derive(Debug)]
pub struct IterLanes<I> {
    #[debug(skip)]
    lanes: Vec<I>,
}

/// Build a parallel flow from one iterable per lane.
pub fn from_iters<I>(lanes: impl IntoIterator<Item = I>) -> IterLanes<I::IntoIter>
where
    I: IntoIterator,
{
    IterLanes {
        lanes: lanes.into_iter().map(IntoIterator::into_iter).collect(),
    }
}

impl<I> ParallelFlow<I::Item> for IterLanes<I>
where
    I: Iterator + Send + 'static,
    I::Item: Send + 'static,
{
    fn parallelism(&self) -> usize {
        self.lanes.len()
    }

    fn subscribe(self, mut subscribers: Vec<Box<dyn Subscriber<I::Item>>>) {
        if !validate(self.parallelism(), &mut subscribers) {
            return;
        }
        for (index, (iter, subscriber)) in self.lanes.into_iter().zip(subscribers).enumerate() {
            IterLane::start(index, iter, subscriber);
        }
    }
}

struct IterLane<I: Iterator> {
    index: usize,
    /// Drain owner only. Emptied on termination, which breaks the reference
    /// cycle with a subscriber holding this lane's subscription.
    state: SyncUnsafeCell<Option<(I, Box<dyn Subscriber<I::Item>>)>>,
    requested: AtomicU64,
    /// Set on cancellation and on completion.
    terminated: AtomicBool,
    token: DrainToken,
}

impl<I> IterLane<I>
where
    I: Iterator + Send + 'static,
    I::Item: Send + 'static,
{
    fn start(index: usize, iter: I, subscriber: Box<dyn Subscriber<I::Item>>) {
        let lane = Arc::new(Self {
            index,
            state: SyncUnsafeCell::new(Some((iter, subscriber))),
            requested: AtomicU64::new(0),
            terminated: AtomicBool::new(false),
            token: DrainToken::new(),
        });
        // Own the drain while the subscriber runs `on_subscribe`; requests it
        // makes are folded into the first pass below.
        let held = lane.token.enter();
        assert!(held, "IterLane::start: [1]");
        let subscription = Arc::clone(&lane) as Arc<dyn Subscription>;
        // SAFETY: We own the drain token.
        unsafe {
            lane.state.with_mut(|state| {
                if let Some((_, subscriber)) = state {
                    subscriber.on_subscribe(subscription);
                }
            });
        }
        lane.drain();
    }

    /// Emit items within the outstanding demand. The caller owns the token.
    fn drain(&self) {
        let mut missed = 1;
        loop {
            let requested = self.requested.load(Ordering::Acquire);
            // SAFETY: We own the drain token.
            let emitted = unsafe { self.state.with_mut(|state| self.emit(state, requested)) };
            let Some(emitted) = emitted else {
                // Terminated: keep the token and release the subscriber.
                // SAFETY: We own the drain token.
                drop(unsafe { self.state.with_mut(Option::take) });
                return;
            };
            if emitted != 0 && requested != UNBOUNDED {
                demand::produced(&self.requested, emitted);
            }
            missed = self.token.leave(missed);
            if missed == 0 {
                break;
            }
        }
    }

    /// One pass. Returns the number of items emitted, or `None` once the lane
    /// has terminated.
    fn emit(
        &self,
        state: &mut Option<(I, Box<dyn Subscriber<I::Item>>)>,
        requested: u64,
    ) -> Option<u64> {
        let (iter, subscriber) = state.as_mut()?;
        let mut emitted = 0;
        while emitted != requested {
            if self.terminated.load(Ordering::Acquire) {
                return None;
            }
            let Some(item) = iter.next() else {
                self.terminated.store(true, Ordering::Release);
                tracing::trace!(lane = self.index, "iterator lane exhausted");
                subscriber.on_complete();
                return None;
            };
            subscriber.on_next(item);
            emitted += 1;
        }
        (!self.terminated.load(Ordering::Acquire)).then_some(emitted)
    }
}

impl<I> Subscription for IterLane<I>
where
    I: Iterator + Send + 'static,
    I::Item: Send + 'static,
{
    fn request(&self, n: u64) {
        if n == 0 {
            tracing::warn!(lane = self.index, "zero demand requested, ignoring");
            return;
        }
        demand::add(&self.requested, n);
        if self.token.enter() {
            self.drain();
        }
    }

    fn cancel(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        // Idle: take the token for good. A running pass observes the flag.
        if self.token.enter() {
            // SAFETY: We own the drain token.
            drop(unsafe { self.state.with_mut(Option::take) });
        }
    }
}
