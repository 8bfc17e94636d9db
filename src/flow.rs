use crate::{
    config::Config,
    error::Error,
    reduce::Reduce,
    scheduler::RunOn,
    sync::{AtomicBool, Ordering, fence},
    types::BoxError,
    worker::Scheduler,
};
use std::sync::{Arc, OnceLock};

/// Consumer side of the demand protocol.
///
/// A subscriber first receives [`on_subscribe`](Self::on_subscribe) with the
/// handle it uses to request items, then any number of
/// [`on_next`](Self::on_next) calls bounded by its requests, then at most one
/// of [`on_error`](Self::on_error) or [`on_complete`](Self::on_complete).
/// Calls are never concurrent with each other.
pub trait Subscriber<T>: Send {
    /// Hand the subscriber its control handle.
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>);
    /// Deliver one item.
    fn on_next(&mut self, item: T);
    /// Terminate with an error.
    fn on_error(&mut self, error: Error);
    /// Terminate normally.
    fn on_complete(&mut self);
}

/// Control handle given to a [`Subscriber`].
///
/// Both methods may be called from any thread, including reentrantly from
/// inside the subscriber's own callbacks.
pub trait Subscription: Send + Sync {
    /// Authorize `n` more items. [`UNBOUNDED`](crate::demand::UNBOUNDED)
    /// lifts the bound entirely.
    fn request(&self, n: u64);
    /// Stop delivery. Idempotent.
    fn cancel(&self);
}

/// A source split into a fixed number of independent lanes.
///
/// `subscribe` must be called with exactly [`parallelism`](Self::parallelism)
/// subscribers; lane `i` is delivered to `subscribers[i]`.
pub trait ParallelFlow<T: Send + 'static>: Sized {
    /// Number of lanes.
    fn parallelism(&self) -> usize;

    /// Attach one subscriber per lane.
    fn subscribe(self, subscribers: Vec<Box<dyn Subscriber<T>>>);

    /// Move every lane onto its own worker from `scheduler`, decoupling the
    /// producing thread from the consuming one.
    fn run_on<S: Scheduler>(self, scheduler: S, config: Config) -> RunOn<Self, S> {
        RunOn::new(self, scheduler, config)
    }

    /// Fold every lane with `combine` and merge the lane results into one
    /// value.
    fn reduce<F>(self, combine: F, config: Config) -> Reduce<Self, F>
    where
        F: Fn(T, T) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        Reduce::new(self, combine, config)
    }
}

/// Check that `subscribers` matches the flow's parallelism. On mismatch every
/// subscriber is handed an inert subscription followed by
/// [`Error::ParallelismMismatch`].
pub(crate) fn validate<T>(expected: usize, subscribers: &mut [Box<dyn Subscriber<T>>]) -> bool {
    let actual = subscribers.len();
    if actual == expected {
        return true;
    }
    tracing::warn!(expected, actual, "parallel flow subscribed with wrong lane count");
    for subscriber in subscribers {
        subscriber.on_subscribe(Arc::new(EmptySubscription));
        subscriber.on_error(Error::ParallelismMismatch { expected, actual });
    }
    false
}

/// Subscription that ignores requests and cancellation.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptySubscription;

impl Subscription for EmptySubscription {
    fn request(&self, _n: u64) {}

    fn cancel(&self) {}
}

/// Write-once slot for an upstream subscription that may be cancelled before
/// it arrives.
///
/// Whichever of [`set`](Self::set) and [`cancel`](Self::cancel) happens last
/// cancels the subscription, and it is cancelled at most once.
pub(crate) struct SubscriptionCell {
    upstream: OnceLock<Arc<dyn Subscription>>,
    cancelled: AtomicBool,
    fired: AtomicBool,
}

impl SubscriptionCell {
    pub(crate) fn new() -> Self {
        Self {
            upstream: OnceLock::new(),
            cancelled: AtomicBool::new(false),
            fired: AtomicBool::new(false),
        }
    }

    /// Store `upstream`. Returns `false`, and cancels `upstream`, if a
    /// subscription was already stored.
    pub(crate) fn set(&self, upstream: Arc<dyn Subscription>) -> bool {
        if let Err(duplicate) = self.upstream.set(upstream) {
            duplicate.cancel();
            return false;
        }
        // Pairs with the fence in `cancel`: at least one side observes the other.
        fence(Ordering::SeqCst);
        if self.cancelled.load(Ordering::Relaxed) {
            self.fire();
        }
        true
    }

    pub(crate) fn request(&self, n: u64) {
        if let Some(upstream) = self.upstream.get() {
            upstream.request(n);
        }
    }

    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        self.fire();
    }

    fn fire(&self) {
        if let Some(upstream) = self.upstream.get()
            && !self.fired.swap(true, Ordering::AcqRel)
        {
            upstream.cancel();
        }
    }
}

impl core::fmt::Debug for SubscriptionCell {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SubscriptionCell")
            .field("attached", &self.upstream.get().is_some())
            .field("cancelled", &self.cancelled)
            .finish()
    }
}
