mod lane;
mod output;
mod slot_pair;

use crate::{
    config::{Config, ErrorSink},
    error::Error,
    flow::{ParallelFlow, Subscriber, Subscription, SubscriptionCell},
    reduce::{lane::ReduceLane, output::ScalarOutput, slot_pair::SlotPairs},
    sync::{AtomicBool, AtomicUsize, Ordering},
    types::BoxError,
};
use crossbeam_utils::CachePadded;
use derive_more::Debug;
use std::sync::Arc;

/// Reduction of every lane of a parallel flow into a single value.
///
/// Created by [`ParallelFlow::reduce`]. Each lane folds its own items with
/// the combine function; the lane results are then merged pairwise, in
/// arrival order, so `combine` should be associative and commutative for the
/// result to be deterministic.
#[must_use]
#[derive(Debug)]
pub struct Reduce<P, F> {
    #[debug(skip)]
    source: P,
    #[debug(skip)]
    combine: F,
    config: Config,
}

impl<P, F> Reduce<P, F> {
    pub(crate) fn new(source: P, combine: F, config: Config) -> Self {
        Self {
            source,
            combine,
            config,
        }
    }

    /// Run the reduction, delivering the result to `downstream`.
    ///
    /// The downstream receives exactly one terminal signal: the reduced value
    /// followed by completion (once it has requested at least one item), an
    /// error, or a bare completion when no lane produced a value.
    pub fn subscribe<T>(self, downstream: impl Subscriber<T> + 'static)
    where
        T: Send + 'static,
        P: ParallelFlow<T>,
        F: Fn(T, T) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        let Self {
            source,
            combine,
            config,
        } = self;
        let lanes = source.parallelism();
        let state = Arc::new(ReduceState::new(
            lanes,
            combine,
            Box::new(downstream),
            config.error_sink().clone(),
        ));
        state.output.subscribe(Arc::clone(&state) as Arc<dyn Subscription>);
        if lanes == 0 {
            tracing::debug!("reducing an empty parallel flow");
            state.output.complete_empty();
            return;
        }
        let subscribers = (0..lanes)
            .map(|index| {
                Box::new(ReduceLane::new(Arc::clone(&state), index)) as Box<dyn Subscriber<T>>
            })
            .collect();
        source.subscribe(subscribers);
    }
}

/// Shared state of one reduction.
#[derive(Debug)]
pub(crate) struct ReduceState<T, F> {
    /// Upstream subscription of every lane, for fail-fast cancellation.
    lanes: Box<[SubscriptionCell]>,
    pairs: SlotPairs<T>,
    /// Lanes that have not reported yet.
    remaining: CachePadded<AtomicUsize>,
    /// Set by the first error; later errors go to the sink.
    failed: AtomicBool,
    output: ScalarOutput<T>,
    #[debug(skip)]
    combine: F,
    #[debug(skip)]
    error_sink: ErrorSink,
}

impl<T, F> ReduceState<T, F>
where
    T: Send + 'static,
    F: Fn(T, T) -> Result<T, BoxError> + Send + Sync + 'static,
{
    fn new(
        lanes: usize,
        combine: F,
        downstream: Box<dyn Subscriber<T>>,
        error_sink: ErrorSink,
    ) -> Self {
        Self {
            lanes: (0..lanes).map(|_| SubscriptionCell::new()).collect(),
            pairs: SlotPairs::new(lanes),
            remaining: CachePadded::new(AtomicUsize::new(lanes)),
            failed: AtomicBool::new(false),
            output: ScalarOutput::new(downstream),
            combine,
            error_sink,
        }
    }

    pub(crate) fn combine(&self, lhs: T, rhs: T) -> Result<T, Error> {
        (self.combine)(lhs, rhs).map_err(Error::combine)
    }

    pub(crate) fn lane(&self, index: usize) -> &SubscriptionCell {
        &self.lanes[index]
    }

    pub(crate) fn error_sink(&self) -> &ErrorSink {
        &self.error_sink
    }

    fn cancel_lanes(&self) {
        for lane in &self.lanes {
            lane.cancel();
        }
    }

    /// A lane finished with `value`, or with nothing if it saw no items.
    ///
    /// Pairs the value with whatever is parked, cascading through combined
    /// results, then counts the lane off. The last lane to report delivers
    /// the value left unpaired, or an empty completion.
    pub(crate) fn inner_complete(&self, value: Option<T>) {
        if let Some(mut value) = value {
            while let Some((lhs, rhs)) = self.pairs.add(value) {
                match self.combine(lhs, rhs) {
                    Ok(combined) => value = combined,
                    Err(error) => {
                        self.inner_error(error);
                        return;
                    }
                }
            }
        }

        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            match self.pairs.take_leftover() {
                Some(value) => {
                    tracing::debug!(lanes = self.lanes.len(), "reduction completed");
                    self.output.complete(value);
                }
                None => {
                    tracing::debug!(lanes = self.lanes.len(), "reduction completed empty");
                    self.output.complete_empty();
                }
            }
        }
    }

    /// Fail the whole reduction. Only the first error is delivered.
    pub(crate) fn inner_error(&self, error: Error) {
        if self.failed.swap(true, Ordering::AcqRel) {
            self.error_sink.report(error);
            return;
        }
        tracing::debug!(%error, "reduction failed");
        self.cancel_lanes();
        if let Err(error) = self.output.error(error) {
            self.error_sink.report(error);
        }
    }
}

impl<T, F> Subscription for ReduceState<T, F>
where
    T: Send + 'static,
    F: Fn(T, T) -> Result<T, BoxError> + Send + Sync + 'static,
{
    fn request(&self, n: u64) {
        if n == 0 {
            self.error_sink.report(Error::InvalidDemand(n));
            return;
        }
        self.output.request();
    }

    fn cancel(&self) {
        if self.output.cancel() {
            tracing::debug!("reduction cancelled");
            self.cancel_lanes();
        }
    }
}
