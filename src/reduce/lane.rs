use crate::{
    demand::UNBOUNDED,
    error::Error,
    flow::{Subscriber, Subscription},
    reduce::ReduceState,
    types::BoxError,
};
use std::sync::Arc;

/// Subscriber folding one lane of a reduction.
pub(super) struct ReduceLane<T, F> {
    state: Arc<ReduceState<T, F>>,
    index: usize,
    value: Option<T>,
    done: bool,
}

impl<T, F> ReduceLane<T, F> {
    pub(super) fn new(state: Arc<ReduceState<T, F>>, index: usize) -> Self {
        Self {
            state,
            index,
            value: None,
            done: false,
        }
    }
}

impl<T, F> Subscriber<T> for ReduceLane<T, F>
where
    T: Send + 'static,
    F: Fn(T, T) -> Result<T, BoxError> + Send + Sync + 'static,
{
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        let lane = self.state.lane(self.index);
        if lane.set(Arc::clone(&subscription)) {
            subscription.request(UNBOUNDED);
        } else {
            self.state
                .error_sink()
                .report(Error::AlreadyAttached { lane: self.index });
        }
    }

    fn on_next(&mut self, item: T) {
        if self.done {
            return;
        }
        let folded = match self.value.take() {
            None => item,
            Some(acc) => match self.state.combine(acc, item) {
                Ok(folded) => folded,
                Err(error) => {
                    self.state.lane(self.index).cancel();
                    self.on_error(error);
                    return;
                }
            },
        };
        self.value = Some(folded);
    }

    fn on_error(&mut self, error: Error) {
        if self.done {
            self.state.error_sink().report(error);
            return;
        }
        self.done = true;
        self.value = None;
        self.state.inner_error(error);
    }

    fn on_complete(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        self.state.inner_complete(self.value.take());
    }
}
