use crate::{
    demand::{self, UNBOUNDED},
    scheduler::LaneScheduler,
    sync::Ordering,
    worker::Worker,
};

/// Why a drain pass stopped for good.
enum Terminated {
    Cancelled,
    Failed,
    Completed,
}

impl<T, W> LaneScheduler<T, W>
where
    T: Send + 'static,
    W: Worker,
{
    /// Deliver buffered items to the consumer within its demand.
    ///
    /// Runs on the worker and only while owning the drain token. Each pass:
    /// - Emits up to the currently requested amount, stopping early when the
    ///   buffer runs dry.
    /// - Every `limit` consumed items, requests `limit` more from upstream.
    /// - Delivers the terminal signal only once the buffer is flushed (normal
    ///   completion) or immediately (error), then keeps the token forever.
    /// - Subtracts what it emitted from the demand and loops while signals
    ///   arrived during the pass.
    pub(super) fn drain(&self) {
        let mut missed = 1;
        let mut consumed = self.consumed.load(Ordering::Relaxed);

        loop {
            let requested = self.requested.load(Ordering::Acquire);
            let mut emitted = 0u64;

            while emitted != requested {
                if let Some(reason) = self.check_terminated(false) {
                    self.finish(reason);
                    return;
                }
                let Some(item) = self.queue.pop() else {
                    // A completion may have raced with the pop above.
                    if let Some(reason) = self.check_terminated(true) {
                        self.finish(reason);
                        return;
                    }
                    break;
                };
                // SAFETY: We own the drain token.
                unsafe { self.with_consumer(|consumer| consumer.on_next(item)) };
                emitted += 1;
                consumed += 1;
                if consumed == self.limit {
                    consumed = 0;
                    self.upstream.request(self.limit as u64);
                }
            }

            // Demand exhausted: termination may still be due without any
            // further request.
            if emitted == requested
                && let Some(reason) = self.check_terminated(true)
            {
                self.finish(reason);
                return;
            }

            if emitted != 0 && requested != UNBOUNDED {
                demand::produced(&self.requested, emitted);
            }

            self.consumed.store(consumed, Ordering::Relaxed);
            missed = self.token.leave(missed);
            if missed == 0 {
                break;
            }
            tracing::trace!(lane = self.index, missed, "drain signalled during pass");
        }
    }

    /// Decide whether the lane has reached a terminal state. Completion is
    /// only reported when `allow_completion` is set and the buffer is empty.
    fn check_terminated(&self, allow_completion: bool) -> Option<Terminated> {
        if self.cancelled.load(Ordering::Acquire) {
            return Some(Terminated::Cancelled);
        }
        if !self.done.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: `done` has been published, so the producer no longer writes
        // the error slot, and we own the drain token.
        if unsafe { self.error.with_mut(|error| error.is_some()) } {
            return Some(Terminated::Failed);
        }
        (allow_completion && self.queue.is_empty()).then_some(Terminated::Completed)
    }

    /// Deliver the terminal signal. The drain token is never released
    /// afterwards.
    fn finish(&self, reason: Terminated) {
        match reason {
            Terminated::Cancelled => {}
            Terminated::Failed => {
                while self.queue.pop().is_some() {}
                // SAFETY: See `check_terminated`.
                let error = unsafe { self.error.with_mut(Option::take) }
                    .expect("LaneScheduler::finish: [1]");
                tracing::debug!(lane = self.index, %error, "lane failed");
                // SAFETY: We own the drain token.
                unsafe { self.with_consumer(|consumer| consumer.on_error(error)) };
                self.worker.dispose();
            }
            Terminated::Completed => {
                tracing::debug!(lane = self.index, "lane completed");
                // SAFETY: We own the drain token.
                unsafe { self.with_consumer(|consumer| consumer.on_complete()) };
                self.worker.dispose();
            }
        }
        // SAFETY: We own the drain token and never leave it.
        unsafe { self.release() };
    }
}
