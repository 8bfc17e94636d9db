use crate::{
    error::Error,
    flow::{Subscriber, Subscription},
    sync::{AtomicU8, Ordering},
    types::SyncUnsafeCell,
};
use std::sync::Arc;

const NO_REQUEST_NO_VALUE: u8 = 0;
const NO_REQUEST_HAS_VALUE: u8 = 1;
const HAS_REQUEST_NO_VALUE: u8 = 2;
const HAS_REQUEST_HAS_VALUE: u8 = 3;
const CANCELLED: u8 = 4;

/// Single-value downstream of a reduction.
///
/// The value is emitted once both a request and the value are present,
/// on whichever thread supplies the second of the two. Terminal paths are
/// mutually exclusive by construction in [`ReduceState`](super::ReduceState),
/// and the state machine ensures the emitting path runs exactly once, so the
/// downstream subscriber is never entered concurrently.
#[derive(Debug)]
pub(super) struct ScalarOutput<T> {
    state: AtomicU8,
    value: SyncUnsafeCell<Option<T>>,
    /// Moved out by the single terminal path.
    downstream: SyncUnsafeCell<Option<Box<dyn Subscriber<T>>>>,
}

impl<T: Send + 'static> ScalarOutput<T> {
    pub(super) fn new(downstream: Box<dyn Subscriber<T>>) -> Self {
        Self {
            state: AtomicU8::new(NO_REQUEST_NO_VALUE),
            value: SyncUnsafeCell::new(None),
            downstream: SyncUnsafeCell::new(Some(downstream)),
        }
    }

    /// Hand the downstream its subscription. Must run before any lane is
    /// subscribed.
    pub(super) fn subscribe(&self, subscription: Arc<dyn Subscription>) {
        // SAFETY: No lane exists yet, so no terminal path can run.
        unsafe {
            self.downstream.with_mut(|downstream| {
                if let Some(downstream) = downstream {
                    downstream.on_subscribe(subscription);
                }
            });
        }
    }

    pub(super) fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    /// Record a positive request; emits the value if it is already there.
    pub(super) fn request(&self) {
        let mut state = self.state.load(Ordering::Acquire);
        loop {
            match state {
                NO_REQUEST_NO_VALUE => {
                    match self.state.compare_exchange(
                        NO_REQUEST_NO_VALUE,
                        HAS_REQUEST_NO_VALUE,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => return,
                        Err(actual) => state = actual,
                    }
                }
                NO_REQUEST_HAS_VALUE => {
                    if self
                        .state
                        .compare_exchange(
                            NO_REQUEST_HAS_VALUE,
                            HAS_REQUEST_HAS_VALUE,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        // SAFETY: The value was published by the CAS in
                        // `complete` and we won the only transition out of it.
                        let value = unsafe { self.value.with_mut(Option::take) }
                            .expect("ScalarOutput::request: [1]");
                        self.emit(value);
                    }
                    return;
                }
                _ => return,
            }
        }
    }

    /// Supply the reduced value; emits it if a request is already there.
    pub(super) fn complete(&self, value: T) {
        match self.state.load(Ordering::Acquire) {
            HAS_REQUEST_NO_VALUE => {
                // Only cancellation can race with us here.
                if self
                    .state
                    .compare_exchange(
                        HAS_REQUEST_NO_VALUE,
                        HAS_REQUEST_HAS_VALUE,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    self.emit(value);
                }
            }
            NO_REQUEST_NO_VALUE => {
                // SAFETY: Only the single completing lane writes the value, and
                // no reader takes it before the CAS below publishes it.
                unsafe { self.value.with_mut(|slot| *slot = Some(value)) };
                if let Err(actual) = self.state.compare_exchange(
                    NO_REQUEST_NO_VALUE,
                    NO_REQUEST_HAS_VALUE,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    // SAFETY: The CAS failed, so the value was never published
                    // and is still ours.
                    let value = unsafe { self.value.with_mut(Option::take) }
                        .expect("ScalarOutput::complete: [1]");
                    if actual == HAS_REQUEST_NO_VALUE {
                        self.complete(value);
                    }
                }
            }
            // Cancelled, or a value was already supplied.
            _ => {}
        }
    }

    /// Complete without a value.
    pub(super) fn complete_empty(&self) {
        if self.is_cancelled() {
            return;
        }
        // SAFETY: The terminal paths of a reduction are mutually exclusive and
        // an empty completion never stores a value that `request` could emit.
        if let Some(mut downstream) = unsafe { self.take_downstream() } {
            downstream.on_complete();
        }
    }

    /// Deliver `error`, or hand it back if the downstream already cancelled.
    pub(super) fn error(&self, error: Error) -> Result<(), Error> {
        if self.is_cancelled() {
            return Err(error);
        }
        // SAFETY: See `complete_empty`.
        match unsafe { self.take_downstream() } {
            Some(mut downstream) => {
                downstream.on_error(error);
                Ok(())
            }
            None => Err(error),
        }
    }

    /// Move to the cancelled state, dropping any parked value. Returns `true`
    /// for the first cancellation.
    pub(super) fn cancel(&self) -> bool {
        let previous = self.state.swap(CANCELLED, Ordering::AcqRel);
        if previous == NO_REQUEST_HAS_VALUE {
            // SAFETY: The value was published and nobody else can take it now.
            drop(unsafe { self.value.with_mut(Option::take) });
        }
        previous != CANCELLED
    }

    fn emit(&self, value: T) {
        // SAFETY: Exactly one caller reaches `emit`, and it is the only
        // terminal path of the reduction.
        let Some(mut downstream) = (unsafe { self.take_downstream() }) else {
            return;
        };
        downstream.on_next(value);
        if !self.is_cancelled() {
            downstream.on_complete();
        }
    }

    /// # Safety
    ///
    /// Only a terminal path may call this.
    unsafe fn take_downstream(&self) -> Option<Box<dyn Subscriber<T>>> {
        // SAFETY: Guaranteed by the caller.
        unsafe { self.downstream.with_mut(Option::take) }
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::flow::EmptySubscription;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Log {
        items: Vec<Arc<u32>>,
        completions: usize,
        errors: usize,
    }

    struct Logging(Arc<Mutex<Log>>);

    impl Subscriber<Arc<u32>> for Logging {
        fn on_subscribe(&mut self, _: Arc<dyn Subscription>) {}

        fn on_next(&mut self, item: Arc<u32>) {
            self.0.lock().items.push(item);
        }

        fn on_error(&mut self, _: Error) {
            self.0.lock().errors += 1;
        }

        fn on_complete(&mut self) {
            self.0.lock().completions += 1;
        }
    }

    fn output() -> (ScalarOutput<Arc<u32>>, Arc<Mutex<Log>>) {
        let log = Arc::new(Mutex::new(Log::default()));
        let output = ScalarOutput::new(Box::new(Logging(Arc::clone(&log))));
        output.subscribe(Arc::new(EmptySubscription));
        (output, log)
    }

    #[test]
    fn value_waits_for_request() {
        let (output, log) = output();
        output.complete(Arc::new(7));
        assert!(log.lock().items.is_empty());

        output.request();
        output.request();
        let log = log.lock();
        assert_eq!(log.items.len(), 1);
        assert_eq!(*log.items[0], 7);
        assert_eq!(log.completions, 1);
    }

    #[test]
    fn request_first_emits_on_completion() {
        let (output, log) = output();
        output.request();
        output.complete(Arc::new(3));
        assert_eq!(log.lock().items.len(), 1);
        assert_eq!(log.lock().completions, 1);
    }

    #[test]
    fn cancel_drops_the_parked_value() {
        let (output, log) = output();
        let value = Arc::new(1);
        output.complete(Arc::clone(&value));
        assert_eq!(Arc::strong_count(&value), 2);

        assert!(output.cancel());
        assert!(!output.cancel());
        assert_eq!(Arc::strong_count(&value), 1);

        output.request();
        assert!(log.lock().items.is_empty());
    }

    #[test]
    fn error_after_cancel_is_handed_back() {
        let (output, log) = output();
        output.cancel();
        assert!(output.error(Error::InvalidDemand(0)).is_err());
        output.complete_empty();
        assert_eq!(log.lock().errors, 0);
        assert_eq!(log.lock().completions, 0);
    }
}
