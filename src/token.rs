use crate::sync::{AtomicUsize, Ordering};
use crossbeam_utils::CachePadded;

/// Reentrancy guard that serializes drain passes without a lock.
///
/// Every signal that may require draining calls [`enter`](Self::enter); only
/// the caller that moves the counter away from zero owns the drain and must
/// run (or schedule) it. The owner finishes each pass with
/// [`leave`](Self::leave), passing the number of signals it has accounted
/// for. A non-zero residual means signals arrived during the pass and the
/// owner must go around again.
///
/// An owner that reaches a terminal state simply returns without calling
/// `leave`: the counter then never returns to zero and no further pass is ever
/// started.
#[derive(Debug)]
pub(crate) struct DrainToken(CachePadded<AtomicUsize>);

impl DrainToken {
    pub(crate) fn new() -> Self {
        Self(CachePadded::new(AtomicUsize::new(0)))
    }

    /// Register a signal. Returns `true` if the caller now owns the drain.
    #[inline]
    pub(crate) fn enter(&self) -> bool {
        self.0.fetch_add(1, Ordering::AcqRel) == 0
    }

    /// Account for `missed` signals. Returns the residual: zero releases
    /// ownership, anything else is the `missed` count of the next pass.
    #[inline]
    #[must_use]
    pub(crate) fn leave(&self, missed: usize) -> usize {
        self.0.fetch_sub(missed, Ordering::AcqRel) - missed
    }
}
