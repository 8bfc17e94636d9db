use crate::{
    sync::{AtomicUsize, Ordering},
    types::SyncUnsafeCell,
};
use crossbeam_utils::CachePadded;

/// Rendezvous point pairing two concurrently arriving values.
///
/// `acquired` counts claimed slots (capped at 2) and `released` counts
/// written ones. Keeping them separate means the producer that completes the
/// pair never reads a slot its partner has claimed but not yet written.
#[derive(Debug)]
pub(super) struct SlotPair<T> {
    slots: [SyncUnsafeCell<Option<T>>; 2],
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl<T: Send> SlotPair<T> {
    pub(super) fn new() -> Self {
        Self {
            slots: [SyncUnsafeCell::new(None), SyncUnsafeCell::new(None)],
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }

    /// Claim a slot. `None` means both slots are taken and the caller must
    /// move on to a fresh pair.
    pub(super) fn try_acquire(&self) -> Option<usize> {
        let mut acquired = self.acquired.load(Ordering::Acquire);
        loop {
            if acquired >= 2 {
                return None;
            }
            match self.acquired.compare_exchange_weak(
                acquired,
                acquired + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(acquired),
                Err(actual) => acquired = actual,
            }
        }
    }

    /// Write `value` into the claimed `slot` and release it. Returns `true`
    /// if this release completed the pair, in which case the caller now owns
    /// both values.
    pub(super) fn release(&self, slot: usize, value: T) -> bool {
        // SAFETY: `slot` was handed out once by `try_acquire`, so we are its
        // only writer, and nobody reads it before `released` reaches 2.
        unsafe { self.slots[slot].with_mut(|cell| *cell = Some(value)) };
        self.released.fetch_add(1, Ordering::AcqRel) + 1 == 2
    }

    /// Take both values out of a pair whose `release` returned `true`.
    pub(super) fn take_pair(&self) -> (T, T) {
        // SAFETY: Both writers have released (AcqRel on `released`), and only
        // the completing producer calls this.
        let (first, second) = unsafe {
            (
                self.slots[0].with_mut(Option::take),
                self.slots[1].with_mut(Option::take),
            )
        };
        (
            first.expect("SlotPair::take_pair: [1]"),
            second.expect("SlotPair::take_pair: [2]"),
        )
    }

    /// Take the unpaired value of the final pair, if any.
    ///
    /// Only called by the last lane to report, after every other report has
    /// finished writing.
    pub(super) fn take_leftover(&self) -> Option<T> {
        if self.released.load(Ordering::Acquire) != 1 {
            return None;
        }
        // SAFETY: All reporters are done; the single released slot is slot 0.
        unsafe { self.slots[0].with_mut(Option::take) }
    }
}

/// Fixed arena of slot pairs with a monotonic cursor naming the current one.
///
/// Detaching a pair advances the cursor, which opens the next, still unused,
/// pair. Every lane value and every combined result claims one slot, and only
/// full pairs are detached, so over `n` lanes the cursor never moves past
/// index `n - 1`.
#[derive(Debug)]
pub(super) struct SlotPairs<T> {
    pairs: Box<[SlotPair<T>]>,
    current: CachePadded<AtomicUsize>,
}

impl<T: Send> SlotPairs<T> {
    pub(super) fn new(lanes: usize) -> Self {
        Self {
            pairs: (0..lanes).map(|_| SlotPair::new()).collect(),
            current: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Offer `value` for pairing. Returns the two values of a pair this call
    /// completed; `None` means the value is parked waiting for a partner.
    pub(super) fn add(&self, value: T) -> Option<(T, T)> {
        loop {
            let index = self.current.load(Ordering::Acquire);
            let pair = &self.pairs[index];
            let Some(slot) = pair.try_acquire() else {
                self.detach(index);
                continue;
            };
            if pair.release(slot, value) {
                self.detach(index);
                return Some(pair.take_pair());
            }
            return None;
        }
    }

    /// Take the value still waiting for a partner once every lane reported.
    pub(super) fn take_leftover(&self) -> Option<T> {
        let index = self.current.load(Ordering::Acquire);
        self.pairs.get(index).and_then(SlotPair::take_leftover)
    }

    fn detach(&self, index: usize) {
        // Losing the race means someone else already moved past this pair.
        let _ = self.current.compare_exchange(
            index,
            index + 1,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}
