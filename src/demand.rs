//! Saturating arithmetic on outstanding-demand counters.
//!
//! Demand is a non-negative `u64`. [`UNBOUNDED`] is absorbing: once a counter
//! holds it, additions and subtractions leave it unchanged.

use crate::sync::{AtomicU64, Ordering};

/// Demand sentinel meaning "send everything you have".
pub const UNBOUNDED: u64 = u64::MAX;

/// Add `n` to `counter`, saturating at [`UNBOUNDED`]. Returns the previous
/// value.
pub(crate) fn add(counter: &AtomicU64, n: u64) -> u64 {
    match counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
        (current != UNBOUNDED).then(|| current.saturating_add(n))
    }) {
        Ok(previous) | Err(previous) => previous,
    }
}

/// Subtract `n` delivered items from `counter` unless it is unbounded.
/// Returns the new value.
///
/// # Panics
/// If more items were delivered than requested. Impossible if the drain loops
/// are correct.
pub(crate) fn produced(counter: &AtomicU64, n: u64) -> u64 {
    match counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
        (current != UNBOUNDED)
            .then(|| current.checked_sub(n).expect("demand::produced: [1]"))
    }) {
        Ok(previous) => previous - n,
        Err(previous) => previous,
    }
}
