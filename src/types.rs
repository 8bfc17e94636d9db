use crate::sync::UnsafeCell;
use core::fmt;

/// Boxed, thread-safe error produced by user code (upstream sources and
/// combine functions).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A minimal `UnsafeCell` wrapper that is `Sync` when `T: Send`.
///
/// Used for state that is only ever touched by whoever currently owns a
/// [`DrainToken`](crate::token::DrainToken) or has won a one-shot atomic
/// transition, so at most one thread accesses the contents at a time.
#[repr(transparent)]
pub(crate) struct SyncUnsafeCell<T>(UnsafeCell<T>);

// SAFETY: Every access goes through `with_mut`, whose callers guarantee
// exclusive access via a drain token or a won CAS. Handing `T` across threads
// in that manner only requires `T: Send`.
unsafe impl<T: Send> Sync for SyncUnsafeCell<T> {}

impl<T> SyncUnsafeCell<T> {
    pub(crate) fn new(val: T) -> Self {
        Self(UnsafeCell::new(val))
    }

    /// # Safety
    ///
    /// The caller must have exclusive logical access to the contents for the
    /// duration of `f`: no other thread may call `with_mut` concurrently, and
    /// `f` must not re-enter `with_mut` on the same cell.
    #[inline]
    pub(crate) unsafe fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        // SAFETY: Exclusivity is guaranteed by the caller.
        self.0.with_mut(|ptr| f(unsafe { &mut *ptr }))
    }
}

impl<T> fmt::Debug for SyncUnsafeCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncUnsafeCell").finish_non_exhaustive()
    }
}
