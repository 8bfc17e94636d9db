use crate::error::Error;
use core::{fmt, num::NonZeroUsize};
use derive_more::Debug;
use std::sync::Arc;

/// Lane capacity used when none is configured.
pub const DEFAULT_PREFETCH: NonZeroUsize = NonZeroUsize::new(128).expect("Config: [1]");

/// Runtime configuration shared by the operators of this crate.
///
/// A `Config` is a cheap-to-clone value: it binds the hand-off capacity of
/// every lane created by [`run_on`](crate::flow::ParallelFlow::run_on) and the
/// [`ErrorSink`] that receives errors no consumer can take anymore.
#[must_use]
#[derive(Debug, Clone)]
pub struct Config {
    prefetch: NonZeroUsize,
    #[debug(skip)]
    error_sink: ErrorSink,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prefetch: DEFAULT_PREFETCH,
            error_sink: ErrorSink::default(),
        }
    }
}

impl Config {
    /// Set the per-lane hand-off capacity. This is also the number of items
    /// requested from upstream when a lane is attached.
    pub fn with_prefetch(mut self, prefetch: NonZeroUsize) -> Self {
        self.prefetch = prefetch;
        self
    }

    /// Replace the fallback sink for undeliverable errors.
    pub fn with_error_sink(mut self, error_sink: ErrorSink) -> Self {
        self.error_sink = error_sink;
        self
    }

    /// Per-lane hand-off capacity.
    #[must_use]
    pub fn prefetch(&self) -> NonZeroUsize {
        self.prefetch
    }

    /// Fallback sink for undeliverable errors.
    #[must_use]
    pub fn error_sink(&self) -> &ErrorSink {
        &self.error_sink
    }
}

/// Fire-and-forget handler for errors that arrive after their operation has
/// already terminated or been cancelled.
///
/// The default handler logs the error with `tracing::error!`. Tests inject a
/// capturing handler via [`ErrorSink::from_fn`].
#[derive(Clone)]
pub struct ErrorSink(Arc<dyn Fn(Error) + Send + Sync>);

impl ErrorSink {
    /// Build a sink from a closure.
    pub fn from_fn(f: impl Fn(Error) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Hand an undeliverable error to the sink.
    pub fn report(&self, error: Error) {
        (self.0)(error);
    }
}

impl Default for ErrorSink {
    fn default() -> Self {
        Self::from_fn(|error| tracing::error!(%error, "undeliverable error"))
    }
}

impl fmt::Debug for ErrorSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ErrorSink").finish_non_exhaustive()
    }
}
