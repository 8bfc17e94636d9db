use crate::types::BoxError;
use thiserror::Error;

/// Terminal error delivered to a lane consumer, to the reduction consumer, or
/// to the [`ErrorSink`](crate::config::ErrorSink) when no live consumer is
/// left to receive it.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The upstream pushed an item while the lane's hand-off buffer was full,
    /// i.e. it emitted more than the lane had requested.
    #[error("lane {lane} received an item while its hand-off buffer of {capacity} was full")]
    Overflow {
        /// Index of the offending lane.
        lane: usize,
        /// Capacity of the lane's hand-off buffer.
        capacity: usize,
    },
    /// The user-supplied combine function failed.
    #[error("combine function failed")]
    Combine(#[source] BoxError),
    /// An error raised by the upstream source of a lane.
    #[error(transparent)]
    Upstream(BoxError),
    /// A parallel flow was subscribed with the wrong number of subscribers.
    #[error("expected {expected} lane subscribers, got {actual}")]
    ParallelismMismatch {
        /// Parallelism of the flow.
        expected: usize,
        /// Number of subscribers supplied.
        actual: usize,
    },
    /// A consumer requested a non-positive number of items.
    #[error("demand must be positive, got {0}")]
    InvalidDemand(u64),
    /// A lane received a second upstream subscription.
    #[error("lane {lane} is already attached to an upstream")]
    AlreadyAttached {
        /// Index of the lane.
        lane: usize,
    },
}

impl Error {
    /// Wrap an arbitrary upstream failure.
    pub fn upstream(error: impl Into<BoxError>) -> Self {
        Self::Upstream(error.into())
    }

    /// Wrap a combine function failure.
    pub fn combine(error: impl Into<BoxError>) -> Self {
        Self::Combine(error.into())
    }
}
