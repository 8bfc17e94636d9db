//! Fan-out/fan-in stages for parallel, demand-driven streams.
//!
//! A [`ParallelFlow`] is a source split into a fixed number of lanes. Each
//! lane speaks a small demand protocol: a [`Subscriber`] receives a
//! [`Subscription`], requests items, and gets at most as many as it asked for
//! followed by a single terminal signal.
//!
//! Two stages are provided:
//! - [`ParallelFlow::run_on`] moves every lane onto its own [`Worker`]. Items
//!   are handed off through a bounded queue per lane; the upstream is asked
//!   for `prefetch` items up front and replenished in batches once three
//!   quarters of the window have been consumed.
//! - [`ParallelFlow::reduce`] folds every lane and merges the lane results
//!   pairwise, lock-free, into a single value. The first error cancels all
//!   lanes; later errors are routed to the configured [`ErrorSink`].
//!
//! All coordination goes through a per-stage drain token: whichever thread
//! moves it from zero owns the drain loop, and every other signal merely
//! bumps the counter so the owner runs another pass. Consumers are therefore
//! never entered concurrently, without any locks on the hot path.
//!
//! ```
//! use parallel_lanes::{Config, ParallelFlow, RayonScheduler, source};
//! # use parallel_lanes::{Error, Subscriber, Subscription};
//! # use std::sync::{Arc, mpsc};
//! # struct Collect(mpsc::Sender<u64>);
//! # impl Subscriber<u64> for Collect {
//! #     fn on_subscribe(&mut self, s: Arc<dyn Subscription>) { s.request(1) }
//! #     fn on_next(&mut self, item: u64) { self.0.send(item).unwrap() }
//! #     fn on_error(&mut self, error: Error) { panic!("{error}") }
//! #     fn on_complete(&mut self) {}
//! # }
//! # let (tx, rx) = mpsc::channel();
//! source::from_iters(vec![1..=50u64, 51..=100])
//!     .run_on(RayonScheduler::new(), Config::default())
//!     .reduce(|a, b| Ok(a + b), Config::default())
//!     .subscribe(Collect(tx));
//! assert_eq!(rx.recv().unwrap(), 5050);
//! ```

/// Runtime knobs shared by the stages and the sink for undeliverable errors.
pub mod config;
/// Demand accounting helpers and the [`UNBOUNDED`] marker.
pub mod demand;
/// The crate's error type.
pub mod error;
/// The demand protocol: subscribers, subscriptions and parallel flows.
pub mod flow;
/// Pairwise lock-free reduction of all lanes into a single value.
pub mod reduce;
/// Per-lane hand-off onto workers with watermark replenishment.
pub mod scheduler;
/// Parallel flows backed by plain iterators.
pub mod source;
mod sync;
mod token;
/// Common aliases and the `SyncUnsafeCell` primitive used internally.
pub mod types;
/// Serial executors that lanes are moved onto.
pub mod worker;

pub use config::{Config, DEFAULT_PREFETCH, ErrorSink};
pub use demand::UNBOUNDED;
pub use error::Error;
pub use flow::{EmptySubscription, ParallelFlow, Subscriber, Subscription};
pub use reduce::Reduce;
pub use scheduler::{LaneInput, LaneScheduler, RunOn};
pub use source::from_iters;
pub use types::BoxError;
pub use worker::{ImmediateScheduler, RayonScheduler, Scheduler, Task, Worker};
