#![allow(missing_docs)]
#![cfg(feature = "loom")]

use core::num::NonZeroUsize;
use loom::{
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};
use parallel_lanes::{
    BoxError, Config, EmptySubscription, Error, ErrorSink, ImmediateScheduler, LaneScheduler,
    ParallelFlow, Scheduler, Subscriber, Subscription,
};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Seen {
    items: Vec<u32>,
    errors: usize,
    completions: usize,
}

struct Recording {
    seen: Arc<Mutex<Seen>>,
    subscription: Arc<Mutex<Option<Arc<dyn Subscription>>>>,
    initial: u64,
}

impl Subscriber<u32> for Recording {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        *self.subscription.lock().unwrap() = Some(Arc::clone(&subscription));
        if self.initial != 0 {
            subscription.request(self.initial);
        }
    }

    fn on_next(&mut self, item: u32) {
        self.seen.lock().unwrap().items.push(item);
    }

    fn on_error(&mut self, _error: Error) {
        self.seen.lock().unwrap().errors += 1;
    }

    fn on_complete(&mut self) {
        self.seen.lock().unwrap().completions += 1;
    }
}

/// Parallel flow that hands its lane subscribers back to the test.
struct Handoff(Arc<Mutex<Vec<Box<dyn Subscriber<u32>>>>>);

impl ParallelFlow<u32> for Handoff {
    fn parallelism(&self) -> usize {
        2
    }

    fn subscribe(self, subscribers: Vec<Box<dyn Subscriber<u32>>>) {
        *self.0.lock().unwrap() = subscribers;
    }
}

fn add(a: u32, b: u32) -> Result<u32, BoxError> {
    Ok(a + b)
}

#[test]
fn loom_lane_delivers_in_order_and_completes_once() {
    loom::model(|| {
        let seen = Arc::new(Mutex::new(Seen::default()));
        let subscription = Arc::new(Mutex::new(None));
        let consumer = Recording {
            seen: Arc::clone(&seen),
            subscription: Arc::clone(&subscription),
            initial: 0,
        };
        let lane = LaneScheduler::new(
            0,
            Box::new(consumer),
            NonZeroUsize::new(2).unwrap(),
            ImmediateScheduler.create_worker(),
            ErrorSink::default(),
        );
        lane.attach(Arc::new(EmptySubscription));
        let subscription = subscription.lock().unwrap().clone().unwrap();

        let producer = {
            let lane = Arc::clone(&lane);
            thread::spawn(move || {
                lane.on_item(1);
                lane.on_item(2);
                lane.on_complete();
            })
        };
        subscription.request(1);
        subscription.request(1);
        producer.join().unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.items, [1, 2]);
        assert_eq!(seen.completions, 1);
        assert_eq!(seen.errors, 0);
    });
}

#[test]
fn loom_reducer_emits_single_value() {
    loom::model(|| {
        let handoff = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::new(Mutex::new(Seen::default()));
        let downstream = Recording {
            seen: Arc::clone(&seen),
            subscription: Arc::new(Mutex::new(None)),
            initial: 1,
        };
        Handoff(Arc::clone(&handoff))
            .reduce(add, Config::default())
            .subscribe(downstream);

        let lanes: Vec<_> = handoff.lock().unwrap().drain(..).collect();
        let threads: Vec<_> = lanes
            .into_iter()
            .zip([3, 4])
            .map(|(mut lane, value)| {
                thread::spawn(move || {
                    lane.on_subscribe(Arc::new(EmptySubscription));
                    lane.on_next(value);
                    lane.on_complete();
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        let seen = seen.lock().unwrap();
        assert_eq!(seen.items, [7]);
        assert_eq!(seen.completions, 1);
        assert_eq!(seen.errors, 0);
    });
}

#[test]
fn loom_concurrent_errors_deliver_exactly_one() {
    loom::model(|| {
        let handoff = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::new(Mutex::new(Seen::default()));
        let undeliverable = Arc::new(AtomicUsize::new(0));
        let sink = {
            let undeliverable = Arc::clone(&undeliverable);
            ErrorSink::from_fn(move |_| {
                undeliverable.fetch_add(1, Ordering::Relaxed);
            })
        };
        let downstream = Recording {
            seen: Arc::clone(&seen),
            subscription: Arc::new(Mutex::new(None)),
            initial: 1,
        };
        Handoff(Arc::clone(&handoff))
            .reduce(add, Config::default().with_error_sink(sink))
            .subscribe(downstream);

        let lanes: Vec<_> = handoff.lock().unwrap().drain(..).collect();
        let threads: Vec<_> = lanes
            .into_iter()
            .map(|mut lane| {
                thread::spawn(move || {
                    lane.on_subscribe(Arc::new(EmptySubscription));
                    lane.on_error(Error::upstream("boom"));
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        let seen = seen.lock().unwrap();
        assert_eq!(seen.errors, 1);
        assert_eq!(seen.completions, 0);
        assert_eq!(undeliverable.load(Ordering::Relaxed), 1);
    });
}
