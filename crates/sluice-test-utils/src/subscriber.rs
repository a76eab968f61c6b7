use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use sluice_flow::{Cause, Subscriber, Subscription};

/// A signal observed by a [`RecordingSubscriber`].
#[derive(Clone, Debug)]
pub enum Event {
    Next(Bytes),
    Error(String),
    Complete,
}

#[derive(Default)]
struct Inner {
    subscription: Option<Arc<dyn Subscription>>,
    subscribe_calls: usize,
    events: Vec<Event>,
}

/// Read-only view of what a [`RecordingSubscriber`] saw.
#[derive(Clone, Default)]
pub struct Recorded {
    inner: Arc<Mutex<Inner>>,
    changed: Arc<Condvar>,
}

impl Recorded {
    pub fn events(&self) -> Vec<Event> {
        self.inner.lock().events.clone()
    }

    pub fn items(&self) -> Vec<Bytes> {
        self.inner
            .lock()
            .events
            .iter()
            .filter_map(|e| match e {
                Event::Next(b) => Some(b.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn subscribe_calls(&self) -> usize {
        self.inner.lock().subscribe_calls
    }

    pub fn is_complete(&self) -> bool {
        self.inner
            .lock()
            .events
            .iter()
            .any(|e| matches!(e, Event::Complete))
    }

    pub fn error(&self) -> Option<String> {
        self.inner.lock().events.iter().find_map(|e| match e {
            Event::Error(msg) => Some(msg.clone()),
            _ => None,
        })
    }

    /// The subscription handed to the subscriber.
    ///
    /// # Panics
    ///
    /// Panics if `on_subscribe` has not been called.
    pub fn subscription(&self) -> Arc<dyn Subscription> {
        self.inner
            .lock()
            .subscription
            .clone()
            .expect("subscriber has not been subscribed")
    }

    pub fn request(&self, n: u64) {
        self.subscription().request(n);
    }

    pub fn cancel(&self) {
        self.subscription().cancel();
    }

    /// Block until `on_subscribe` was called or `timeout` elapsed.
    pub fn wait_for_subscription(&self, timeout: std::time::Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut inner = self.inner.lock();
        while inner.subscription.is_none() {
            if self.changed.wait_until(&mut inner, deadline).timed_out() {
                return inner.subscription.is_some();
            }
        }
        true
    }

    /// Block until at least `count` events were recorded or `timeout` elapsed.
    pub fn wait_for_events(&self, count: usize, timeout: std::time::Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut inner = self.inner.lock();
        while inner.events.len() < count {
            if self.changed.wait_until(&mut inner, deadline).timed_out() {
                return inner.events.len() >= count;
            }
        }
        true
    }
}

/// Subscriber that records signals and grants demand only when told to.
pub struct RecordingSubscriber {
    recorded: Recorded,
    initial_demand: u64,
}

impl RecordingSubscriber {
    /// Create a subscriber that requests `initial_demand` items on subscribe (0 = none).
    pub fn new(initial_demand: u64) -> (Self, Recorded) {
        let recorded = Recorded::default();
        (
            Self {
                recorded: recorded.clone(),
                initial_demand,
            },
            recorded,
        )
    }

    fn push(&self, event: Event) {
        self.recorded.inner.lock().events.push(event);
        self.recorded.changed.notify_all();
    }
}

impl Subscriber<Bytes> for RecordingSubscriber {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        {
            let mut inner = self.recorded.inner.lock();
            inner.subscribe_calls += 1;
            inner.subscription = Some(Arc::clone(&subscription));
        }
        self.recorded.changed.notify_all();
        if self.initial_demand > 0 {
            subscription.request(self.initial_demand);
        }
    }

    fn on_next(&mut self, item: Bytes) {
        self.push(Event::Next(item));
    }

    fn on_error(&mut self, cause: Cause) {
        self.push(Event::Error(cause.to_string()));
    }

    fn on_complete(&mut self) {
        self.push(Event::Complete);
    }
}
