use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use sluice_flow::{Publisher, Subscriber, Subscription};
use tracing::trace;

use crate::{RecordingSubscription, test_cause};

/// One step of a [`ScriptedPublisher`] script.
#[derive(Clone, Debug)]
pub enum Step {
    /// Emit a chunk; waits for demand first.
    Chunk(Bytes),
    /// Fail the stream with the given message.
    Fail(String),
    /// Complete the stream.
    Complete,
}

impl Step {
    pub fn chunk(data: &'static [u8]) -> Self {
        Self::Chunk(Bytes::from_static(data))
    }
}

#[derive(Default)]
struct Demand {
    outstanding: u64,
    cancelled: bool,
}

struct ThreadSubscription {
    demand: Mutex<Demand>,
    changed: Condvar,
    log: RecordingSubscription,
}

impl Subscription for ThreadSubscription {
    fn request(&self, n: u64) {
        self.log.request(n);
        self.demand.lock().outstanding += n;
        self.changed.notify_all();
    }

    fn cancel(&self) {
        self.log.cancel();
        self.demand.lock().cancelled = true;
        self.changed.notify_all();
    }
}

/// Publisher that plays a fixed script on its own thread, honouring demand.
///
/// Chunks wait for credit; terminal steps are sent without it. Cancellation stops the
/// script before the next step.
pub struct ScriptedPublisher {
    script: Vec<Step>,
    log: RecordingSubscription,
    handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ScriptedPublisher {
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            script,
            log: RecordingSubscription::new(),
            handle: Arc::default(),
        }
    }

    /// Record of the calls the subscriber made on its subscription.
    pub fn log(&self) -> RecordingSubscription {
        self.log.clone()
    }

    /// Handle to join the publisher thread after `subscribe`.
    pub fn joiner(&self) -> Joiner {
        Joiner {
            handle: Arc::clone(&self.handle),
        }
    }
}

/// Joins a [`ScriptedPublisher`] thread.
#[derive(Clone)]
pub struct Joiner {
    handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Joiner {
    /// # Panics
    ///
    /// Panics if the publisher thread panicked.
    pub fn join(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.join().expect("publisher thread panicked");
        }
    }
}

impl Publisher<Bytes> for ScriptedPublisher {
    fn subscribe(self, mut subscriber: Box<dyn Subscriber<Bytes>>) {
        let subscription = Arc::new(ThreadSubscription {
            demand: Mutex::default(),
            changed: Condvar::new(),
            log: self.log.clone(),
        });
        let script = self.script;

        let handle = thread::spawn(move || {
            subscriber.on_subscribe(Arc::clone(&subscription) as Arc<dyn Subscription>);
            for step in script {
                match step {
                    Step::Chunk(chunk) => {
                        let mut demand = subscription.demand.lock();
                        while demand.outstanding == 0 && !demand.cancelled {
                            subscription.changed.wait(&mut demand);
                        }
                        if demand.cancelled {
                            trace!("scripted publisher cancelled");
                            return;
                        }
                        demand.outstanding -= 1;
                        drop(demand);
                        subscriber.on_next(chunk);
                    }
                    Step::Fail(msg) => {
                        if !subscription.demand.lock().cancelled {
                            subscriber.on_error(test_cause(&msg));
                        }
                        return;
                    }
                    Step::Complete => {
                        if !subscription.demand.lock().cancelled {
                            subscriber.on_complete();
                        }
                        return;
                    }
                }
            }
        });
        *self.handle.lock() = Some(handle);
    }
}
