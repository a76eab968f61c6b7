use std::sync::Arc;

use parking_lot::Mutex;
use sluice_flow::Subscription;

#[derive(Debug, Default)]
struct Log {
    requests: Vec<u64>,
    cancels: usize,
}

/// Subscription that records every call made on it.
#[derive(Clone, Debug, Default)]
pub struct RecordingSubscription {
    log: Arc<Mutex<Log>>,
}

impl RecordingSubscription {
    pub fn new() -> Self {
        Self::default()
    }

    /// The same subscription as a protocol handle.
    pub fn handle(&self) -> Arc<dyn Subscription> {
        Arc::new(self.clone())
    }

    /// Every `request(n)` argument in call order.
    pub fn requests(&self) -> Vec<u64> {
        self.log.lock().requests.clone()
    }

    pub fn request_calls(&self) -> usize {
        self.log.lock().requests.len()
    }

    pub fn requested_total(&self) -> u64 {
        self.log.lock().requests.iter().sum()
    }

    pub fn cancel_calls(&self) -> usize {
        self.log.lock().cancels
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_calls() > 0
    }
}

impl Subscription for RecordingSubscription {
    fn request(&self, n: u64) {
        self.log.lock().requests.push(n);
    }

    fn cancel(&self) {
        self.log.lock().cancels += 1;
    }
}
