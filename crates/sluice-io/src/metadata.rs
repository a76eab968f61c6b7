#![forbid(unsafe_code)]

use parking_lot::{Condvar, Mutex};
use sluice_flow::Cause;
use tokio::sync::Notify;
use tracing::debug;

use crate::{BridgeError, BridgeOptions, BridgeResult, WaitPoint};

#[derive(Debug)]
enum SlotState<M> {
    Pending,
    Ready(M),
    Failed(Cause),
    /// The stream ended and no metadata was ever published.
    Missing,
}

/// Single-assignment cell for response metadata.
///
/// Resolves once, to either a value or a failure. Later assignments are ignored.
#[derive(Debug)]
pub(crate) struct MetadataSlot<M> {
    state: Mutex<SlotState<M>>,
    condvar: Condvar,
    notify: Notify,
}

impl<M: Clone> MetadataSlot<M> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Pending),
            condvar: Condvar::new(),
            notify: Notify::new(),
        }
    }

    /// Store the value. Returns `false` if the slot was already resolved.
    pub(crate) fn set(&self, value: M) -> bool {
        self.resolve(SlotState::Ready(value))
    }

    /// Fail the slot. Returns `false` if it was already resolved.
    pub(crate) fn fail(&self, cause: Cause) -> bool {
        self.resolve(SlotState::Failed(cause))
    }

    /// Resolve a still-pending slot as never going to arrive.
    pub(crate) fn abandon(&self) -> bool {
        self.resolve(SlotState::Missing)
    }

    fn resolve(&self, next: SlotState<M>) -> bool {
        {
            let mut state = self.state.lock();
            if !matches!(*state, SlotState::Pending) {
                debug!("metadata already resolved, ignoring");
                return false;
            }
            *state = next;
        }
        self.condvar.notify_all();
        self.notify.notify_waiters();
        true
    }

    fn snapshot(state: &SlotState<M>) -> Option<BridgeResult<M>> {
        match state {
            SlotState::Pending => None,
            SlotState::Ready(value) => Some(Ok(value.clone())),
            SlotState::Failed(cause) => Some(Err(BridgeError::Upstream(cause.clone()))),
            SlotState::Missing => Some(Err(BridgeError::MissingMetadata)),
        }
    }

    pub(crate) fn try_get(&self) -> Option<BridgeResult<M>> {
        Self::snapshot(&self.state.lock())
    }

    pub(crate) fn wait(&self, options: &BridgeOptions) -> BridgeResult<M> {
        let mut state = self.state.lock();
        loop {
            if let Some(result) = Self::snapshot(&state) {
                return result;
            }
            if options.interrupt.is_cancelled() {
                return Err(BridgeError::Interrupted(WaitPoint::Metadata));
            }
            self.condvar.wait_for(&mut state, options.poll_interval);
        }
    }

    pub(crate) async fn ready(&self) -> BridgeResult<M> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent `resolve` is not missed.
            notified.as_mut().enable();
            if let Some(result) = self.try_get() {
                return result;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::Duration};

    use tokio_util::sync::CancellationToken;

    use super::*;

    #[test]
    fn test_first_assignment_wins() {
        let slot = MetadataSlot::new();
        assert!(slot.set(1u32));
        assert!(!slot.set(2));
        assert!(!slot.fail(sluice_flow::cause(std::io::Error::other("late"))));
        assert_eq!(slot.try_get().map(Result::ok), Some(Some(1)));
    }

    #[test]
    fn test_wait_wakes_on_set() {
        let slot = Arc::new(MetadataSlot::new());
        let setter = Arc::clone(&slot);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            setter.set("etag".to_string());
        });

        let value = slot.wait(&BridgeOptions::default()).expect("metadata should arrive");
        assert_eq!(value, "etag");
        handle.join().expect("setter thread");
    }

    #[test]
    fn test_wait_reports_failure() {
        let slot: MetadataSlot<u8> = MetadataSlot::new();
        slot.fail(sluice_flow::cause(std::io::Error::other("no such key")));
        let err = slot.wait(&BridgeOptions::default()).unwrap_err();
        assert!(matches!(err, BridgeError::Upstream(ref c) if c.to_string() == "no such key"));
    }

    #[test]
    fn test_abandon_resolves_pending_slot_only() {
        let slot: MetadataSlot<u8> = MetadataSlot::new();
        assert!(slot.abandon());
        assert!(!slot.set(1));
        let err = slot.wait(&BridgeOptions::default()).unwrap_err();
        assert!(matches!(err, BridgeError::MissingMetadata));

        let ready = MetadataSlot::new();
        ready.set(3u8);
        assert!(!ready.abandon());
        assert_eq!(ready.try_get().map(Result::ok), Some(Some(3)));
    }

    #[test]
    fn test_wait_interrupted() {
        let slot: MetadataSlot<u8> = MetadataSlot::new();
        let interrupt = CancellationToken::new();
        let options = BridgeOptions::default()
            .with_interrupt(interrupt.clone())
            .with_poll_interval(Duration::from_millis(5));
        interrupt.cancel();
        let err = slot.wait(&options).unwrap_err();
        assert!(matches!(err, BridgeError::Interrupted(WaitPoint::Metadata)));
        assert!(slot.try_get().is_none());
    }

    #[tokio::test]
    async fn test_ready_resolves_from_other_thread() {
        let slot = Arc::new(MetadataSlot::new());
        let setter = Arc::clone(&slot);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            setter.set(7u64);
        });
        assert_eq!(slot.ready().await.ok(), Some(7));
    }
}
