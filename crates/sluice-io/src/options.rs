#![forbid(unsafe_code)]

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Options shared by both bridges.
#[derive(Clone, Debug)]
pub struct BridgeOptions {
    /// Interrupts blocking waits on the caller thread.
    ///
    /// Cancelling the token fails the blocked call with `BridgeError::Interrupted`.
    /// It does not cancel the stream itself; call `close()` for that.
    pub interrupt: CancellationToken,

    /// How often a blocked call re-checks `interrupt`.
    pub poll_interval: Duration,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            interrupt: CancellationToken::new(),
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl BridgeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the token that interrupts blocking waits.
    pub fn with_interrupt(mut self, interrupt: CancellationToken) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Set the interrupt re-check interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}
