#![forbid(unsafe_code)]

//! Blocking writer → async subscriber.

use std::{
    fmt,
    io::{self, Write},
    sync::{Arc, Weak},
};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use sluice_flow::{Publisher, RequestBody, Subscriber, Subscription, cause};
use tracing::{debug, trace, warn};

use crate::{BridgeError, BridgeOptions, BridgeResult, WaitPoint};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Finish {
    Complete,
    Abandoned,
}

#[derive(Debug, Default)]
struct WriteState {
    /// Items granted by the subscriber and not yet pushed.
    demand: u64,
    cancelled: bool,
    finish: Option<Finish>,
}

enum Downstream {
    Waiting,
    Attached(Box<dyn Subscriber<Bytes>>),
    Done,
}

struct Shared {
    state: Mutex<WriteState>,
    condvar: Condvar,
    /// Held while signalling so `on_next`/`on_complete` stay serialized.
    downstream: Mutex<Downstream>,
    options: BridgeOptions,
}

impl Shared {
    /// Deliver the terminal signal, or leave it for `subscribe` if no subscriber yet.
    fn finish(&self, finish: Finish) {
        let cancelled = {
            let mut state = self.state.lock();
            state.finish = Some(finish);
            state.cancelled
        };
        self.condvar.notify_all();

        let mut downstream = self.downstream.lock();
        if matches!(*downstream, Downstream::Waiting) {
            trace!(?finish, "write bridge finished before subscription");
            return;
        }
        if let Downstream::Attached(mut subscriber) =
            std::mem::replace(&mut *downstream, Downstream::Done)
        {
            if !cancelled {
                signal_finish(subscriber.as_mut(), finish);
            }
        }
    }
}

fn signal_finish(subscriber: &mut dyn Subscriber<Bytes>, finish: Finish) {
    match finish {
        Finish::Complete => {
            debug!("write bridge complete");
            subscriber.on_complete();
        }
        Finish::Abandoned => {
            warn!("write bridge dropped before close");
            subscriber.on_error(cause(BridgeError::Abandoned));
        }
    }
}

/// Blocking writer feeding an async subscriber.
///
/// Every non-empty `write` call is pushed downstream as exactly one item, and only
/// after the subscriber has granted credit for it. A write with no credit blocks.
pub struct WriteBridge {
    shared: Arc<Shared>,
    content_length: u64,
    written: u64,
    closed: bool,
}

impl fmt::Debug for WriteBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteBridge")
            .field("content_length", &self.content_length)
            .field("written", &self.written)
            .field("closed", &self.closed)
            .field("state", &*self.shared.state.lock())
            .finish()
    }
}

impl WriteBridge {
    /// Create a bridge for a body of exactly `content_length` bytes.
    ///
    /// The returned [`WriteBody`] is handed to the storage client as the request body.
    pub fn new(content_length: u64, options: BridgeOptions) -> (Self, WriteBody) {
        let shared = Arc::new(Shared {
            state: Mutex::new(WriteState::default()),
            condvar: Condvar::new(),
            downstream: Mutex::new(Downstream::Waiting),
            options,
        });
        let bridge = Self {
            shared: Arc::clone(&shared),
            content_length,
            written: 0,
            closed: false,
        };
        (
            bridge,
            WriteBody {
                shared,
                content_length,
            },
        )
    }

    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    /// Bytes pushed downstream so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Credit granted by the subscriber and not yet used.
    pub fn outstanding_demand(&self) -> u64 {
        self.shared.state.lock().demand
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.state.lock().cancelled
    }

    /// Push a single one-byte item.
    ///
    /// # Errors
    ///
    /// Same as [`WriteBridge::push`].
    pub fn write_byte(&mut self, byte: u8) -> BridgeResult<()> {
        self.push(Bytes::copy_from_slice(&[byte]))
    }

    /// Push `item` downstream as one item, blocking until credit is available.
    ///
    /// # Errors
    ///
    /// - `Closed` after [`WriteBridge::close`].
    /// - `Cancelled` if the subscriber cancelled, before or while waiting.
    /// - `Interrupted` if the interrupt token fired while waiting for credit.
    pub fn push(&mut self, item: Bytes) -> BridgeResult<()> {
        if self.closed {
            return Err(BridgeError::Closed);
        }

        self.acquire_credit()?;

        let len = item.len();
        {
            let mut downstream = self.shared.downstream.lock();
            let Downstream::Attached(subscriber) = &mut *downstream else {
                // Credit only exists once a subscriber attached; losing it means cancellation.
                return Err(BridgeError::Cancelled);
            };
            subscriber.on_next(item);
        }
        self.written += len as u64;
        trace!(len, written = self.written, "write bridge pushed item");
        Ok(())
    }

    fn acquire_credit(&self) -> BridgeResult<()> {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        loop {
            if state.cancelled {
                return Err(BridgeError::Cancelled);
            }
            if state.demand > 0 {
                state.demand -= 1;
                return Ok(());
            }
            if shared.options.interrupt.is_cancelled() {
                return Err(BridgeError::Interrupted(WaitPoint::Demand));
            }
            shared
                .condvar
                .wait_for(&mut state, shared.options.poll_interval);
        }
    }

    /// Signal completion downstream. No writes are accepted afterwards.
    ///
    /// Idempotent. If the subscriber has not attached yet, it receives completion right
    /// after subscribing.
    ///
    /// # Errors
    ///
    /// `Cancelled` if the subscriber cancelled; no completion is sent in that case.
    pub fn close(&mut self) -> BridgeResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if self.written != self.content_length {
            warn!(
                written = self.written,
                content_length = self.content_length,
                "write bridge closed with length mismatch"
            );
        }

        self.shared.finish(Finish::Complete);
        if self.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }
        Ok(())
    }
}

impl Write for WriteBridge {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.push(Bytes::copy_from_slice(buf))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for WriteBridge {
    fn drop(&mut self) {
        if !self.closed {
            self.shared.finish(Finish::Abandoned);
        }
    }
}

/// Publisher role of a [`WriteBridge`]: the request body handed to the storage client.
pub struct WriteBody {
    shared: Arc<Shared>,
    content_length: u64,
}

impl fmt::Debug for WriteBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteBody")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

impl Publisher<Bytes> for WriteBody {
    fn subscribe(self, mut subscriber: Box<dyn Subscriber<Bytes>>) {
        let subscription = Arc::new(WriteSubscription {
            shared: Arc::downgrade(&self.shared),
        });

        // Held across `on_subscribe`: a writer granted credit from inside it must not
        // push before the subscriber is attached.
        let mut downstream = self.shared.downstream.lock();
        debug!(content_length = self.content_length, "write bridge subscribed");
        subscriber.on_subscribe(subscription);

        let (cancelled, finish) = {
            let state = self.shared.state.lock();
            (state.cancelled, state.finish)
        };
        *downstream = match (cancelled, finish) {
            (true, _) => Downstream::Done,
            (false, Some(finish)) => {
                signal_finish(subscriber.as_mut(), finish);
                Downstream::Done
            }
            (false, None) => Downstream::Attached(subscriber),
        };
        drop(downstream);
        self.shared.condvar.notify_all();
    }
}

impl RequestBody for WriteBody {
    fn content_length(&self) -> Option<u64> {
        Some(self.content_length)
    }
}

struct WriteSubscription {
    shared: Weak<Shared>,
}

impl Subscription for WriteSubscription {
    fn request(&self, n: u64) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        if n == 0 {
            warn!("write bridge ignoring request for zero items");
            return;
        }
        {
            let mut state = shared.state.lock();
            if state.cancelled {
                return;
            }
            state.demand = state.demand.saturating_add(n);
            trace!(n, demand = state.demand, "write bridge demand granted");
        }
        shared.condvar.notify_all();
    }

    fn cancel(&self) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        {
            let mut state = shared.state.lock();
            if state.cancelled {
                return;
            }
            state.cancelled = true;
            state.demand = 0;
        }
        debug!("write bridge cancelled by subscriber");
        shared.condvar.notify_all();
    }
}
