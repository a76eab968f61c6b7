#![forbid(unsafe_code)]

//! Async publisher → blocking reader.

use std::{
    collections::VecDeque,
    fmt,
    io::{self, Read, Seek, SeekFrom},
    sync::Arc,
};

use bytes::{Buf, Bytes};
use parking_lot::{Condvar, Mutex};
use sluice_flow::{Cause, Publisher, ResponseTransformer, Subscriber, Subscription};
use tracing::{debug, trace, warn};

use crate::{BridgeError, BridgeOptions, BridgeResult, WaitPoint, metadata::MetadataSlot};

/// Element handed from the delivery callbacks to the reader.
///
/// An empty chunk is never queued; it only replenishes credit.
#[derive(Debug)]
enum Signal {
    Data(Bytes),
    End,
    Error(BridgeError),
}

enum SubscriptionSlot {
    Vacant,
    Installed(Arc<dyn Subscription>),
    Closed,
}

struct ReadState {
    subscription: SubscriptionSlot,
    /// At most one data chunk (credit window of 1) plus one terminal marker.
    queue: VecDeque<Signal>,
    /// Requested but not yet delivered.
    credit: u64,
    /// A terminal marker has been queued.
    terminated: bool,
    /// The reader has consumed the terminal marker.
    drained: bool,
}

struct Shared<M> {
    state: Mutex<ReadState>,
    condvar: Condvar,
    metadata: MetadataSlot<M>,
    options: BridgeOptions,
}

impl<M> Shared<M> {
    fn close(&self) {
        let previous = {
            let mut state = self.state.lock();
            let previous = std::mem::replace(&mut state.subscription, SubscriptionSlot::Closed);
            match previous {
                SubscriptionSlot::Installed(subscription) if !state.terminated => Some(subscription),
                SubscriptionSlot::Vacant => {
                    debug!("read bridge closed before subscription");
                    None
                }
                _ => None,
            }
        };
        self.condvar.notify_all();

        if let Some(subscription) = previous {
            debug!("read bridge closed, cancelling subscription");
            subscription.cancel();
        }
    }

    fn fail_stream(&self, err: BridgeError) {
        {
            let mut state = self.state.lock();
            if state.drained {
                debug!(error = %err, "read bridge already drained, dropping failure");
                return;
            }
            if state.terminated {
                match state.queue.back_mut() {
                    Some(last @ Signal::End) => *last = Signal::Error(err),
                    _ => debug!(error = %err, "read bridge already failed, dropping failure"),
                }
            } else {
                state.queue.push_back(Signal::Error(err));
                state.terminated = true;
            }
        }
        self.condvar.notify_all();
    }
}

/// Blocking reader over an async byte publisher.
///
/// Created together with its [`ReadSubscriber`], which is handed to the storage client.
/// The subscriber keeps a single item of demand outstanding; the next item is requested
/// only after the reader has taken the previous one.
///
/// `read` returns `Ok(0)` only after the publisher completed and every chunk was consumed.
pub struct ReadBridge<M> {
    shared: Arc<Shared<M>>,
    current: Bytes,
    finished: Option<BridgeResult<()>>,
}

impl<M> fmt::Debug for ReadBridge<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadBridge")
            .field("buffered", &self.current.len())
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl<M: Clone> ReadBridge<M> {
    pub fn new(options: BridgeOptions) -> (Self, ReadSubscriber<M>) {
        let shared = Arc::new(Shared {
            state: Mutex::new(ReadState {
                subscription: SubscriptionSlot::Vacant,
                queue: VecDeque::with_capacity(2),
                credit: 0,
                terminated: false,
                drained: false,
            }),
            condvar: Condvar::new(),
            metadata: MetadataSlot::new(),
            options,
        });
        let bridge = Self {
            shared: Arc::clone(&shared),
            current: Bytes::new(),
            finished: None,
        };
        (bridge, ReadSubscriber { shared })
    }

    /// Block until response metadata is available.
    ///
    /// # Errors
    ///
    /// `Upstream` if the transfer failed before metadata arrived, `Interrupted` if the
    /// interrupt token fired while waiting.
    pub fn metadata(&self) -> BridgeResult<M> {
        self.shared.metadata.wait(&self.shared.options)
    }

    /// Await response metadata.
    pub async fn metadata_async(&self) -> BridgeResult<M> {
        self.shared.metadata.ready().await
    }

    /// Metadata if already resolved.
    pub fn try_metadata(&self) -> Option<BridgeResult<M>> {
        self.shared.metadata.try_get()
    }
}

impl<M> ReadBridge<M> {
    /// Read a single byte. `Ok(None)` is end of stream.
    pub fn read_byte(&mut self) -> io::Result<Option<u8>> {
        if self.current.is_empty() {
            match self.next_chunk()? {
                Some(chunk) => self.current = chunk,
                None => return Ok(None),
            }
        }
        Ok(Some(self.current.get_u8()))
    }

    /// Cancel the upstream subscription. Idempotent.
    ///
    /// If no subscription has arrived yet, it is cancelled the moment it does.
    pub fn close(&self) {
        self.shared.close();
    }

    fn next_chunk(&mut self) -> BridgeResult<Option<Bytes>> {
        if let Some(finished) = &self.finished {
            return finished.clone().map(|()| None);
        }

        let shared = &self.shared;
        let (signal, replenish) = {
            let mut state = shared.state.lock();
            loop {
                if let Some(signal) = state.queue.pop_front() {
                    let replenish = match (&signal, &state.subscription) {
                        (Signal::Data(_), SubscriptionSlot::Installed(subscription)) => {
                            Some(Arc::clone(subscription))
                        }
                        _ => None,
                    };
                    if replenish.is_some() {
                        state.credit += 1;
                    }
                    if !matches!(signal, Signal::Data(_)) {
                        state.drained = true;
                    }
                    break (signal, replenish);
                }
                if matches!(state.subscription, SubscriptionSlot::Closed) {
                    return Err(BridgeError::Closed);
                }
                if shared.options.interrupt.is_cancelled() {
                    return Err(BridgeError::Interrupted(WaitPoint::Data));
                }
                shared
                    .condvar
                    .wait_for(&mut state, shared.options.poll_interval);
            }
        };

        // Outside the lock: a publisher may deliver the next item from inside `request`.
        if let Some(subscription) = replenish {
            trace!("read bridge requesting next chunk");
            subscription.request(1);
        }

        match signal {
            Signal::Data(chunk) => Ok(Some(chunk)),
            Signal::End => {
                debug!("read bridge reached end of stream");
                self.finished = Some(Ok(()));
                Ok(None)
            }
            Signal::Error(err) => {
                debug!(error = %err, "read bridge failed");
                self.finished = Some(Err(err.clone()));
                Err(err)
            }
        }
    }
}

impl<M: Send + 'static> ReadBridge<M> {
    /// Handle that closes this bridge from another thread.
    pub fn closer(&self) -> ReadCloser {
        ReadCloser {
            shared: Arc::clone(&self.shared) as Arc<dyn CloseTarget>,
        }
    }
}

impl<M> Read for ReadBridge<M> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        if self.current.is_empty() {
            match self.next_chunk()? {
                Some(chunk) => self.current = chunk,
                None => return Ok(0),
            }
        }

        let to_copy = self.current.len().min(buf.len());
        buf[..to_copy].copy_from_slice(&self.current[..to_copy]);
        self.current.advance(to_copy);
        Ok(to_copy)
    }
}

impl<M> Seek for ReadBridge<M> {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "seek is not supported on a read bridge",
        ))
    }
}

impl<M> Drop for ReadBridge<M> {
    fn drop(&mut self) {
        self.shared.close();
    }
}

trait CloseTarget: Send + Sync {
    fn close(&self);
}

impl<M: Send> CloseTarget for Shared<M> {
    fn close(&self) {
        Shared::close(self);
    }
}

/// Cloneable handle that closes a [`ReadBridge`].
#[derive(Clone)]
pub struct ReadCloser {
    shared: Arc<dyn CloseTarget>,
}

impl fmt::Debug for ReadCloser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadCloser").finish_non_exhaustive()
    }
}

impl ReadCloser {
    pub fn close(&self) {
        self.shared.close();
    }
}

/// Subscriber role of a [`ReadBridge`], driven by the storage client.
pub struct ReadSubscriber<M> {
    shared: Arc<Shared<M>>,
}

impl<M> Clone for ReadSubscriber<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M> fmt::Debug for ReadSubscriber<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadSubscriber").finish_non_exhaustive()
    }
}

impl<M: Clone> ReadSubscriber<M> {
    /// Publish response metadata to the reader.
    pub fn on_metadata(&self, metadata: M) {
        if self.shared.metadata.set(metadata) {
            trace!("read bridge metadata ready");
        }
    }

    /// Report a transfer failure outside the byte stream.
    ///
    /// Fails the metadata handle if it is still pending, and the byte stream unless the
    /// reader already saw its end.
    pub fn on_failure(&self, cause: Cause) {
        if self.shared.metadata.fail(Arc::clone(&cause)) {
            debug!(error = %cause, "read bridge failed before metadata");
        }
        self.shared.fail_stream(BridgeError::Upstream(cause));
    }
}

impl<M: Clone + Send + 'static> Subscriber<Bytes> for ReadSubscriber<M> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        let accepted = {
            let mut state = self.shared.state.lock();
            match state.subscription {
                SubscriptionSlot::Vacant => {
                    state.subscription = SubscriptionSlot::Installed(Arc::clone(&subscription));
                    state.credit = 1;
                    true
                }
                SubscriptionSlot::Closed => {
                    debug!("read bridge already closed, cancelling new subscription");
                    false
                }
                SubscriptionSlot::Installed(_) => {
                    warn!("read bridge already subscribed, cancelling duplicate subscription");
                    false
                }
            }
        };

        if accepted {
            trace!("read bridge subscribed, requesting first chunk");
            subscription.request(1);
        } else {
            subscription.cancel();
        }
    }

    fn on_next(&mut self, chunk: Bytes) {
        let mut replenish = None;
        let mut violation = None;
        {
            let mut state = self.shared.state.lock();
            let subscription = match &state.subscription {
                SubscriptionSlot::Installed(subscription) if !state.terminated => {
                    Arc::clone(subscription)
                }
                _ => {
                    debug!(len = chunk.len(), "read bridge not accepting data, dropping chunk");
                    return;
                }
            };

            if state.credit == 0 {
                warn!(len = chunk.len(), "publisher exceeded demand, cancelling");
                state.subscription = SubscriptionSlot::Closed;
                state.queue.push_back(Signal::Error(BridgeError::DemandExceeded));
                state.terminated = true;
                violation = Some(subscription);
            } else if chunk.is_empty() {
                trace!("read bridge skipping empty chunk");
                replenish = Some(subscription);
            } else {
                state.credit -= 1;
                trace!(len = chunk.len(), "read bridge queued chunk");
                state.queue.push_back(Signal::Data(chunk));
            }
        }
        self.shared.condvar.notify_all();

        if let Some(subscription) = replenish {
            subscription.request(1);
        }
        if let Some(subscription) = violation {
            subscription.cancel();
        }
    }

    fn on_error(&mut self, cause: Cause) {
        debug!(error = %cause, "read bridge upstream error");
        if self.shared.metadata.fail(Arc::clone(&cause)) {
            debug!("read bridge failed before metadata");
        }
        self.shared.fail_stream(BridgeError::Upstream(cause));
    }

    fn on_complete(&mut self) {
        if self.shared.metadata.abandon() {
            debug!("read bridge completed without metadata");
        }
        {
            let mut state = self.shared.state.lock();
            if state.terminated {
                debug!("read bridge already terminated, ignoring completion");
                return;
            }
            state.queue.push_back(Signal::End);
            state.terminated = true;
        }
        trace!("read bridge upstream complete");
        self.shared.condvar.notify_all();
    }
}

impl<M: Clone + Send + 'static> ResponseTransformer<M> for ReadSubscriber<M> {
    fn on_response(&mut self, metadata: M) {
        self.on_metadata(metadata);
    }

    fn on_stream<P>(&mut self, publisher: P)
    where
        P: Publisher<Bytes>,
    {
        publisher.subscribe(Box::new(self.clone()));
    }

    fn exception_occurred(&mut self, cause: Cause) {
        self.on_failure(cause);
    }
}
