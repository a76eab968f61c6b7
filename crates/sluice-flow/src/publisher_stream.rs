#![forbid(unsafe_code)]

use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::{Cause, Publisher, Subscriber, Subscription};

enum Signal {
    Subscribed(Arc<dyn Subscription>),
    Next(Bytes),
    Error(Cause),
    Complete,
}

struct Forwarder {
    tx: mpsc::UnboundedSender<Signal>,
}

impl Forwarder {
    fn forward(&self, signal: Signal) {
        // Receiver gone means the stream was dropped and the subscription cancelled.
        let _ = self.tx.send(signal);
    }
}

impl Subscriber<Bytes> for Forwarder {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        self.forward(Signal::Subscribed(subscription));
    }

    fn on_next(&mut self, item: Bytes) {
        self.forward(Signal::Next(item));
    }

    fn on_error(&mut self, cause: Cause) {
        self.forward(Signal::Error(cause));
    }

    fn on_complete(&mut self) {
        self.forward(Signal::Complete);
    }
}

/// Pull-based view of a byte publisher.
///
/// Requests one item at a time, only when polled with nothing buffered.
/// Dropping the stream before the publisher terminates cancels the subscription.
pub struct PublisherStream {
    rx: mpsc::UnboundedReceiver<Signal>,
    subscription: Option<Arc<dyn Subscription>>,
    requested: bool,
    done: bool,
}

impl PublisherStream {
    /// Subscribe to `publisher`.
    pub fn new<P: Publisher<Bytes>>(publisher: P) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        publisher.subscribe(Box::new(Forwarder { tx }));
        Self {
            rx,
            subscription: None,
            requested: false,
            done: false,
        }
    }
}

impl Stream for PublisherStream {
    type Item = Result<Bytes, Cause>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.done {
            return Poll::Ready(None);
        }

        loop {
            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(Signal::Subscribed(subscription))) => {
                    trace!("PublisherStream subscribed");
                    this.subscription = Some(subscription);
                }
                Poll::Ready(Some(Signal::Next(chunk))) => {
                    this.requested = false;
                    return Poll::Ready(Some(Ok(chunk)));
                }
                Poll::Ready(Some(Signal::Error(cause))) => {
                    debug!(error = %cause, "PublisherStream failed");
                    this.done = true;
                    return Poll::Ready(Some(Err(cause)));
                }
                Poll::Ready(Some(Signal::Complete)) | Poll::Ready(None) => {
                    trace!("PublisherStream complete");
                    this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => {
                    if this.requested {
                        return Poll::Pending;
                    }
                    let Some(subscription) = this.subscription.as_ref() else {
                        return Poll::Pending;
                    };
                    this.requested = true;
                    // The publisher may answer synchronously; poll again.
                    subscription.request(1);
                }
            }
        }
    }
}

impl Drop for PublisherStream {
    fn drop(&mut self) {
        if !self.done
            && let Some(subscription) = self.subscription.take()
        {
            debug!("PublisherStream dropped early, cancelling");
            subscription.cancel();
        }
    }
}
