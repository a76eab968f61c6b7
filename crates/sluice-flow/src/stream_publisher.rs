#![forbid(unsafe_code)]

use std::{error::Error, pin::pin, sync::Arc};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::{runtime::Handle, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{Cause, FlowError, Publisher, Subscriber, Subscription, cause};

/// Publishes a `futures::Stream` of byte chunks on a tokio runtime.
///
/// Chunks are pulled from the stream only while the subscriber has
/// outstanding demand, so a slow subscriber throttles the source.
pub struct StreamPublisher<S> {
    stream: S,
    handle: Handle,
}

impl<S> StreamPublisher<S> {
    /// Create a publisher that runs on `handle`.
    pub fn new(stream: S, handle: Handle) -> Self {
        Self { stream, handle }
    }

    /// Create a publisher on the ambient runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn current(stream: S) -> Self {
        Self::new(stream, Handle::current())
    }
}

impl<S, E> Publisher<Bytes> for StreamPublisher<S>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Error + Send + Sync + 'static,
{
    fn subscribe(self, mut subscriber: Box<dyn Subscriber<Bytes>>) {
        let (demand_tx, demand_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let subscription = Arc::new(StreamSubscription {
            demand_tx,
            cancel: cancel.clone(),
        });

        let stream = self.stream;
        self.handle.spawn(async move {
            subscriber.on_subscribe(subscription);
            drive(stream, subscriber, demand_rx, cancel).await;
        });
    }
}

struct StreamSubscription {
    demand_tx: mpsc::UnboundedSender<u64>,
    cancel: CancellationToken,
}

impl Subscription for StreamSubscription {
    fn request(&self, n: u64) {
        // Closed only once the driver has finished; late requests are moot.
        let _ = self.demand_tx.send(n);
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }
}

enum Grant {
    Zero,
    Stop,
}

fn on_grant(demand: &mut u64, n: Option<u64>) -> Result<(), Grant> {
    match n {
        Some(0) => Err(Grant::Zero),
        Some(n) => {
            *demand = demand.saturating_add(n);
            Ok(())
        }
        None => Err(Grant::Stop),
    }
}

async fn drive<S, E>(
    stream: S,
    mut subscriber: Box<dyn Subscriber<Bytes>>,
    mut demand_rx: mpsc::UnboundedReceiver<u64>,
    cancel: CancellationToken,
) where
    S: Stream<Item = Result<Bytes, E>> + Send,
    E: Error + Send + Sync + 'static,
{
    let mut stream = pin!(stream);
    let mut demand: u64 = 0;

    trace!("StreamPublisher started");
    loop {
        while demand == 0 {
            let grant = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("StreamPublisher cancelled while idle");
                    return;
                }
                n = demand_rx.recv() => on_grant(&mut demand, n),
            };
            match grant {
                Ok(()) => {}
                Err(Grant::Zero) => {
                    warn!("StreamPublisher received zero demand");
                    subscriber.on_error(cause(FlowError::ZeroDemand));
                    return;
                }
                Err(Grant::Stop) => {
                    debug!("StreamPublisher subscription dropped");
                    return;
                }
            }
        }

        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("StreamPublisher cancelled while fetching");
                return;
            }
            next = stream.next() => next,
        };
        if cancel.is_cancelled() {
            return;
        }

        match next {
            Some(Ok(chunk)) => {
                demand -= 1;
                trace!(len = chunk.len(), demand, "StreamPublisher emit");
                subscriber.on_next(chunk);
            }
            Some(Err(err)) => {
                debug!(error = %err, "StreamPublisher source failed");
                let err: Cause = Arc::new(err);
                subscriber.on_error(err);
                return;
            }
            None => {
                debug!("StreamPublisher source exhausted");
                subscriber.on_complete();
                return;
            }
        }

        // Fold in grants that arrived while emitting.
        while let Ok(n) = demand_rx.try_recv() {
            if let Err(Grant::Zero) = on_grant(&mut demand, Some(n)) {
                warn!("StreamPublisher received zero demand");
                subscriber.on_error(cause(FlowError::ZeroDemand));
                return;
            }
        }
    }
}
