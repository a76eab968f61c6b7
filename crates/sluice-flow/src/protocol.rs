#![forbid(unsafe_code)]

use std::sync::Arc;

use bytes::Bytes;

use crate::Cause;

/// Consumer-held control handle for a single stream.
///
/// Callable from any thread. `request` is additive; `cancel` is idempotent.
pub trait Subscription: Send + Sync {
    /// Grant `n` more items of demand.
    fn request(&self, n: u64);

    /// Stop delivery. Items already dispatched may still arrive.
    fn cancel(&self);
}

/// Receiving side of the protocol.
///
/// Signals are serialized by the publisher, hence `&mut self`.
pub trait Subscriber<T>: Send {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>);

    fn on_next(&mut self, item: T);

    fn on_error(&mut self, cause: Cause);

    fn on_complete(&mut self);
}

impl<T, S: Subscriber<T> + ?Sized> Subscriber<T> for Box<S> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        (**self).on_subscribe(subscription);
    }

    fn on_next(&mut self, item: T) {
        (**self).on_next(item);
    }

    fn on_error(&mut self, cause: Cause) {
        (**self).on_error(cause);
    }

    fn on_complete(&mut self) {
        (**self).on_complete();
    }
}

/// Producing side of the protocol.
///
/// Consumes `self`: a publisher serves one transfer to one subscriber.
pub trait Publisher<T> {
    fn subscribe(self, subscriber: Box<dyn Subscriber<T>>);
}

/// Upload body handed to a storage client.
pub trait RequestBody: Publisher<Bytes> {
    /// Total number of bytes the body will produce, if known up front.
    fn content_length(&self) -> Option<u64>;
}

/// Download callback surface a storage client drives.
///
/// Call order: `on_response` once, then `on_stream` once. `exception_occurred`
/// may arrive at any point when the transfer fails outside the byte stream.
pub trait ResponseTransformer<M> {
    /// Response metadata (headers) is available.
    fn on_response(&mut self, metadata: M);

    /// The body stream is ready to be subscribed.
    fn on_stream<P>(&mut self, publisher: P)
    where
        P: Publisher<Bytes>;

    /// The transfer failed outside the body stream.
    fn exception_occurred(&mut self, cause: Cause);
}
