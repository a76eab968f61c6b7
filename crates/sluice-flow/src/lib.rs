//! `sluice-flow`
//!
//! Demand-driven push protocol shared by the sluice bridges.
//!
//! A [`Publisher`] hands each [`Subscriber`] a [`Subscription`]; the subscriber
//! grants credit with [`Subscription::request`] and the publisher never emits
//! more items than it has been granted.
//!
//! ## Signal contract (normative)
//!
//! - `on_subscribe` is delivered exactly once, before any other signal.
//! - Zero or more `on_next` follow, never more than the cumulative demand.
//! - At most one terminal signal (`on_error` xor `on_complete`) ends the stream.
//!   Nothing is delivered after it.
//! - `cancel` is idempotent. Items already in flight may still arrive.
//!
//! ## Runtime adapters
//!
//! - [`StreamPublisher`]: drives a `futures::Stream` of byte chunks as a publisher on tokio.
//! - [`PublisherStream`]: exposes any byte publisher as a `futures::Stream`.

#![forbid(unsafe_code)]

mod error;
mod protocol;
mod publisher_stream;
mod stream_publisher;

pub use error::{Cause, FlowError, cause};
pub use protocol::{Publisher, RequestBody, ResponseTransformer, Subscriber, Subscription};
pub use publisher_stream::PublisherStream;
pub use stream_publisher::StreamPublisher;
