//! # Sluice I/O Bridge
//!
//! Blocking `std::io` adapters over the demand-driven push protocol from `sluice-flow`.
//! A storage client drives one side from its I/O threads; the caller drives the other with
//! ordinary blocking calls.
//!
//! ## Core Components
//!
//! - `ReadBridge` + `ReadSubscriber`: async publisher → blocking `Read`
//! - `WriteBridge` + `WriteBody`: blocking `Write` → async subscriber
//!
//! ## EOF Semantics (Normative)
//!
//! `Read::read()` returns `Ok(0)` **only** after the publisher signalled completion and every
//! chunk was consumed. An empty chunk from the publisher is never observed by the reader.
//! After EOF every read returns `Ok(0)`; after a failure every read fails the same way.
//!
//! ## Backpressure
//!
//! - Read side keeps exactly one item of demand outstanding. The next item is requested
//!   when the reader takes the previous one, so at most one chunk is buffered.
//! - Write side pushes one item per `write` call and never more than the subscriber granted.
//!
//! ## Interruption
//!
//! Blocking calls never time out on their own. Cancel `BridgeOptions::interrupt` to fail
//! a blocked call with `BridgeError::Interrupted`.

#![forbid(unsafe_code)]

mod error;
mod metadata;
mod options;
mod read;
mod write;

pub use error::{BridgeError, BridgeResult, WaitPoint};
pub use options::BridgeOptions;
pub use read::{ReadBridge, ReadCloser, ReadSubscriber};
pub use write::{WriteBody, WriteBridge};
