#![forbid(unsafe_code)]

//! Shared test utilities for the sluice workspace.

mod publisher;
mod subscriber;
mod subscription;

pub use publisher::{Joiner, ScriptedPublisher, Step};
pub use subscriber::{Event, RecordingSubscriber, Recorded};
pub use subscription::RecordingSubscription;

/// Install a test-friendly tracing subscriber once per process.
///
/// Honours `RUST_LOG`; defaults to `info`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

/// Simple test error carrying a message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TestError(pub String);

/// Build a failure cause with the given message.
pub fn test_cause(msg: &str) -> sluice_flow::Cause {
    sluice_flow::cause(TestError(msg.to_string()))
}
