#![forbid(unsafe_code)]

use std::{fmt, io};

use sluice_flow::Cause;
use thiserror::Error;

/// Where a blocking call was parked when it was interrupted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitPoint {
    Metadata,
    Data,
    Demand,
}

impl fmt::Display for WaitPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Metadata => "response metadata",
            Self::Data => "stream data",
            Self::Demand => "downstream demand",
        })
    }
}

/// Errors surfaced to the thread driving a bridge.
///
/// Notes:
/// - `Upstream` is reported on the next blocking read after the publisher failed, and on
///   every read after that.
/// - `Cancelled` means the downstream consumer cancelled; it is distinct from an upstream failure.
#[derive(Clone, Debug, Error)]
pub enum BridgeError {
    #[error("interrupted while waiting for {0}")]
    Interrupted(WaitPoint),

    #[error("could not read response: {0}")]
    Upstream(#[source] Cause),

    #[error("stream cancelled during write")]
    Cancelled,

    #[error("stream already closed")]
    Closed,

    #[error("publisher delivered more items than requested")]
    DemandExceeded,

    #[error("writer dropped before close")]
    Abandoned,

    #[error("stream ended without response metadata")]
    MissingMetadata,
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

impl From<BridgeError> for io::Error {
    fn from(err: BridgeError) -> Self {
        // Never `ErrorKind::Interrupted`: `read_to_end` and `write_all` retry that kind.
        let kind = match &err {
            BridgeError::Interrupted(_) | BridgeError::Upstream(_)
            | BridgeError::DemandExceeded
            | BridgeError::MissingMetadata => io::ErrorKind::Other,
            BridgeError::Cancelled | BridgeError::Closed | BridgeError::Abandoned => {
                io::ErrorKind::BrokenPipe
            }
        };
        Self::new(kind, err)
    }
}
