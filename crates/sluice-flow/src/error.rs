#![forbid(unsafe_code)]

use std::{error::Error, sync::Arc};

use thiserror::Error;

/// Failure cause carried by `on_error`.
///
/// Shared rather than boxed: a stored failure is reported on every later call.
pub type Cause = Arc<dyn Error + Send + Sync + 'static>;

/// Wrap any error as a [`Cause`].
pub fn cause<E>(err: E) -> Cause
where
    E: Error + Send + Sync + 'static,
{
    Arc::new(err)
}

/// Protocol violations detected by the adapters in this crate.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowError {
    #[error("subscriber requested zero items")]
    ZeroDemand,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(FlowError::ZeroDemand.to_string(), "subscriber requested zero items");
    }

    #[test]
    fn test_cause_keeps_message() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "peer reset");
        let c = cause(io_err);
        let copy = Arc::clone(&c);
        assert_eq!(copy.to_string(), "peer reset");
    }
}
