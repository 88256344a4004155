//! Error types shared across the crate.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Error type produced by caller-supplied actions and factories.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A fault kept for later propagation. Faults are logged once by the loop
/// that observed them and may additionally be handed to every caller
/// awaiting the run that failed, hence the reference count.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// A bridged wait was cancelled through its cancellation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("wait cancelled")]
pub struct Cancelled;

/// Errors returned by [`CountdownLatch`](crate::sync::CountdownLatch)
/// operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LatchError {
    /// The latch has been closed; no further operations are accepted.
    #[error("countdown latch has been closed")]
    Closed,
    /// A signal drove the count below zero.
    #[error("countdown latch count cannot drop below zero")]
    Underflow,
    /// An increment would overflow the count.
    #[error("countdown latch count cannot grow past i64::MAX")]
    Overflow,
    /// The wait was cancelled through its cancellation token.
    #[error("countdown latch wait cancelled")]
    Cancelled,
}

impl From<Cancelled> for LatchError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

/// Errors returned by [`RenewableValue::value`](crate::renew::RenewableValue::value).
#[derive(Debug, Clone)]
pub enum RenewError {
    /// The background loop is gone and no completed run can satisfy the read.
    Shutdown,
    /// The awaited run failed; carries the factory's error.
    Faulted(SharedError),
}

impl fmt::Display for RenewError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shutdown => write!(f, "renewable value has been shut down"),
            Self::Faulted(err) => write!(f, "renew run failed: {err}"),
        }
    }
}

impl std::error::Error for RenewError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Shutdown => None,
            Self::Faulted(err) => Some(&**err),
        }
    }
}
