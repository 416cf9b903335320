//! Error types for the driver adapter.

use std::io;
use thiserror::Error;

use crate::proto::ProtoError;

/// Result type for adapter operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// Failure reported by the privileged exchange call.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// The output buffer cannot hold the configuration; `required` bytes would
    #[error("Buffer too small: driver requires {required} bytes")]
    BufferTooSmall { required: u32 },

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Invalid adapter handle")]
    InvalidHandle,

    #[error("I/O error: {0}")]
    Os(#[from] io::Error),

    #[error("Driver error: {0}")]
    Driver(String),
}

/// Errors surfaced by [`super::Adapter`].
#[derive(Debug, Error)]
pub enum DriverError {
    /// The buffer could not be encoded or the driver returned one that does
    /// not decode
    #[error("Protocol error: {0}")]
    Proto(#[from] ProtoError),

    /// The exchange call failed with a non-retryable error
    #[error("Exchange failed: {0}")]
    Exchange(#[from] ExchangeError),

    /// The driver kept asking for a bigger buffer
    #[error("Gave up after {attempts} attempts, last buffer size {last_size} bytes")]
    RetryLimitExceeded { attempts: u32, last_size: usize },

    /// The driver asked for a buffer above the configured limit
    #[error("Driver requires {required} bytes, limit is {limit}")]
    SizeLimitExceeded { required: usize, limit: usize },
}
