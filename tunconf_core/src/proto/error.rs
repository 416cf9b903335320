//! Error types for the configuration wire format.

use thiserror::Error;

use super::layout::AddressFamily;

/// Result type for encode and decode operations.
pub type ProtoResult<T> = Result<T, ProtoError>;

/// Errors raised while laying out or walking a configuration buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtoError {
    /// A record read would run past the declared end of the buffer
    #[error("Truncated buffer: record at offset {offset} needs {needed} bytes, {available} available")]
    TruncatedBuffer {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// A declared sub-record count does not fit in the bytes that remain
    #[error("Inconsistent {record} count at offset {offset}: {count} records declared, {remaining} bytes remain")]
    InconsistentCounts {
        record: &'static str,
        offset: usize,
        count: u64,
        remaining: usize,
    },

    /// Socket or allowed-IP address family the protocol does not define
    #[error("Unknown address family {family} at offset {offset}")]
    UnknownAddressFamily { offset: usize, family: u16 },

    /// CIDR prefix longer than the address it applies to
    #[error("Invalid prefix length /{cidr} for {family}")]
    InvalidPrefixLength { family: AddressFamily, cidr: u8 },

    /// Peer flags that request mutually exclusive operations
    #[error("Contradictory peer flags 0x{flags:08X} at offset {offset}")]
    ContradictoryFlags { offset: usize, flags: u32 },

    /// Peer record without the public key that identifies it
    #[error("Peer record at offset {offset} carries no public key")]
    MissingPublicKey { offset: usize },

    /// More records than a 32-bit count field can describe
    #[error("Too many {what}: {count} does not fit in a 32-bit count")]
    CountOverflow { what: &'static str, count: usize },

    /// Assembled buffer longer than the driver call can describe
    #[error("Configuration buffer too large: {0} bytes")]
    BufferTooLarge(usize),
}
