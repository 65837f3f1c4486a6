//! Wire protocol error types.

use thiserror::Error;

/// Wire encoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Incomplete packet (need more data)
    #[error("incomplete packet")]
    Incomplete,

    /// Unsupported protocol version
    #[error("version unsupported: {0}")]
    Version(u8),

    /// Unknown message type
    #[error("unknown type {0}")]
    Type(u8),

    /// Size limit exceeded
    #[error("size limit exceeded: {0}")]
    Size(usize),

    /// Malformed packet structure
    #[error("malformed packet")]
    Malformed,

    /// Invalid CBOR payload
    #[error("cbor payload invalid: {0}")]
    Payload(String),
}

/// Freshness and replay failures raised by packet validation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Header version differs from [`crate::WIRE_VERSION`]
    #[error("unsupported version {0}")]
    UnsupportedVersion(u8),

    /// Counter not above the last accepted one for this sender
    #[error("replayed counter {counter} (last seen {last_seen})")]
    Replay {
        /// Counter carried by the packet
        counter: u32,
        /// Highest counter accepted so far
        last_seen: u32,
    },

    /// Timestamp outside the tolerated window
    #[error("clock skew of {skew_secs}s exceeds tolerance")]
    ClockSkew {
        /// Absolute difference between now and the packet timestamp
        skew_secs: u64,
    },
}
