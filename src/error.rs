//! Error values surfaced by the stack. Decode failures are ordinary values
//! carried by RX-END indications, never panics.

use thiserror::Error;

/// A received PPDU that could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// SIGNAL parity check failed or the RATE bits name no known MCS.
    #[error("SIGNAL format violation")]
    FormatViolation,
    /// No scrambler seed in 1..=127 reproduces the received SERVICE field.
    #[error("scrambler seed not found")]
    ScrambleSeedNotFound,
}

/// Failure on one of the TCP links between components.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("link i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed wire message: {0}")]
    Malformed(#[from] serde_json::Error),
    /// A message decoded to JSON but its `DATA` did not fit the primitive.
    #[error("wire message data does not fit primitive {0:?}")]
    BadData(String),
    #[error("peer closed the connection")]
    Closed,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A request the stack refuses instead of silently correcting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// PSDU length must fit the 12-bit LENGTH field and be non-empty.
    #[error("PSDU length {0} outside 1..=4095 octets")]
    LengthOutOfRange(usize),
    #[error("rate {0} Mb/s is not in the MCS table")]
    InvalidRate(u64),
    /// Data was submitted before any peer associated.
    #[error("no associated peer")]
    NotAssociated,
    #[error("channel impulse response must not be empty")]
    EmptyImpulseResponse,
}
