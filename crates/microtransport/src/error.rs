//! Error types for every fallible surface in the crate.
//!
//! Decode-time and CRC errors are always local: a lossy carrier is assumed,
//! so bad frames are logged and discarded rather than propagated. Timeout
//! errors are always surfaced — they mean the peer is unreachable.

use thiserror::Error;

/// Errors from [`crate::wire`] header encoding/decoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("header truncated: need {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    #[error("malformed flags: {0:#x}")]
    MalformedFlags(u8),
    #[error("FRAG flag set without fragment fields")]
    MissingFragmentFields,
}

/// Errors from [`crate::datagram`].
#[derive(Debug, Error)]
pub enum DatagramError {
    #[error(transparent)]
    Header(#[from] HeaderError),
    #[error("fragment header missing its extension fields")]
    Fragmentation,
}

/// Errors from [`crate::reliable`].
#[derive(Debug, Error)]
pub enum ReliableError {
    #[error(transparent)]
    Header(#[from] HeaderError),
    #[error("no SYN|ACK within the connect timeout")]
    ConnectionTimeout,
    #[error("no ACK within the send timeout")]
    SendTimeout,
    #[error("no FIN|ACK within the close timeout")]
    CloseTimeout,
    #[error("channel {0} is not established")]
    NotEstablished(u16),
}

/// Errors from [`crate::carrier`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CarrierError {
    #[error("encrypted payload would exceed the carrier MTU")]
    PayloadTooLarge,
    #[error("CRC16 mismatch on decrypted payload")]
    CrcMismatch,
    #[error("frame missing the expected sigil")]
    MissingSigil,
    #[error("frame too short to contain a sequence and body")]
    Truncated,
    #[error("invalid base64url body")]
    InvalidEncoding,
    #[error("AEAD open/seal failed")]
    CryptoFailure,
    #[error("nonce space for this key is exhausted; rotate the key")]
    KeyExhausted,
}
