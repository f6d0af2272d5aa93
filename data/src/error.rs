// Copyright (c) 2024 Botho Foundation

//! Error types for wire decoding.

use displaydoc::Display;
use thiserror::Error;

/// Errors that can occur while decoding wire structures.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum DataError {
    /// Truncated input: needed {needed} bytes, {available} available
    Truncated { needed: usize, available: usize },

    /// Unknown I2NP message type: {0}
    UnknownMessageType(u8),

    /// Invalid delivery mode: {0}
    InvalidDeliveryMode(u8),

    /// Checksum mismatch for message {0}
    ChecksumMismatch(u32),

    /// Declared size {declared} does not match available body of {actual} bytes
    SizeMismatch { declared: usize, actual: usize },

    /// Payload too large: {0} bytes
    PayloadTooLarge(usize),

    /// Lease set has {0} leases, at most 16 are allowed
    TooManyLeases(usize),

    /// Invalid key material
    InvalidKey,
}

/// Result alias for wire decoding.
pub type DataResult<T> = Result<T, DataError>;

/// Fail with [`DataError::Truncated`] unless `buf` holds at least `needed`
/// more bytes.
pub(crate) fn ensure_remaining(buf: &impl bytes::Buf, needed: usize) -> DataResult<()> {
    let available = buf.remaining();
    if available < needed {
        return Err(DataError::Truncated { needed, available });
    }
    Ok(())
}
