// Copyright (c) 2024 Botho Foundation

use crate::crypto::EngineError;
use alm_data::DataError;
use thiserror::Error;

/// Errors building or opening garlic messages.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GarlicError {
    /// A garlic node has no public key to encrypt to.
    #[error("garlic {0} has no recipient public key")]
    MissingRecipientKey(u32),

    /// The root config carries a payload instead of cloves.
    #[error("garlic {0} has no cloves")]
    NoCloves(u32),

    /// More cloves than fit the one-byte count.
    #[error("too many cloves: {0}")]
    TooManyCloves(usize),

    /// Nested garlic deeper than we are willing to open.
    #[error("garlic nested {0} levels deep")]
    TooDeep(usize),

    /// The cleartext did not parse as a clove set.
    #[error("malformed clove set: {0}")]
    Malformed(&'static str),

    #[error("encryption engine: {0}")]
    Engine(#[from] EngineError),

    #[error("wire data: {0}")]
    Data(#[from] DataError),
}

pub type GarlicResult<T> = Result<T, GarlicError>;

/// Why a clove was refused by the replay validator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReplayError {
    #[error("clove {id} expired {ago_ms} ms ago")]
    Expired { id: u32, ago_ms: u64 },

    #[error("clove {id} expires too far in the future ({ahead_ms} ms)")]
    TooFarInFuture { id: u32, ahead_ms: u64 },

    #[error("clove {0} already seen")]
    Duplicate(u32),
}
