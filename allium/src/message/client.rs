// Copyright (c) 2024 Botho Foundation

use crate::config::ClientOptions;
use alm_data::{Destination, Hash};

/// Per-message overrides of the session's tag and lease set behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendFlags {
    /// Tags to bundle when the session runs low; 0 uses the session option.
    pub tags_to_send: usize,
    /// Bundle tags below this many available; 0 uses the session option.
    pub tag_threshold: usize,
    /// Never bundle our lease set with this message.
    pub no_lease_set: bool,
}

/// A payload a local client asked us to deliver to a destination.
#[derive(Debug, Clone)]
pub struct ClientMessage {
    pub from: Destination,
    pub to: Destination,
    pub payload: Vec<u8>,
    /// Router-assigned id the client tracks the send by.
    pub message_id: u64,
    /// Client-chosen nonce echoed in status updates.
    pub nonce: u32,
    /// Requested expiry, milliseconds since the epoch, or an interval if small
    /// enough to be one. 0 means use the configured timeout.
    pub expiration: u64,
    pub flags: SendFlags,
    pub options: ClientOptions,
}

impl ClientMessage {
    pub fn new(from: Destination, to: Destination, payload: Vec<u8>, message_id: u64) -> Self {
        Self {
            from,
            to,
            payload,
            message_id,
            nonce: 0,
            expiration: 0,
            flags: SendFlags::default(),
            options: ClientOptions::default(),
        }
    }

    pub fn with_expiration(mut self, expiration: u64) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn with_nonce(mut self, nonce: u32) -> Self {
        self.nonce = nonce;
        self
    }

    pub fn with_flags(mut self, flags: SendFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    pub fn from_hash(&self) -> Hash {
        self.from.calculate_hash()
    }

    pub fn to_hash(&self) -> Hash {
        self.to.calculate_hash()
    }
}
