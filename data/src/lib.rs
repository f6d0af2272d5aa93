// Copyright (c) 2024 Botho Foundation

//! Wire data structures shared by the Allium garlic router.
//!
//! These are the fixed external contracts the router core consumes and
//! produces:
//! - identity hashes, tunnel ids and certificates
//! - X25519 encryption keys, symmetric session keys and session tags
//! - destinations, leases and lease sets
//! - clove delivery instructions
//! - the I2NP messages carried in cloves and tunnels

#![deny(missing_debug_implementations)]

mod certificate;
mod delivery;
mod error;
mod hash;
pub mod i2np;
mod keys;
mod lease;

pub use certificate::{Certificate, CERTIFICATE_TYPE_NULL};
pub use delivery::{DeliveryInstructions, DeliveryMode, DeliveryTarget};
pub use error::{DataError, DataResult};
pub use hash::{Hash, TunnelId, HASH_LEN};
pub use i2np::{
    DataMessage, DatabaseStoreMessage, DeliveryStatusMessage, GarlicMessage, I2npMessage,
    MessageBody, MessageType,
};
pub use keys::{
    PrivateKey, PublicKey, SessionKey, SessionTag, PUBLIC_KEY_LEN, SESSION_KEY_LEN,
    SESSION_TAG_LEN,
};
pub use lease::{Destination, Lease, LeaseSet, MAX_LEASES};
