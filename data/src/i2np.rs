// Copyright (c) 2024 Botho Foundation

//! The I2NP messages carried inside cloves and tunnels.
//!
//! Every message is framed with a 16-byte header:
//!
//! ```text
//! [type:1][unique id:4][expiration ms:8][body size:2][checksum:1][body]
//! ```
//!
//! The checksum is the first byte of SHA-256 over the body.

use crate::{
    error::{ensure_remaining, DataError, DataResult},
    hash::Hash,
    lease::LeaseSet,
};
use bytes::{Buf, BufMut};
use sha2::{Digest, Sha256};

/// Length of the message header in bytes.
pub const HEADER_LEN: usize = 16;

/// Largest body a message can carry (the size field is 16 bits).
pub const MAX_BODY_LEN: usize = u16::MAX as usize;

/// Exclusive upper bound for message ids and reply tokens.
pub const MAX_ID_VALUE: u32 = u32::MAX - 1;

/// Store type byte for a lease set in a DatabaseStore.
const STORE_TYPE_LEASE_SET: u8 = 1;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    DatabaseStore = 1,
    DeliveryStatus = 10,
    Garlic = 11,
    Data = 20,
}

impl MessageType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(MessageType::DatabaseStore),
            10 => Some(MessageType::DeliveryStatus),
            11 => Some(MessageType::Garlic),
            20 => Some(MessageType::Data),
            _ => None,
        }
    }
}

/// Opaque end-to-end client payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataMessage {
    payload: Vec<u8>,
}

impl DataMessage {
    pub fn new(payload: Vec<u8>) -> DataResult<Self> {
        if payload.len() + 4 > MAX_BODY_LEN {
            return Err(DataError::PayloadTooLarge(payload.len()));
        }
        Ok(Self { payload })
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

/// Acknowledgement carrying the id (reply token) it acknowledges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryStatusMessage {
    pub message_id: u32,
    pub arrival: u64,
}

/// An encrypted clove set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GarlicMessage {
    data: Vec<u8>,
}

impl GarlicMessage {
    pub fn new(data: Vec<u8>) -> DataResult<Self> {
        if data.len() + 4 > MAX_BODY_LEN {
            return Err(DataError::PayloadTooLarge(data.len()));
        }
        Ok(Self { data })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// A lease set store, used to bundle our reply lease set with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseStoreMessage {
    pub key: Hash,
    pub reply_token: u32,
    pub lease_set: LeaseSet,
}

impl DatabaseStoreMessage {
    pub fn new(lease_set: LeaseSet) -> Self {
        Self {
            key: lease_set.hash(),
            reply_token: 0,
            lease_set,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    DatabaseStore(DatabaseStoreMessage),
    DeliveryStatus(DeliveryStatusMessage),
    Garlic(GarlicMessage),
    Data(DataMessage),
}

impl MessageBody {
    pub fn message_type(&self) -> MessageType {
        match self {
            MessageBody::DatabaseStore(_) => MessageType::DatabaseStore,
            MessageBody::DeliveryStatus(_) => MessageType::DeliveryStatus,
            MessageBody::Garlic(_) => MessageType::Garlic,
            MessageBody::Data(_) => MessageType::Data,
        }
    }

    fn write(&self, buf: &mut Vec<u8>) {
        match self {
            MessageBody::DatabaseStore(store) => {
                store.key.write(buf);
                buf.put_u8(STORE_TYPE_LEASE_SET);
                buf.put_u32(store.reply_token);
                store.lease_set.write(buf);
            }
            MessageBody::DeliveryStatus(status) => {
                buf.put_u32(status.message_id);
                buf.put_u64(status.arrival);
            }
            MessageBody::Garlic(garlic) => {
                buf.put_u32(garlic.data.len() as u32);
                buf.put_slice(&garlic.data);
            }
            MessageBody::Data(data) => {
                buf.put_u32(data.payload.len() as u32);
                buf.put_slice(&data.payload);
            }
        }
    }

    fn read(message_type: MessageType, mut body: &[u8]) -> DataResult<Self> {
        let buf = &mut body;
        let parsed = match message_type {
            MessageType::DatabaseStore => {
                let key = Hash::read(buf)?;
                ensure_remaining(buf, 5)?;
                let store_type = buf.get_u8();
                if store_type != STORE_TYPE_LEASE_SET {
                    return Err(DataError::UnknownMessageType(store_type));
                }
                let reply_token = buf.get_u32();
                let lease_set = LeaseSet::read(buf)?;
                MessageBody::DatabaseStore(DatabaseStoreMessage {
                    key,
                    reply_token,
                    lease_set,
                })
            }
            MessageType::DeliveryStatus => {
                ensure_remaining(buf, 12)?;
                MessageBody::DeliveryStatus(DeliveryStatusMessage {
                    message_id: buf.get_u32(),
                    arrival: buf.get_u64(),
                })
            }
            MessageType::Garlic => MessageBody::Garlic(GarlicMessage {
                data: read_sized(buf)?,
            }),
            MessageType::Data => MessageBody::Data(DataMessage {
                payload: read_sized(buf)?,
            }),
        };
        Ok(parsed)
    }
}

fn read_sized(buf: &mut &[u8]) -> DataResult<Vec<u8>> {
    ensure_remaining(buf, 4)?;
    let len = buf.get_u32() as usize;
    ensure_remaining(buf, len)?;
    let out = buf[..len].to_vec();
    buf.advance(len);
    Ok(out)
}

/// A framed I2NP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct I2npMessage {
    pub unique_id: u32,
    /// Milliseconds since the epoch.
    pub expiration: u64,
    pub body: MessageBody,
}

impl I2npMessage {
    pub fn new(unique_id: u32, expiration: u64, body: MessageBody) -> Self {
        Self {
            unique_id,
            expiration,
            body,
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.body.message_type()
    }

    pub fn as_garlic(&self) -> Option<&GarlicMessage> {
        match &self.body {
            MessageBody::Garlic(garlic) => Some(garlic),
            _ => None,
        }
    }

    pub fn as_delivery_status(&self) -> Option<&DeliveryStatusMessage> {
        match &self.body {
            MessageBody::DeliveryStatus(status) => Some(status),
            _ => None,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut body = Vec::new();
        self.body.write(&mut body);
        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.put_u8(self.message_type() as u8);
        out.put_u32(self.unique_id);
        out.put_u64(self.expiration);
        out.put_u16(body.len() as u16);
        out.put_u8(Sha256::digest(&body)[0]);
        out.extend_from_slice(&body);
        out
    }

    pub fn encoded_len(&self) -> usize {
        self.to_bytes().len()
    }

    /// Read one message from the front of `buf`, leaving anything after it.
    pub fn read(buf: &mut impl Buf) -> DataResult<Self> {
        ensure_remaining(buf, HEADER_LEN)?;
        let raw_type = buf.get_u8();
        let message_type =
            MessageType::from_byte(raw_type).ok_or(DataError::UnknownMessageType(raw_type))?;
        let unique_id = buf.get_u32();
        let expiration = buf.get_u64();
        let size = buf.get_u16() as usize;
        let checksum = buf.get_u8();
        if buf.remaining() < size {
            return Err(DataError::SizeMismatch {
                declared: size,
                actual: buf.remaining(),
            });
        }
        let mut body = vec![0u8; size];
        buf.copy_to_slice(&mut body);
        if Sha256::digest(&body)[0] != checksum {
            return Err(DataError::ChecksumMismatch(unique_id));
        }
        let body = MessageBody::read(message_type, &body)?;
        Ok(Self::new(unique_id, expiration, body))
    }

    /// Decode a buffer holding exactly one message.
    pub fn from_bytes(bytes: &[u8]) -> DataResult<Self> {
        let mut buf = bytes;
        let msg = Self::read(&mut buf)?;
        if !buf.is_empty() {
            return Err(DataError::SizeMismatch {
                declared: bytes.len() - buf.len(),
                actual: bytes.len(),
            });
        }
        Ok(msg)
    }
}
