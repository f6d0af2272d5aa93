// Copyright (c) 2024 Botho Foundation

//! Cleartext cloves and clove sets.
//!
//! ```text
//! clove:     [delivery instructions][I2NP message][clove id:4][expiration:8][certificate]
//! clove set: [count:1][clove]*[certificate][message id:4][expiration:8]
//! ```

use super::error::{GarlicError, GarlicResult};
use alm_data::{Certificate, DataError, DeliveryInstructions, I2npMessage};
use bytes::{Buf, BufMut};

/// Most cloves one garlic message can carry.
pub const MAX_CLOVES: usize = u8::MAX as usize;

/// One sub-message of a garlic message together with where it goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GarlicClove {
    pub instructions: DeliveryInstructions,
    pub message: I2npMessage,
    pub id: u32,
    /// Milliseconds since the epoch.
    pub expiration: u64,
    pub certificate: Certificate,
}

impl GarlicClove {
    pub fn write(&self, buf: &mut impl BufMut) {
        self.instructions.write(buf);
        buf.put_slice(&self.message.to_bytes());
        buf.put_u32(self.id);
        buf.put_u64(self.expiration);
        self.certificate.write(buf);
    }

    pub fn read(buf: &mut impl Buf) -> GarlicResult<Self> {
        let instructions = DeliveryInstructions::read(buf)?;
        let message = I2npMessage::read(buf)?;
        need(&*buf, 12)?;
        let id = buf.get_u32();
        let expiration = buf.get_u64();
        let certificate = Certificate::read(buf)?;
        Ok(Self {
            instructions,
            message,
            id,
            expiration,
            certificate,
        })
    }
}

/// The decrypted content of one garlic message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloveSet {
    cloves: Vec<GarlicClove>,
    certificate: Certificate,
    message_id: u32,
    expiration: u64,
}

impl CloveSet {
    pub fn new(cloves: Vec<GarlicClove>, certificate: Certificate, message_id: u32, expiration: u64) -> GarlicResult<Self> {
        if cloves.len() > MAX_CLOVES {
            return Err(GarlicError::TooManyCloves(cloves.len()));
        }
        Ok(Self {
            cloves,
            certificate,
            message_id,
            expiration,
        })
    }

    pub fn cloves(&self) -> &[GarlicClove] {
        &self.cloves
    }

    pub fn clove(&self, index: usize) -> Option<&GarlicClove> {
        self.cloves.get(index)
    }

    pub fn len(&self) -> usize {
        self.cloves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cloves.is_empty()
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn message_id(&self) -> u32 {
        self.message_id
    }

    pub fn expiration(&self) -> u64 {
        self.expiration
    }

    pub fn into_cloves(self) -> Vec<GarlicClove> {
        self.cloves
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u8(self.cloves.len() as u8);
        for clove in &self.cloves {
            clove.write(&mut buf);
        }
        self.certificate.write(&mut buf);
        buf.put_u32(self.message_id);
        buf.put_u64(self.expiration);
        buf
    }

    /// Parse a clove set. Bytes after it (padding) are ignored.
    pub fn from_bytes(bytes: &[u8]) -> GarlicResult<Self> {
        let mut buf = bytes;
        need(&buf, 1)?;
        let count = buf.get_u8() as usize;
        if count == 0 {
            return Err(GarlicError::Malformed("empty clove set"));
        }
        let mut cloves = Vec::with_capacity(count);
        for _ in 0..count {
            cloves.push(GarlicClove::read(&mut buf)?);
        }
        let certificate = Certificate::read(&mut buf)?;
        need(&buf, 12)?;
        let message_id = buf.get_u32();
        let expiration = buf.get_u64();
        Self::new(cloves, certificate, message_id, expiration)
    }
}

fn need(buf: &impl Buf, needed: usize) -> GarlicResult<()> {
    let available = buf.remaining();
    if available < needed {
        return Err(DataError::Truncated { needed, available }.into());
    }
    Ok(())
}
