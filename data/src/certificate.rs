// Copyright (c) 2024 Botho Foundation

use crate::error::{ensure_remaining, DataError, DataResult};
use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

/// Certificate type with no payload.
pub const CERTIFICATE_TYPE_NULL: u8 = 0;

/// Typed certificate attached to destinations, cloves and clove sets.
///
/// Encoded as `[type:1][length:2][payload]`; the null certificate is three
/// zero bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Certificate {
    cert_type: u8,
    payload: Vec<u8>,
}

impl Certificate {
    pub const NULL: Certificate = Certificate {
        cert_type: CERTIFICATE_TYPE_NULL,
        payload: Vec::new(),
    };

    pub fn new(cert_type: u8, payload: Vec<u8>) -> DataResult<Self> {
        if payload.len() > u16::MAX as usize {
            return Err(DataError::PayloadTooLarge(payload.len()));
        }
        Ok(Self { cert_type, payload })
    }

    pub fn cert_type(&self) -> u8 {
        self.cert_type
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn is_null(&self) -> bool {
        self.cert_type == CERTIFICATE_TYPE_NULL && self.payload.is_empty()
    }

    pub fn encoded_len(&self) -> usize {
        3 + self.payload.len()
    }

    pub fn write(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.cert_type);
        buf.put_u16(self.payload.len() as u16);
        buf.put_slice(&self.payload);
    }

    pub fn read(buf: &mut impl Buf) -> DataResult<Self> {
        ensure_remaining(buf, 3)?;
        let cert_type = buf.get_u8();
        let len = buf.get_u16() as usize;
        ensure_remaining(buf, len)?;
        let mut payload = vec![0u8; len];
        buf.copy_to_slice(&mut payload);
        Ok(Self { cert_type, payload })
    }
}
