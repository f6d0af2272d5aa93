// Copyright (c) 2024 Botho Foundation

//! Clove delivery instructions.
//!
//! ```text
//! flags: [encrypted:1][mode:2][delay:1][unused:4]
//! body:  DESTINATION -> dest hash (32)
//!        ROUTER      -> router hash (32)
//!        TUNNEL      -> gateway hash (32) + tunnel id (4)
//!        delay flag  -> delay seconds (4)
//! ```
//!
//! The encrypted flag is obsolete. It is never written, and a legacy 32-byte
//! key following it is skipped on read.

use crate::{
    error::{ensure_remaining, DataError, DataResult},
    hash::{Hash, TunnelId},
};
use bytes::{Buf, BufMut};

pub const FLAG_ENCRYPTED: u8 = 0x80;
pub const FLAG_MODE: u8 = 0x60;
pub const FLAG_DELAY: u8 = 0x10;
const FLAG_MODE_SHIFT: u8 = 5;

/// Numeric delivery mode codes; these are fixed by the protocol.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryMode {
    Local = 0,
    Destination = 1,
    Router = 2,
    Tunnel = 3,
}

impl DeliveryMode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(DeliveryMode::Local),
            1 => Some(DeliveryMode::Destination),
            2 => Some(DeliveryMode::Router),
            3 => Some(DeliveryMode::Tunnel),
            _ => None,
        }
    }
}

/// Where a clove should go once its garlic has been opened.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeliveryTarget {
    Local,
    Destination(Hash),
    Router(Hash),
    Tunnel { gateway: Hash, tunnel_id: TunnelId },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryInstructions {
    pub target: DeliveryTarget,
    pub delay_seconds: Option<u32>,
}

impl DeliveryInstructions {
    pub const LOCAL: DeliveryInstructions = DeliveryInstructions {
        target: DeliveryTarget::Local,
        delay_seconds: None,
    };

    pub fn destination(dest: Hash) -> Self {
        Self::immediate(DeliveryTarget::Destination(dest))
    }

    pub fn router(router: Hash) -> Self {
        Self::immediate(DeliveryTarget::Router(router))
    }

    pub fn tunnel(gateway: Hash, tunnel_id: TunnelId) -> Self {
        Self::immediate(DeliveryTarget::Tunnel { gateway, tunnel_id })
    }

    fn immediate(target: DeliveryTarget) -> Self {
        Self {
            target,
            delay_seconds: None,
        }
    }

    pub fn mode(&self) -> DeliveryMode {
        match self.target {
            DeliveryTarget::Local => DeliveryMode::Local,
            DeliveryTarget::Destination(_) => DeliveryMode::Destination,
            DeliveryTarget::Router(_) => DeliveryMode::Router,
            DeliveryTarget::Tunnel { .. } => DeliveryMode::Tunnel,
        }
    }

    pub fn encoded_len(&self) -> usize {
        let body = match self.target {
            DeliveryTarget::Local => 0,
            DeliveryTarget::Destination(_) | DeliveryTarget::Router(_) => 32,
            DeliveryTarget::Tunnel { .. } => 36,
        };
        1 + body + self.delay_seconds.map_or(0, |_| 4)
    }

    pub fn write(&self, buf: &mut impl BufMut) {
        let mut flags = (self.mode() as u8) << FLAG_MODE_SHIFT;
        if self.delay_seconds.is_some() {
            flags |= FLAG_DELAY;
        }
        buf.put_u8(flags);
        match &self.target {
            DeliveryTarget::Local => {}
            DeliveryTarget::Destination(hash) | DeliveryTarget::Router(hash) => hash.write(buf),
            DeliveryTarget::Tunnel { gateway, tunnel_id } => {
                gateway.write(buf);
                tunnel_id.write(buf);
            }
        }
        if let Some(delay) = self.delay_seconds {
            buf.put_u32(delay);
        }
    }

    pub fn read(buf: &mut impl Buf) -> DataResult<Self> {
        ensure_remaining(buf, 1)?;
        let flags = buf.get_u8();
        if flags & FLAG_ENCRYPTED != 0 {
            ensure_remaining(buf, 32)?;
            buf.advance(32);
        }
        let raw_mode = (flags & FLAG_MODE) >> FLAG_MODE_SHIFT;
        let mode = DeliveryMode::from_byte(raw_mode).ok_or(DataError::InvalidDeliveryMode(raw_mode))?;
        let target = match mode {
            DeliveryMode::Local => DeliveryTarget::Local,
            DeliveryMode::Destination => DeliveryTarget::Destination(Hash::read(buf)?),
            DeliveryMode::Router => DeliveryTarget::Router(Hash::read(buf)?),
            DeliveryMode::Tunnel => {
                let gateway = Hash::read(buf)?;
                let tunnel_id = TunnelId::read(buf)?;
                DeliveryTarget::Tunnel { gateway, tunnel_id }
            }
        };
        let delay_seconds = if flags & FLAG_DELAY != 0 {
            ensure_remaining(buf, 4)?;
            Some(buf.get_u32())
        } else {
            None
        };
        Ok(Self {
            target,
            delay_seconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_is_single_zero_byte() {
        let mut out = Vec::new();
        DeliveryInstructions::LOCAL.write(&mut out);
        assert_eq!(out, vec![0]);
        assert_eq!(DeliveryInstructions::LOCAL.encoded_len(), 1);
    }

    #[test]
    fn test_mode_bits() {
        let mut out = Vec::new();
        DeliveryInstructions::tunnel(Hash::new([2; 32]), TunnelId::new(0x0102_0304)).write(&mut out);
        assert_eq!(out[0], 0x60);
        assert_eq!(out.len(), 37);
        assert_eq!(&out[33..], &[1, 2, 3, 4]);

        let mut out = Vec::new();
        DeliveryInstructions::destination(Hash::new([1; 32])).write(&mut out);
        assert_eq!(out[0], 0x20);

        let mut out = Vec::new();
        DeliveryInstructions::router(Hash::new([1; 32])).write(&mut out);
        assert_eq!(out[0], 0x40);
    }

    #[test]
    fn test_delay_flag() {
        let di = DeliveryInstructions {
            target: DeliveryTarget::Router(Hash::new([3; 32])),
            delay_seconds: Some(10),
        };
        let mut out = Vec::new();
        di.write(&mut out);
        assert_eq!(out[0], 0x40 | FLAG_DELAY);
        assert_eq!(out.len(), di.encoded_len());
        assert_eq!(DeliveryInstructions::read(&mut &out[..]).unwrap(), di);
    }

    #[test]
    fn test_legacy_encrypted_key_skipped() {
        let mut bytes = vec![FLAG_ENCRYPTED | 0x20];
        bytes.extend_from_slice(&[0xEE; 32]);
        bytes.extend_from_slice(&[0x11; 32]);
        let di = DeliveryInstructions::read(&mut &bytes[..]).unwrap();
        assert_eq!(di.target, DeliveryTarget::Destination(Hash::new([0x11; 32])));
    }

    #[test]
    fn test_truncated_tunnel_body() {
        let bytes = [0x60u8, 1, 2, 3];
        assert!(matches!(
            DeliveryInstructions::read(&mut &bytes[..]),
            Err(DataError::Truncated { .. })
        ));
    }
}
