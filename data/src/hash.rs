// Copyright (c) 2024 Botho Foundation

//! Identity hashes and tunnel identifiers.

use crate::error::{ensure_remaining, DataResult};
use bytes::{Buf, BufMut};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Length of a SHA-256 identity hash in bytes.
pub const HASH_LEN: usize = 32;

/// SHA-256 hash identifying a router, destination or lease set.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash([u8; HASH_LEN]);

impl Hash {
    /// Wrap raw hash bytes.
    pub const fn new(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Hash `data` with SHA-256.
    pub fn digest(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Random hash, mostly useful for tests and simulated peers.
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; HASH_LEN];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create a hash from a slice.
    ///
    /// Returns `None` if the slice is not exactly [`HASH_LEN`] bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; HASH_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub(crate) fn read(buf: &mut impl Buf) -> DataResult<Self> {
        ensure_remaining(buf, HASH_LEN)?;
        let mut bytes = [0u8; HASH_LEN];
        buf.copy_to_slice(&mut bytes);
        Ok(Self(bytes))
    }

    pub(crate) fn write(&self, buf: &mut impl BufMut) {
        buf.put_slice(&self.0);
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// Identifier of one hop of a tunnel. Zero is never assigned.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TunnelId(u32);

impl TunnelId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Random non-zero tunnel id.
    pub fn random<R: RngCore>(rng: &mut R) -> Self {
        loop {
            let id = rng.next_u32();
            if id != 0 {
                return Self(id);
            }
        }
    }

    #[inline]
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }

    pub(crate) fn read(buf: &mut impl Buf) -> DataResult<Self> {
        ensure_remaining(buf, 4)?;
        Ok(Self(buf.get_u32()))
    }

    pub(crate) fn write(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.0);
    }
}

impl fmt::Display for TunnelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_matches_sha256() {
        let h = Hash::digest(b"abc");
        assert_eq!(
            hex::encode(h.as_bytes()),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_from_bytes_rejects_wrong_length() {
        assert!(Hash::from_bytes(&[0u8; 31]).is_none());
        assert!(Hash::from_bytes(&[0u8; 33]).is_none());
        assert!(Hash::from_bytes(&[7u8; 32]).is_some());
    }

    #[test]
    fn test_random_tunnel_id_is_valid() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            assert!(TunnelId::random(&mut rng).is_valid());
        }
        assert!(!TunnelId::new(0).is_valid());
    }
}
