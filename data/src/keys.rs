// Copyright (c) 2024 Botho Foundation

//! Key material and session tags.
//!
//! - [`SessionTag`]: 32-byte single-use token naming a symmetric session
//! - [`SessionKey`]: 32-byte symmetric session key
//! - [`PublicKey`] / [`PrivateKey`]: X25519 encryption keys of routers and
//!   destinations
//!
//! # Security
//!
//! Secret material is zeroized on drop and never printed. `Debug` output of
//! secrets shows a short SHA-256 fingerprint only.

use crate::error::{ensure_remaining, DataResult};
use bytes::{Buf, BufMut};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{fmt, hash};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of a session tag in bytes.
pub const SESSION_TAG_LEN: usize = 32;

/// Length of a session key in bytes (AES-256).
pub const SESSION_KEY_LEN: usize = 32;

/// Length of an X25519 public key in bytes.
pub const PUBLIC_KEY_LEN: usize = 32;

/// A single-use token that lets the receiver find the symmetric key for a
/// message without asymmetric decryption.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionTag([u8; SESSION_TAG_LEN]);

impl SessionTag {
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; SESSION_TAG_LEN];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create a tag from raw bytes.
    ///
    /// Returns `None` if the slice is not exactly [`SESSION_TAG_LEN`] bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; SESSION_TAG_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; SESSION_TAG_LEN] {
        &self.0
    }

    pub fn read(buf: &mut impl Buf) -> DataResult<Self> {
        ensure_remaining(buf, SESSION_TAG_LEN)?;
        let mut bytes = [0u8; SESSION_TAG_LEN];
        buf.copy_to_slice(&mut bytes);
        Ok(Self(bytes))
    }

    pub fn write(&self, buf: &mut impl BufMut) {
        buf.put_slice(&self.0);
    }
}

impl AsRef<[u8]> for SessionTag {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SessionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionTag({})", hex::encode(&self.0[..4]))
    }
}

/// A symmetric session key.
///
/// Clone is intentionally not derived; use [`SessionKey::duplicate`] where a
/// second owned copy is really needed. Equality is constant-time.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_LEN]);

impl SessionKey {
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; SESSION_KEY_LEN];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create a session key from raw bytes.
    ///
    /// Returns `None` if the slice is not exactly [`SESSION_KEY_LEN`] bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; SESSION_KEY_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.0
    }

    /// Explicit copy of the key material.
    pub fn duplicate(&self) -> Self {
        Self(self.0)
    }

    fn fingerprint(&self) -> String {
        hex::encode(&Sha256::digest(self.0)[..4])
    }
}

impl PartialEq for SessionKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for SessionKey {}

impl hash::Hash for SessionKey {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        hash::Hash::hash(&self.0, state);
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey(sha256:{})", self.fingerprint())
    }
}

/// X25519 public encryption key of a router or destination.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey([u8; PUBLIC_KEY_LEN]);

impl PublicKey {
    pub const fn new(bytes: [u8; PUBLIC_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; PUBLIC_KEY_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    pub fn to_x25519(&self) -> x25519_dalek::PublicKey {
        x25519_dalek::PublicKey::from(self.0)
    }

    pub(crate) fn read(buf: &mut impl Buf) -> DataResult<Self> {
        ensure_remaining(buf, PUBLIC_KEY_LEN)?;
        let mut bytes = [0u8; PUBLIC_KEY_LEN];
        buf.copy_to_slice(&mut bytes);
        Ok(Self(bytes))
    }

    pub(crate) fn write(&self, buf: &mut impl BufMut) {
        buf.put_slice(&self.0);
    }
}

impl From<x25519_dalek::PublicKey> for PublicKey {
    fn from(key: x25519_dalek::PublicKey) -> Self {
        Self(key.to_bytes())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(&self.0[..4]))
    }
}

/// X25519 private decryption key.
#[derive(Clone)]
pub struct PrivateKey(x25519_dalek::StaticSecret);

impl PrivateKey {
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(x25519_dalek::StaticSecret::random_from_rng(rng))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(x25519_dalek::StaticSecret::from(bytes))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from(x25519_dalek::PublicKey::from(&self.0))
    }

    /// X25519 shared secret with `peer`.
    pub fn diffie_hellman(&self, peer: &PublicKey) -> [u8; 32] {
        self.0.diffie_hellman(&peer.to_x25519()).to_bytes()
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey(public={:?})", self.public_key())
    }
}
