// Copyright (c) 2024 Botho Foundation

//! Hybrid garlic encryption.
//!
//! A garlic payload is always encrypted with AES-256 in counter mode under a
//! symmetric session key. How the receiver learns that key depends on whether
//! we hold a session tag for it:
//!
//! ```text
//! existing session: [session tag:32][AES block]
//! new session:      [ephemeral X25519:32][sealed(session key, pre-IV):80][AES block]
//! ```
//!
//! The sealed header is ChaCha20-Poly1305 under a key derived with
//! HKDF-SHA256 from the X25519 shared secret with the recipient.
//!
//! The AES block cleartext carries any new tags (and optionally a new
//! session key) for the recipient to install, a SHA-256 of the payload, the
//! payload itself and random padding:
//!
//! ```text
//! [tag count:2][tags][payload len:4][SHA-256(payload):32][flag:1][new key:32?][payload][padding]
//! ```

use super::key_manager::TransientSessionKeyManager;
use crate::metrics::RouterMetrics;
use aes::{
    cipher::{KeyIvInit, StreamCipher},
    Aes256,
};
use alm_data::{PrivateKey, PublicKey, SessionKey, SessionTag, PUBLIC_KEY_LEN, SESSION_KEY_LEN, SESSION_TAG_LEN};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use ctr::Ctr64BE;
use hkdf::Hkdf;
use rand::{thread_rng, RngCore};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use zeroize::Zeroizing;

type Aes256Ctr = Ctr64BE<Aes256>;

/// Smallest ciphertext that can possibly decrypt: a tag and one padded
/// minimal AES block.
pub const MIN_ENCRYPTED_SIZE: usize = 80;

/// Payloads are padded to at least this many bytes of AES block.
pub const DEFAULT_PADDED_SIZE: usize = 128;

/// Upper bound on tags carried in one AES block.
pub const MAX_TAGS_PER_BLOCK: usize = 200;

const PRE_IV_LEN: usize = 32;
const POLY1305_TAG_LEN: usize = 16;
const SEALED_HEADER_LEN: usize = SESSION_KEY_LEN + PRE_IV_LEN + POLY1305_TAG_LEN;
const NEW_SESSION_PREFIX_LEN: usize = PUBLIC_KEY_LEN + SEALED_HEADER_LEN;
const AES_BLOCK_FIXED_LEN: usize = 2 + 4 + 32 + 1;

const HKDF_INFO: &[u8] = b"allium-garlic-new-session-v1";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("ciphertext too short: {0} bytes")]
    TooShort(usize),

    #[error("too many tags for one block: {0}")]
    TooManyTags(usize),

    #[error("session header authentication failed")]
    AuthenticationFailed,

    #[error("degenerate key exchange")]
    WeakKeyExchange,

    #[error("malformed AES block: {0}")]
    Malformed(&'static str),

    #[error("payload hash mismatch")]
    PayloadHashMismatch,

    #[error("key derivation failed")]
    KeyDerivation,
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Cleartext of a decrypted AES block.
#[derive(Debug)]
struct AesBlock {
    tags: Vec<SessionTag>,
    new_key: Option<SessionKey>,
    payload: Vec<u8>,
}

/// Encrypts and decrypts garlic payloads.
#[derive(Debug, Clone)]
pub struct GarlicEngine {
    metrics: Arc<RouterMetrics>,
}

impl GarlicEngine {
    pub fn new(metrics: Arc<RouterMetrics>) -> Self {
        Self { metrics }
    }

    /// Encrypt `payload` for `target`.
    ///
    /// With a `tag` the message goes out on the existing session identified
    /// by that tag. Without one the session key is sealed to `target`.
    /// `tags_for_delivery` and `new_key` ride along for the recipient to
    /// install.
    #[allow(clippy::too_many_arguments)]
    pub fn encrypt(
        &self,
        payload: &[u8],
        target: &PublicKey,
        key: &SessionKey,
        tag: Option<&SessionTag>,
        tags_for_delivery: &[SessionTag],
        new_key: Option<&SessionKey>,
        padded_size: usize,
    ) -> EngineResult<Vec<u8>> {
        if tags_for_delivery.len() > MAX_TAGS_PER_BLOCK {
            return Err(EngineError::TooManyTags(tags_for_delivery.len()));
        }
        match tag {
            Some(tag) => {
                let iv = derive_iv(tag.as_bytes());
                let mut out = Vec::with_capacity(SESSION_TAG_LEN + padded_size);
                out.extend_from_slice(tag.as_bytes());
                out.extend(encrypt_aes_block(payload, key, &iv, tags_for_delivery, new_key, padded_size));
                self.metrics.inc_encrypt_existing_session();
                Ok(out)
            }
            None => {
                let out = self.encrypt_new_session(payload, target, key, tags_for_delivery, new_key, padded_size)?;
                self.metrics.inc_encrypt_new_session();
                Ok(out)
            }
        }
    }

    fn encrypt_new_session(
        &self,
        payload: &[u8],
        target: &PublicKey,
        key: &SessionKey,
        tags_for_delivery: &[SessionTag],
        new_key: Option<&SessionKey>,
        padded_size: usize,
    ) -> EngineResult<Vec<u8>> {
        let mut rng = thread_rng();
        let ephemeral = PrivateKey::random(&mut rng);
        let ephemeral_public = ephemeral.public_key();
        let sealing_key = derive_sealing_key(&ephemeral.diffie_hellman(target), &ephemeral_public, target)?;

        let mut pre_iv = Zeroizing::new([0u8; PRE_IV_LEN]);
        rng.fill_bytes(&mut pre_iv[..]);
        let mut header = Zeroizing::new([0u8; SESSION_KEY_LEN + PRE_IV_LEN]);
        header[..SESSION_KEY_LEN].copy_from_slice(key.as_bytes());
        header[SESSION_KEY_LEN..].copy_from_slice(&pre_iv[..]);

        let cipher = ChaCha20Poly1305::new((&*sealing_key).into());
        let sealed = cipher
            .encrypt(&Nonce::default(), &header[..])
            .map_err(|_| EngineError::AuthenticationFailed)?;

        let iv = derive_iv(&pre_iv[..]);
        let mut out = Vec::with_capacity(NEW_SESSION_PREFIX_LEN + padded_size);
        out.extend_from_slice(ephemeral_public.as_bytes());
        out.extend_from_slice(&sealed);
        out.extend(encrypt_aes_block(payload, key, &iv, tags_for_delivery, new_key, padded_size));
        Ok(out)
    }

    /// Decrypt a garlic payload addressed to `private_key`.
    ///
    /// A leading tag known to `skm` selects the session key; otherwise the
    /// message is treated as a new session. Tags carried in the block are
    /// installed in `skm`.
    pub fn decrypt(
        &self,
        data: &[u8],
        private_key: &PrivateKey,
        skm: &TransientSessionKeyManager,
    ) -> EngineResult<Vec<u8>> {
        if data.len() < MIN_ENCRYPTED_SIZE {
            self.metrics.inc_decrypt_failure();
            return Err(EngineError::TooShort(data.len()));
        }
        let tag = SessionTag::from_bytes(&data[..SESSION_TAG_LEN]).ok_or(EngineError::Malformed("tag"))?;
        if let Some(key) = skm.consume_tag(&tag) {
            let iv = derive_iv(tag.as_bytes());
            match decrypt_aes_block(&data[SESSION_TAG_LEN..], &key, &iv) {
                Ok(block) => {
                    self.metrics.inc_decrypt_existing_session();
                    return Ok(install_tags(block, key, skm));
                }
                Err(err) => {
                    debug!(?tag, %err, "existing session decrypt failed, trying new session");
                }
            }
        }
        match self.decrypt_new_session(data, private_key) {
            Ok((block, key)) => {
                self.metrics.inc_decrypt_new_session();
                Ok(install_tags(block, key, skm))
            }
            Err(err) => {
                warn!(%err, len = data.len(), "garlic decrypt failed");
                self.metrics.inc_decrypt_failure();
                Err(err)
            }
        }
    }

    fn decrypt_new_session(&self, data: &[u8], private_key: &PrivateKey) -> EngineResult<(AesBlock, SessionKey)> {
        if data.len() < NEW_SESSION_PREFIX_LEN + AES_BLOCK_FIXED_LEN {
            return Err(EngineError::TooShort(data.len()));
        }
        let ephemeral_public =
            PublicKey::from_bytes(&data[..PUBLIC_KEY_LEN]).ok_or(EngineError::Malformed("ephemeral key"))?;
        let our_public = private_key.public_key();
        let sealing_key =
            derive_sealing_key(&private_key.diffie_hellman(&ephemeral_public), &ephemeral_public, &our_public)?;

        let cipher = ChaCha20Poly1305::new((&*sealing_key).into());
        let header = Zeroizing::new(
            cipher
                .decrypt(&Nonce::default(), &data[PUBLIC_KEY_LEN..NEW_SESSION_PREFIX_LEN])
                .map_err(|_| EngineError::AuthenticationFailed)?,
        );
        let key = SessionKey::from_bytes(&header[..SESSION_KEY_LEN]).ok_or(EngineError::Malformed("session key"))?;
        let iv = derive_iv(&header[SESSION_KEY_LEN..]);
        let block = decrypt_aes_block(&data[NEW_SESSION_PREFIX_LEN..], &key, &iv)?;
        Ok((block, key))
    }
}

fn install_tags(block: AesBlock, used_key: SessionKey, skm: &TransientSessionKeyManager) -> Vec<u8> {
    if !block.tags.is_empty() {
        let key = block.new_key.unwrap_or(used_key);
        skm.tags_received(&key, block.tags, skm.inbound_tag_lifetime());
    }
    block.payload
}

fn derive_iv(seed: &[u8]) -> [u8; 16] {
    let digest = Sha256::digest(seed);
    let mut iv = [0u8; 16];
    iv.copy_from_slice(&digest[..16]);
    iv
}

fn derive_sealing_key(
    shared: &[u8; 32],
    ephemeral: &PublicKey,
    recipient: &PublicKey,
) -> EngineResult<Zeroizing<[u8; 32]>> {
    if shared.iter().all(|b| *b == 0) {
        return Err(EngineError::WeakKeyExchange);
    }
    let mut salt = [0u8; 2 * PUBLIC_KEY_LEN];
    salt[..PUBLIC_KEY_LEN].copy_from_slice(ephemeral.as_bytes());
    salt[PUBLIC_KEY_LEN..].copy_from_slice(recipient.as_bytes());

    let hkdf = Hkdf::<Sha256>::new(Some(&salt), shared);
    let mut okm = Zeroizing::new([0u8; 32]);
    hkdf.expand(HKDF_INFO, &mut okm[..])
        .map_err(|_| EngineError::KeyDerivation)?;
    Ok(okm)
}

fn encrypt_aes_block(
    payload: &[u8],
    key: &SessionKey,
    iv: &[u8; 16],
    tags: &[SessionTag],
    new_key: Option<&SessionKey>,
    padded_size: usize,
) -> Vec<u8> {
    let mut block = Vec::with_capacity(padded_size.max(AES_BLOCK_FIXED_LEN + payload.len() + 16));
    block.extend_from_slice(&(tags.len() as u16).to_be_bytes());
    for tag in tags {
        block.extend_from_slice(tag.as_bytes());
    }
    block.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    block.extend_from_slice(&Sha256::digest(payload));
    match new_key {
        Some(new_key) => {
            block.push(1);
            block.extend_from_slice(new_key.as_bytes());
        }
        None => block.push(0),
    }
    block.extend_from_slice(payload);

    let mut target = block.len().max(padded_size);
    if target % 16 != 0 {
        target += 16 - target % 16;
    }
    let unpadded = block.len();
    block.resize(target, 0);
    thread_rng().fill_bytes(&mut block[unpadded..]);

    let mut cipher = Aes256Ctr::new(key.as_bytes().into(), iv.into());
    cipher.apply_keystream(&mut block);
    block
}

fn decrypt_aes_block(encrypted: &[u8], key: &SessionKey, iv: &[u8; 16]) -> EngineResult<AesBlock> {
    if encrypted.len() < AES_BLOCK_FIXED_LEN || encrypted.len() % 16 != 0 {
        return Err(EngineError::Malformed("block length"));
    }
    let mut block = Zeroizing::new(encrypted.to_vec());
    let mut cipher = Aes256Ctr::new(key.as_bytes().into(), iv.into());
    cipher.apply_keystream(&mut block);

    let mut cur: &[u8] = &block;
    let count = u16::from_be_bytes(take::<2>(&mut cur)?) as usize;
    if count > MAX_TAGS_PER_BLOCK {
        return Err(EngineError::Malformed("tag count"));
    }
    let mut tags = Vec::with_capacity(count);
    for _ in 0..count {
        tags.push(SessionTag::from_bytes(&take::<SESSION_TAG_LEN>(&mut cur)?).ok_or(EngineError::Malformed("tag"))?);
    }
    let len = u32::from_be_bytes(take::<4>(&mut cur)?) as usize;
    let hash = take::<32>(&mut cur)?;
    let new_key = match take::<1>(&mut cur)?[0] {
        0 => None,
        1 => Some(SessionKey::from_bytes(&take::<SESSION_KEY_LEN>(&mut cur)?).ok_or(EngineError::Malformed("new key"))?),
        _ => return Err(EngineError::Malformed("new key flag")),
    };
    if cur.len() < len {
        return Err(EngineError::Malformed("payload length"));
    }
    let payload = cur[..len].to_vec();
    if Sha256::digest(&payload)[..] != hash[..] {
        return Err(EngineError::PayloadHashMismatch);
    }
    Ok(AesBlock {
        tags,
        new_key,
        payload,
    })
}

fn take<const N: usize>(cur: &mut &[u8]) -> EngineResult<[u8; N]> {
    if cur.len() < N {
        return Err(EngineError::Malformed("truncated"));
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&cur[..N]);
    *cur = &cur[N..];
    Ok(out)
}
