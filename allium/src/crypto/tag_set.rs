// Copyright (c) 2024 Botho Foundation

//! Groups of session tags issued together under one session key.

use alm_data::{PublicKey, SessionKey, SessionTag};
use std::collections::HashSet;

/// Identifier of a tag set, unique within one session key manager.
pub type TagSetId = u64;

/// Tags we delivered to a peer and may spend on messages to it.
///
/// `date` is the creation time; the set is usable for the configured tag
/// duration after it.
#[derive(Debug)]
pub(crate) struct OutboundTagSet {
    pub(crate) id: TagSetId,
    pub(crate) key: SessionKey,
    pub(crate) date: u64,
    tags: Vec<SessionTag>,
    original_size: usize,
    pub(crate) acked: bool,
}

impl OutboundTagSet {
    pub(crate) fn new(id: TagSetId, key: SessionKey, tags: Vec<SessionTag>, date: u64) -> Self {
        let original_size = tags.len();
        Self {
            id,
            key,
            date,
            tags,
            original_size,
            acked: false,
        }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.tags.len()
    }

    pub(crate) fn original_size(&self) -> usize {
        self.original_size
    }

    pub(crate) fn take_next(&mut self) -> Option<SessionTag> {
        self.tags.pop()
    }

    pub(crate) fn is_expired(&self, now: u64, duration: u64) -> bool {
        self.date + duration <= now
    }
}

/// Tags a peer delivered to us, resolving to the key that decrypts the
/// messages they prefix. `expiration` is absolute.
#[derive(Debug)]
pub(crate) struct InboundTagSet {
    pub(crate) key: SessionKey,
    pub(crate) expiration: u64,
    pub(crate) tags: HashSet<SessionTag>,
    pub(crate) original_size: usize,
}

impl InboundTagSet {
    pub(crate) fn is_expired(&self, now: u64) -> bool {
        self.expiration <= now
    }

    /// Nothing consumed yet.
    pub(crate) fn is_untouched(&self) -> bool {
        self.tags.len() == self.original_size
    }
}

/// Receipt for a bundle of tags handed to a peer.
///
/// Resolve it with
/// [`tags_acked`](super::TransientSessionKeyManager::tags_acked) once the
/// peer confirmed receipt, or
/// [`fail_tags`](super::TransientSessionKeyManager::fail_tags) when the
/// message carrying them timed out.
#[derive(Debug)]
pub struct TagSetHandle {
    pub(crate) target: PublicKey,
    pub(crate) key: SessionKey,
    pub(crate) id: TagSetId,
}

impl TagSetHandle {
    pub fn id(&self) -> TagSetId {
        self.id
    }

    pub fn target(&self) -> &PublicKey {
        &self.target
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }
}

impl Clone for TagSetHandle {
    fn clone(&self) -> Self {
        Self {
            target: self.target,
            key: self.key.duplicate(),
            id: self.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(n: u8) -> Vec<SessionTag> {
        (0..n).map(|i| SessionTag::from_bytes(&[i; 32]).unwrap()).collect()
    }

    #[test]
    fn test_outbound_take_until_empty() {
        let key = SessionKey::from_bytes(&[1; 32]).unwrap();
        let mut set = OutboundTagSet::new(1, key, tags(3), 100);
        let mut seen = HashSet::new();
        while let Some(tag) = set.take_next() {
            assert!(seen.insert(tag));
        }
        assert_eq!(seen.len(), 3);
        assert_eq!(set.remaining(), 0);
        assert_eq!(set.original_size(), 3);
    }

    #[test]
    fn test_outbound_expiry_boundary() {
        let key = SessionKey::from_bytes(&[1; 32]).unwrap();
        let set = OutboundTagSet::new(1, key, tags(1), 1_000);
        assert!(!set.is_expired(1_999, 1_000));
        assert!(set.is_expired(2_000, 1_000));
    }
}
