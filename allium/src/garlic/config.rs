// Copyright (c) 2024 Botho Foundation

//! Unencrypted garlic trees.
//!
//! A [`GarlicConfig`] is either a leaf carrying one I2NP message (a payload
//! clove) or a garlic node whose children are themselves configs. The
//! builder turns a tree into nested encrypted garlic messages.

use alm_data::{
    i2np::MAX_ID_VALUE, Certificate, DeliveryInstructions, Hash, I2npMessage, PublicKey, SessionKey, SessionTag,
};
use rand::Rng;

/// Ephemeral key and tag a nested garlic is encrypted with, so that the
/// sender can recognise it when it comes back.
#[derive(Debug)]
pub struct ReplyBlock {
    pub key: SessionKey,
    pub tag: SessionTag,
}

impl ReplyBlock {
    pub fn new(key: SessionKey, tag: SessionTag) -> Self {
        Self { key, tag }
    }

    pub fn random<R: rand::RngCore + rand::CryptoRng>(rng: &mut R) -> Self {
        Self::new(SessionKey::random(rng), SessionTag::random(rng))
    }
}

impl Clone for ReplyBlock {
    fn clone(&self) -> Self {
        Self::new(self.key.duplicate(), self.tag)
    }
}

/// A node holds either a payload or child cloves, never both.
#[derive(Debug, Clone)]
pub enum CloveContents {
    Payload(I2npMessage),
    Cloves(Vec<GarlicConfig>),
}

#[derive(Debug, Clone)]
pub struct GarlicConfig {
    /// Router or destination this garlic is for, when known.
    pub recipient: Option<Hash>,
    pub recipient_public_key: Option<PublicKey>,
    pub certificate: Certificate,
    pub id: u32,
    /// Milliseconds since the epoch.
    pub expiration: u64,
    pub delivery_instructions: DeliveryInstructions,
    pub reply_block: Option<ReplyBlock>,
    pub contents: CloveContents,
}

impl GarlicConfig {
    /// A garlic node with no cloves yet.
    pub fn garlic(id: u32, expiration: u64, recipient_public_key: PublicKey) -> Self {
        Self {
            recipient: None,
            recipient_public_key: Some(recipient_public_key),
            certificate: Certificate::NULL,
            id,
            expiration,
            delivery_instructions: DeliveryInstructions::LOCAL,
            reply_block: None,
            contents: CloveContents::Cloves(Vec::new()),
        }
    }

    /// A leaf clove carrying `message`.
    pub fn payload(id: u32, expiration: u64, delivery_instructions: DeliveryInstructions, message: I2npMessage) -> Self {
        Self {
            recipient: None,
            recipient_public_key: None,
            certificate: Certificate::NULL,
            id,
            expiration,
            delivery_instructions,
            reply_block: None,
            contents: CloveContents::Payload(message),
        }
    }

    pub fn with_recipient(mut self, recipient: Hash) -> Self {
        self.recipient = Some(recipient);
        self
    }

    pub fn with_delivery_instructions(mut self, delivery_instructions: DeliveryInstructions) -> Self {
        self.delivery_instructions = delivery_instructions;
        self
    }

    pub fn with_reply_block(mut self, reply_block: ReplyBlock) -> Self {
        self.reply_block = Some(reply_block);
        self
    }

    pub fn with_certificate(mut self, certificate: Certificate) -> Self {
        self.certificate = certificate;
        self
    }

    /// Add a child clove. Payload nodes cannot hold cloves; the clove is
    /// dropped and `false` returned.
    pub fn add_clove(&mut self, clove: GarlicConfig) -> bool {
        match &mut self.contents {
            CloveContents::Cloves(cloves) => {
                cloves.push(clove);
                true
            }
            CloveContents::Payload(_) => false,
        }
    }

    pub fn cloves(&self) -> &[GarlicConfig] {
        match &self.contents {
            CloveContents::Cloves(cloves) => cloves,
            CloveContents::Payload(_) => &[],
        }
    }

    pub fn payload_message(&self) -> Option<&I2npMessage> {
        match &self.contents {
            CloveContents::Payload(message) => Some(message),
            CloveContents::Cloves(_) => None,
        }
    }

    pub fn is_payload(&self) -> bool {
        matches!(self.contents, CloveContents::Payload(_))
    }
}

/// Random message or clove id in the valid I2NP range.
pub fn random_id<R: Rng>(rng: &mut R) -> u32 {
    rng.gen_range(1..=MAX_ID_VALUE)
}
