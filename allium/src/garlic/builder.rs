// Copyright (c) 2024 Botho Foundation

//! Serialize and encrypt garlic trees.

use super::{
    clove::{CloveSet, GarlicClove},
    config::{CloveContents, GarlicConfig},
    error::{GarlicError, GarlicResult},
};
use crate::crypto::{GarlicEngine, TransientSessionKeyManager, DEFAULT_PADDED_SIZE};
use alm_data::{GarlicMessage, I2npMessage, MessageBody, PublicKey, SessionKey, SessionTag};
use rand::thread_rng;
use tracing::debug;

/// An encrypted garlic message and what the sender needs to track it.
#[derive(Debug)]
pub struct BuiltGarlic {
    pub message: I2npMessage,
    /// The key the outer layer was encrypted with.
    pub key: SessionKey,
    /// Tags delivered to the recipient in this message; empty if none.
    pub tags: Vec<SessionTag>,
    /// True if no tag was available and the key went out asymmetrically.
    pub new_session: bool,
}

#[derive(Debug, Clone)]
pub struct GarlicMessageBuilder {
    engine: GarlicEngine,
}

impl GarlicMessageBuilder {
    pub fn new(engine: GarlicEngine) -> Self {
        Self { engine }
    }

    /// Whether a message to `target` should bundle fresh tags.
    pub fn needs_tags(skm: &TransientSessionKeyManager, target: &PublicKey, low_threshold: usize) -> bool {
        match skm.get_current_key(target) {
            Some(key) => skm.should_send_tags(target, &key, low_threshold),
            None => true,
        }
    }

    /// Encrypt `config` to its recipient.
    ///
    /// The outer layer uses the recipient's current session with `skm`,
    /// falling back to a new session when no tag is left. Up to
    /// `tags_to_send` tags are bundled when the session runs low. Nested
    /// garlic cloves are encrypted first; those with a reply block are
    /// encrypted under it and the reply tag is registered with `skm` so the
    /// message is recognised when it comes back to us.
    ///
    /// The caller records delivered tags with
    /// [`TransientSessionKeyManager::tags_delivered`].
    pub fn build_message(
        &self,
        config: &GarlicConfig,
        skm: &TransientSessionKeyManager,
        tags_to_send: usize,
        low_threshold: usize,
    ) -> GarlicResult<BuiltGarlic> {
        let target = config
            .recipient_public_key
            .as_ref()
            .ok_or(GarlicError::MissingRecipientKey(config.id))?;
        if config.is_payload() {
            return Err(GarlicError::NoCloves(config.id));
        }

        let key = skm.get_current_or_new_key(target);
        let tag = skm.consume_next_available_tag(target, &key);
        let tags = if tags_to_send > 0 && skm.should_send_tags(target, &key, low_threshold) {
            let mut rng = thread_rng();
            (0..tags_to_send).map(|_| SessionTag::random(&mut rng)).collect()
        } else {
            Vec::new()
        };

        let cleartext = self.build_clove_set(config, skm)?;
        let encrypted = self.engine.encrypt(
            &cleartext,
            target,
            &key,
            tag.as_ref(),
            &tags,
            None,
            DEFAULT_PADDED_SIZE,
        )?;
        debug!(
            garlic = config.id,
            cloves = config.cloves().len(),
            new_session = tag.is_none(),
            tags = tags.len(),
            size = encrypted.len(),
            "built garlic message"
        );
        let message = I2npMessage::new(
            config.id,
            config.expiration,
            MessageBody::Garlic(GarlicMessage::new(encrypted)?),
        );
        Ok(BuiltGarlic {
            message,
            key,
            tags,
            new_session: tag.is_none(),
        })
    }

    /// Encrypt a nested garlic node. Reply-block nodes use their own key and
    /// tag; the rest go through the recipient's session without bundling tags.
    fn build_nested(&self, config: &GarlicConfig, skm: &TransientSessionKeyManager) -> GarlicResult<I2npMessage> {
        let Some(reply) = &config.reply_block else {
            return self.build_message(config, skm, 0, 0).map(|built| built.message);
        };
        let target = config
            .recipient_public_key
            .as_ref()
            .ok_or(GarlicError::MissingRecipientKey(config.id))?;
        skm.tags_received(&reply.key, vec![reply.tag], skm.inbound_tag_lifetime());
        let cleartext = self.build_clove_set(config, skm)?;
        let encrypted = self.engine.encrypt(
            &cleartext,
            target,
            &reply.key,
            Some(&reply.tag),
            &[],
            None,
            DEFAULT_PADDED_SIZE,
        )?;
        Ok(I2npMessage::new(
            config.id,
            config.expiration,
            MessageBody::Garlic(GarlicMessage::new(encrypted)?),
        ))
    }

    fn build_clove_set(&self, config: &GarlicConfig, skm: &TransientSessionKeyManager) -> GarlicResult<Vec<u8>> {
        let children = config.cloves();
        if children.is_empty() {
            return Err(GarlicError::NoCloves(config.id));
        }
        let mut cloves = Vec::with_capacity(children.len());
        for child in children {
            let message = match &child.contents {
                CloveContents::Payload(message) => message.clone(),
                CloveContents::Cloves(_) => self.build_nested(child, skm)?,
            };
            cloves.push(GarlicClove {
                instructions: child.delivery_instructions.clone(),
                message,
                id: child.id,
                expiration: child.expiration,
                certificate: child.certificate.clone(),
            });
        }
        let set = CloveSet::new(cloves, config.certificate.clone(), config.id, config.expiration)?;
        Ok(set.to_bytes())
    }
}
