// Copyright (c) 2024 Botho Foundation

use super::{clove::CloveSet, error::GarlicResult};
use crate::crypto::{GarlicEngine, TransientSessionKeyManager};
use alm_data::{GarlicMessage, PrivateKey};

/// Decrypts garlic messages into clove sets.
#[derive(Debug, Clone)]
pub struct GarlicMessageParser {
    engine: GarlicEngine,
}

impl GarlicMessageParser {
    pub fn new(engine: GarlicEngine) -> Self {
        Self { engine }
    }

    /// Open `message` with the session tags in `skm` or, failing that,
    /// `private_key`.
    pub fn parse(
        &self,
        message: &GarlicMessage,
        private_key: &PrivateKey,
        skm: &TransientSessionKeyManager,
    ) -> GarlicResult<CloveSet> {
        let cleartext = self.engine.decrypt(message.data(), private_key, skm)?;
        CloveSet::from_bytes(&cleartext)
    }
}
