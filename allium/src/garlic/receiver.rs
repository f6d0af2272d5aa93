// Copyright (c) 2024 Botho Foundation

use super::{
    clove::GarlicClove,
    error::GarlicResult,
    parser::GarlicMessageParser,
    validator::MessageValidator,
};
use crate::{
    crypto::{GarlicEngine, TransientSessionKeyManager},
    metrics::RouterMetrics,
};
use alm_data::{GarlicMessage, PrivateKey};
use std::sync::Arc;
use tracing::debug;

/// Takes the cloves of opened garlic messages.
pub trait CloveReceiver: Send + Sync {
    fn handle_clove(&self, clove: GarlicClove);
}

/// Opens garlic messages and hands every fresh clove to a [`CloveReceiver`].
///
/// Undecryptable messages are counted by the engine and returned as errors
/// for the caller to drop. Replayed or expired cloves are dropped here.
#[derive(Debug, Clone)]
pub struct GarlicMessageReceiver {
    parser: GarlicMessageParser,
    validator: Arc<MessageValidator>,
    metrics: Arc<RouterMetrics>,
}

impl GarlicMessageReceiver {
    pub fn new(engine: GarlicEngine, validator: Arc<MessageValidator>, metrics: Arc<RouterMetrics>) -> Self {
        Self {
            parser: GarlicMessageParser::new(engine),
            validator,
            metrics,
        }
    }

    /// Decrypt `message` and dispatch its cloves. Returns how many cloves
    /// were dispatched.
    pub fn receive(
        &self,
        message: &GarlicMessage,
        private_key: &PrivateKey,
        skm: &TransientSessionKeyManager,
        handler: &dyn CloveReceiver,
    ) -> GarlicResult<usize> {
        let set = self.parser.parse(message, private_key, skm)?;
        let garlic_id = set.message_id();
        let mut dispatched = 0;
        for clove in set.into_cloves() {
            if let Err(err) = self.validator.validate(clove.id, clove.expiration) {
                debug!(garlic = garlic_id, %err, "dropping clove");
                self.metrics.inc_clove_rejected();
                continue;
            }
            self.metrics.inc_clove_dispatched();
            handler.handle_clove(clove);
            dispatched += 1;
        }
        Ok(dispatched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        config::SessionKeyConfig,
        garlic::{builder::GarlicMessageBuilder, config::GarlicConfig},
    };
    use alm_data::{DataMessage, DeliveryInstructions, I2npMessage, MessageBody};
    use parking_lot::Mutex;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    const NOW: u64 = 1_000_000;

    #[derive(Default)]
    struct Collect(Mutex<Vec<GarlicClove>>);

    impl CloveReceiver for Collect {
        fn handle_clove(&self, clove: GarlicClove) {
            self.0.lock().push(clove);
        }
    }

    fn data(id: u32) -> I2npMessage {
        I2npMessage::new(id, NOW + 30_000, MessageBody::Data(DataMessage::new(vec![id as u8]).unwrap()))
    }

    #[test]
    fn test_replayed_clove_is_dropped() {
        let mut rng = ChaCha20Rng::seed_from_u64(5);
        let bob = PrivateKey::random(&mut rng);
        let clock = Arc::new(ManualClock::new(NOW));
        let metrics = Arc::new(RouterMetrics::new());
        let engine = GarlicEngine::new(metrics.clone());
        let builder = GarlicMessageBuilder::new(engine.clone());
        let receiver = GarlicMessageReceiver::new(
            engine,
            Arc::new(MessageValidator::new(clock.clone())),
            metrics.clone(),
        );
        let alice_skm = TransientSessionKeyManager::new(SessionKeyConfig::default(), clock.clone(), metrics.clone());
        let bob_skm = TransientSessionKeyManager::new(SessionKeyConfig::default(), clock, metrics.clone());

        let mut config = GarlicConfig::garlic(1, NOW + 30_000, bob.public_key());
        config.add_clove(GarlicConfig::payload(10, NOW + 30_000, DeliveryInstructions::LOCAL, data(1)));
        config.add_clove(GarlicConfig::payload(11, NOW + 30_000, DeliveryInstructions::LOCAL, data(2)));
        let first = builder.build_message(&config, &alice_skm, 0, 10).unwrap();
        let replay = builder.build_message(&config, &alice_skm, 0, 10).unwrap();

        let sink = Collect::default();
        let n = receiver
            .receive(first.message.as_garlic().unwrap(), &bob, &bob_skm, &sink)
            .unwrap();
        assert_eq!(n, 2);

        // same clove ids in a fresh encryption are still replays
        let n = receiver
            .receive(replay.message.as_garlic().unwrap(), &bob, &bob_skm, &sink)
            .unwrap();
        assert_eq!(n, 0);
        assert_eq!(sink.0.lock().len(), 2);

        let snap = metrics.snapshot();
        assert_eq!(snap.cloves_dispatched, 2);
        assert_eq!(snap.cloves_rejected, 2);
    }

    #[test]
    fn test_expired_clove_is_dropped() {
        let mut rng = ChaCha20Rng::seed_from_u64(6);
        let bob = PrivateKey::random(&mut rng);
        let clock = Arc::new(ManualClock::new(NOW));
        let metrics = Arc::new(RouterMetrics::new());
        let engine = GarlicEngine::new(metrics.clone());
        let receiver = GarlicMessageReceiver::new(
            engine.clone(),
            Arc::new(MessageValidator::new(clock.clone())),
            metrics.clone(),
        );
        let skm = TransientSessionKeyManager::new(SessionKeyConfig::default(), clock, metrics);

        let stale = NOW - 2 * 60_000;
        let mut config = GarlicConfig::garlic(2, NOW + 30_000, bob.public_key());
        config.add_clove(GarlicConfig::payload(20, stale, DeliveryInstructions::LOCAL, data(3)));
        config.add_clove(GarlicConfig::payload(21, NOW + 30_000, DeliveryInstructions::LOCAL, data(4)));
        let built = GarlicMessageBuilder::new(engine).build_message(&config, &skm, 0, 10).unwrap();

        let sink = Collect::default();
        let n = receiver.receive(built.message.as_garlic().unwrap(), &bob, &skm, &sink).unwrap();
        assert_eq!(n, 1);
        assert_eq!(sink.0.lock()[0].id, 21);
    }
}
