// Copyright (c) 2024 Botho Foundation

//! Assembly of the garlic message a client send puts on the wire.
//!
//! ```text
//! garlic to the recipient's lease set key
//! ├── ack clove (optional): TUNNEL to our inbound gateway
//! │   └── garlic under a one-time reply key and tag
//! │       └── LOCAL: delivery status carrying the reply token
//! ├── data clove: DESTINATION recipient, the client payload
//! └── lease set clove (optional): LOCAL database store of our lease set
//! ```

use crate::{
    crypto::TransientSessionKeyManager,
    garlic::{random_id, BuiltGarlic, GarlicConfig, GarlicMessageBuilder, GarlicResult, ReplyBlock},
};
use alm_data::{
    DatabaseStoreMessage, DeliveryInstructions, DeliveryStatusMessage, Hash, I2npMessage, LeaseSet, MessageBody,
    PublicKey, TunnelId,
};
use rand::thread_rng;

/// Where and how the recipient should acknowledge the message.
#[derive(Debug, Clone, Copy)]
pub struct AckRequest<'a> {
    /// Echoed back in the delivery status message.
    pub token: u32,
    /// Gateway and tunnel id of our inbound tunnel.
    pub reply_gateway: Hash,
    pub reply_tunnel: TunnelId,
    /// Key the ack garlic is addressed to; the reply block is what actually
    /// encrypts it.
    pub reply_key: &'a PublicKey,
}

#[derive(Debug)]
pub struct OutboundGarlic<'a> {
    pub recipient_key: &'a PublicKey,
    pub data_clove: GarlicConfig,
    /// Milliseconds since the epoch.
    pub expiration: u64,
    pub ack: Option<AckRequest<'a>>,
    pub reply_lease_set: Option<LeaseSet>,
    pub tags_to_send: usize,
    pub low_threshold: usize,
}

/// Build and encrypt the garlic for one client send.
///
/// The reply block of the ack clove is registered with `skm`, so the
/// delivery status comes back decryptable by the sending destination.
pub fn create_garlic_message(
    builder: &GarlicMessageBuilder,
    skm: &TransientSessionKeyManager,
    now: u64,
    request: OutboundGarlic<'_>,
) -> GarlicResult<BuiltGarlic> {
    let mut rng = thread_rng();
    let expiration = request.expiration;
    let mut root = GarlicConfig::garlic(random_id(&mut rng), expiration, *request.recipient_key);

    if let Some(ack) = request.ack {
        let status = I2npMessage::new(
            random_id(&mut rng),
            expiration,
            MessageBody::DeliveryStatus(DeliveryStatusMessage {
                message_id: ack.token,
                arrival: now,
            }),
        );
        let mut ack_garlic = GarlicConfig::garlic(random_id(&mut rng), expiration, *ack.reply_key)
            .with_delivery_instructions(DeliveryInstructions::tunnel(ack.reply_gateway, ack.reply_tunnel))
            .with_reply_block(ReplyBlock::random(&mut rng));
        ack_garlic.add_clove(GarlicConfig::payload(
            random_id(&mut rng),
            expiration,
            DeliveryInstructions::LOCAL,
            status,
        ));
        root.add_clove(ack_garlic);
    }

    root.add_clove(request.data_clove);

    if let Some(lease_set) = request.reply_lease_set {
        let store = I2npMessage::new(
            random_id(&mut rng),
            expiration,
            MessageBody::DatabaseStore(DatabaseStoreMessage::new(lease_set)),
        );
        root.add_clove(GarlicConfig::payload(
            random_id(&mut rng),
            expiration,
            DeliveryInstructions::LOCAL,
            store,
        ));
    }

    builder.build_message(&root, skm, request.tags_to_send, request.low_threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        config::SessionKeyConfig,
        crypto::GarlicEngine,
        garlic::GarlicMessageParser,
        metrics::RouterMetrics,
    };
    use alm_data::{DataMessage, DeliveryTarget, Destination, Lease, MessageType, PrivateKey};
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use std::sync::Arc;

    const NOW: u64 = 5_000_000;

    fn skm() -> TransientSessionKeyManager {
        TransientSessionKeyManager::new(
            SessionKeyConfig::default(),
            Arc::new(ManualClock::new(NOW)),
            Arc::new(RouterMetrics::new()),
        )
    }

    #[test]
    fn test_full_garlic_layout() {
        let mut rng = ChaCha20Rng::seed_from_u64(31);
        let (them, their_key) = Destination::random(&mut rng);
        let (us, our_key) = Destination::random(&mut rng);
        let engine = GarlicEngine::new(Arc::new(RouterMetrics::new()));
        let builder = GarlicMessageBuilder::new(engine.clone());
        let sender = skm();

        let payload = I2npMessage::new(3, NOW + 60_000, MessageBody::Data(DataMessage::new(b"hello".to_vec()).unwrap()));
        let data_clove = GarlicConfig::payload(
            4,
            NOW + 60_000,
            DeliveryInstructions::destination(them.calculate_hash()),
            payload,
        );
        let our_ls = LeaseSet::new(
            us.clone(),
            our_key.public_key(),
            vec![Lease::new(Hash::digest(b"ibgw"), TunnelId::new(77), NOW + 600_000)],
        )
        .unwrap();
        let gateway = Hash::digest(b"ibgw");

        let built = create_garlic_message(
            &builder,
            &sender,
            NOW,
            OutboundGarlic {
                recipient_key: &their_key.public_key(),
                data_clove,
                expiration: NOW + 60_000,
                ack: Some(AckRequest {
                    token: 4242,
                    reply_gateway: gateway,
                    reply_tunnel: TunnelId::new(77),
                    reply_key: us.public_key(),
                }),
                reply_lease_set: Some(our_ls.clone()),
                tags_to_send: 40,
                low_threshold: 10,
            },
        )
        .unwrap();
        assert_eq!(built.tags.len(), 40);
        // the reply tag is waiting in the sender's inbound index
        assert_eq!(sender.inbound_tag_count(), 1);

        let set = GarlicMessageParser::new(engine.clone())
            .parse(built.message.as_garlic().unwrap(), &their_key, &skm())
            .unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(
            set.clove(0).unwrap().instructions.target,
            DeliveryTarget::Tunnel {
                gateway,
                tunnel_id: TunnelId::new(77)
            }
        );
        assert_eq!(set.clove(0).unwrap().message.message_type(), MessageType::Garlic);
        assert_eq!(
            set.clove(1).unwrap().instructions.target,
            DeliveryTarget::Destination(them.calculate_hash())
        );
        match &set.clove(2).unwrap().message.body {
            MessageBody::DatabaseStore(store) => assert_eq!(store.lease_set, our_ls),
            other => panic!("unexpected clove {other:?}"),
        }

        // the sender can open the ack with the registered reply tag
        let ack = set.clove(0).unwrap().message.as_garlic().unwrap().clone();
        let inner = GarlicMessageParser::new(engine)
            .parse(&ack, &our_key, &sender)
            .unwrap();
        let status = inner.clove(0).unwrap().message.as_delivery_status().copied().unwrap();
        assert_eq!(status.message_id, 4242);
        assert_eq!(status.arrival, NOW);
    }

    #[test]
    fn test_best_effort_garlic_has_only_data() {
        let mut rng = ChaCha20Rng::seed_from_u64(32);
        let their_key = PrivateKey::random(&mut rng);
        let engine = GarlicEngine::new(Arc::new(RouterMetrics::new()));
        let payload = I2npMessage::new(3, NOW + 60_000, MessageBody::Data(DataMessage::new(vec![1]).unwrap()));

        let built = create_garlic_message(
            &GarlicMessageBuilder::new(engine.clone()),
            &skm(),
            NOW,
            OutboundGarlic {
                recipient_key: &their_key.public_key(),
                data_clove: GarlicConfig::payload(5, NOW + 60_000, DeliveryInstructions::LOCAL, payload),
                expiration: NOW + 60_000,
                ack: None,
                reply_lease_set: None,
                tags_to_send: 0,
                low_threshold: 10,
            },
        )
        .unwrap();
        assert!(built.tags.is_empty());
        let set = GarlicMessageParser::new(engine)
            .parse(built.message.as_garlic().unwrap(), &their_key, &skm())
            .unwrap();
        assert_eq!(set.len(), 1);
    }
}
