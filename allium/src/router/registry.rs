// Copyright (c) 2024 Botho Foundation

//! Waiters for inbound replies.
//!
//! A send that expects an answer registers a [`MessageSelector`] and awaits
//! the returned receiver. Inbound messages that nobody else claims are offered
//! to [`MessageRegistry::notify`]. A selector is resolved at most once; an
//! expired selector is dropped, which closes its receiver.

use alm_data::I2npMessage;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};
use tokio::sync::oneshot;
use tracing::debug;

pub trait MessageSelector: Send + Sync + fmt::Debug {
    fn is_match(&self, message: &I2npMessage) -> bool;

    /// Milliseconds since the epoch after which the selector is dropped.
    fn expiration(&self) -> u64;
}

/// Matches the delivery status message carrying `token`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplySelector {
    pub token: u32,
    pub expiration: u64,
}

impl ReplySelector {
    pub fn new(token: u32, expiration: u64) -> Self {
        Self { token, expiration }
    }
}

impl MessageSelector for ReplySelector {
    fn is_match(&self, message: &I2npMessage) -> bool {
        message
            .as_delivery_status()
            .is_some_and(|status| status.message_id == self.token)
    }

    fn expiration(&self) -> u64 {
        self.expiration
    }
}

/// Handle to a registered selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingId(u64);

struct Pending {
    selector: Box<dyn MessageSelector>,
    reply: oneshot::Sender<I2npMessage>,
}

#[derive(Default)]
pub struct MessageRegistry {
    pending: Mutex<HashMap<PendingId, Pending>>,
    next_id: AtomicU64,
}

impl fmt::Debug for MessageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageRegistry")
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}

impl MessageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_pending(
        &self,
        selector: Box<dyn MessageSelector>,
    ) -> (PendingId, oneshot::Receiver<I2npMessage>) {
        let id = PendingId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, Pending { selector, reply: tx });
        (id, rx)
    }

    /// Drop a selector without resolving it. Returns false if it already
    /// matched or expired.
    pub fn unregister(&self, id: PendingId) -> bool {
        self.pending.lock().remove(&id).is_some()
    }

    /// Resolve every selector matching `message`. Returns how many matched.
    pub fn notify(&self, message: &I2npMessage) -> usize {
        let matched: Vec<Pending> = {
            let mut pending = self.pending.lock();
            let ids: Vec<PendingId> = pending
                .iter()
                .filter(|(_, p)| p.selector.is_match(message))
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter().filter_map(|id| pending.remove(&id)).collect()
        };
        let count = matched.len();
        for p in matched {
            // the waiter may have given up already
            let _ = p.reply.send(message.clone());
        }
        if count == 0 {
            debug!(msg_id = message.unique_id, kind = ?message.message_type(), "no selector matched");
        }
        count
    }

    /// Drop selectors that expired before `now`.
    pub fn expire(&self, now: u64) -> usize {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|_, p| p.selector.expiration() >= now);
        before - pending.len()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alm_data::{DataMessage, DeliveryStatusMessage, MessageBody};

    fn status(token: u32) -> I2npMessage {
        I2npMessage::new(
            token,
            1_000,
            MessageBody::DeliveryStatus(DeliveryStatusMessage {
                message_id: token,
                arrival: 5,
            }),
        )
    }

    #[tokio::test]
    async fn test_notify_resolves_matching_selector() {
        let registry = MessageRegistry::new();
        let (_, rx) = registry.register_pending(Box::new(ReplySelector::new(7, 10_000)));
        let (_, _other) = registry.register_pending(Box::new(ReplySelector::new(8, 10_000)));

        assert_eq!(registry.notify(&status(7)), 1);
        let reply = rx.await.unwrap();
        assert_eq!(reply.as_delivery_status().unwrap().message_id, 7);
        assert_eq!(registry.len(), 1);

        // resolved selectors do not match twice
        assert_eq!(registry.notify(&status(7)), 0);
    }

    #[test]
    fn test_data_message_never_matches() {
        let registry = MessageRegistry::new();
        let (_, _rx) = registry.register_pending(Box::new(ReplySelector::new(7, 10_000)));
        let data = I2npMessage::new(7, 1_000, MessageBody::Data(DataMessage::new(vec![1]).unwrap()));
        assert_eq!(registry.notify(&data), 0);
    }

    #[tokio::test]
    async fn test_expire_closes_receiver() {
        let registry = MessageRegistry::new();
        let (_, rx) = registry.register_pending(Box::new(ReplySelector::new(1, 5_000)));
        let (_, _live) = registry.register_pending(Box::new(ReplySelector::new(2, 20_000)));

        assert_eq!(registry.expire(10_000), 1);
        assert!(rx.await.is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister() {
        let registry = MessageRegistry::new();
        let (id, _rx) = registry.register_pending(Box::new(ReplySelector::new(3, 5_000)));
        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert!(registry.is_empty());
    }
}
