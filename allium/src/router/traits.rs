// Copyright (c) 2024 Botho Foundation

//! Subsystems the router core consumes but does not implement.
//!
//! The network database, tunnel pools, transports and the client protocol
//! live outside this crate. The core reaches them only through these traits,
//! which keeps the garlic pipeline and the send path testable with small
//! in-memory fakes.

use super::tunnel::TunnelInfo;
use crate::{crypto::TransientSessionKeyManager, message::MessageStatus};
use alm_data::{Destination, Hash, I2npMessage, LeaseSet, PrivateKey, TunnelId};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};

/// Lease set storage and lookup.
#[async_trait]
pub trait NetDb: Send + Sync {
    /// The lease set for `key` if we already hold it.
    fn lookup_lease_set_locally(&self, key: &Hash) -> Option<LeaseSet>;

    /// Search the network for `key` on behalf of local destination `from`.
    ///
    /// Resolves to `None` if nothing was found within `timeout`.
    async fn lookup_lease_set(&self, key: &Hash, from: &Hash, timeout: Duration) -> Option<LeaseSet>;

    /// Refresh `key` in the background without waiting for the result.
    fn lookup_lease_set_remotely(&self, key: &Hash, from: &Hash);

    fn store(&self, key: Hash, lease_set: LeaseSet);

    /// Forget `key`; its lease set proved unusable.
    fn fail(&self, key: &Hash);

    /// True if `key` is known to be unreachable for good, e.g. because it
    /// uses an encryption type we cannot speak.
    fn is_negative_cached(&self, key: &Hash) -> bool;
}

/// Tunnel pool access.
pub trait TunnelManager: Send + Sync {
    /// An outbound tunnel from `from`'s pool.
    fn select_outbound_tunnel(&self, from: &Hash) -> Option<Arc<TunnelInfo>>;

    /// An inbound tunnel from `from`'s pool, chosen by closeness to `to`.
    fn select_inbound_tunnel(&self, from: &Hash, to: &Hash) -> Option<Arc<TunnelInfo>>;

    /// Whether `tunnel` is still alive and belongs to `from`'s pool.
    fn is_valid_tunnel(&self, from: &Hash, tunnel: &TunnelInfo) -> bool;
}

/// Hands messages to the tunnel layer.
pub trait TunnelDispatcher: Send + Sync {
    /// Send `message` out of our outbound tunnel `out_tunnel`, to be delivered
    /// at the endpoint to `target_tunnel` on `gateway`.
    fn dispatch_outbound(&self, message: I2npMessage, out_tunnel: TunnelId, target_tunnel: TunnelId, gateway: &Hash);

    /// Send `message` directly to tunnel `tunnel_id` at `gateway`.
    fn dispatch_to_tunnel(&self, message: I2npMessage, gateway: &Hash, tunnel_id: TunnelId);
}

/// Router-to-router transports.
pub trait CommSystem: Send + Sync {
    fn send_to_router(&self, message: I2npMessage, router: &Hash);

    /// True if our last attempt to reach `router` failed.
    fn was_unreachable(&self, router: &Hash) -> bool;

    /// True if the connection to `router` has a send backlog.
    fn is_backlogged(&self, router: &Hash) -> bool;
}

/// The local client sessions.
pub trait ClientManager: Send + Sync {
    /// Session key manager of the local destination `dest`.
    fn client_session_key_manager(&self, dest: &Hash) -> Option<Arc<TransientSessionKeyManager>>;

    /// Decryption key of the local destination `dest`.
    fn client_private_key(&self, dest: &Hash) -> Option<PrivateKey>;

    fn is_local(&self, dest: &Hash) -> bool;

    /// Deliver an inbound payload to local destination `dest`.
    fn message_received(&self, dest: &Hash, payload: Vec<u8>);

    /// Report the outcome of a send to the client that asked for it.
    fn message_delivery_status_update(&self, from: &Destination, message_id: u64, nonce: u32, status: MessageStatus);

    fn local_destinations(&self) -> Vec<Hash>;
}
