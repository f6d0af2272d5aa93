// Copyright (c) 2024 Botho Foundation

use alm_data::{Hash, TunnelId};
use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

/// A built tunnel as seen by the router core.
///
/// Tunnels are owned by the tunnel manager; the core only reads them and
/// records verified traffic. Two handles are the same tunnel iff their ids
/// match.
pub struct TunnelInfo {
    id: u64,
    /// Hops from the gateway (index 0) to the endpoint.
    peers: Vec<Hash>,
    send_tunnel_id: TunnelId,
    receive_tunnel_id: TunnelId,
    /// Milliseconds since the epoch.
    expiration: u64,
    verified_bytes: AtomicU64,
}

impl TunnelInfo {
    pub fn new(id: u64, peers: Vec<Hash>, send_tunnel_id: TunnelId, receive_tunnel_id: TunnelId, expiration: u64) -> Self {
        Self {
            id,
            peers,
            send_tunnel_id,
            receive_tunnel_id,
            expiration,
            verified_bytes: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn length(&self) -> usize {
        self.peers.len()
    }

    pub fn peer(&self, hop: usize) -> Option<&Hash> {
        self.peers.get(hop)
    }

    pub fn gateway(&self) -> Option<&Hash> {
        self.peers.first()
    }

    /// Tunnel id messages are sent into at the gateway (outbound tunnels).
    pub fn send_tunnel_id(&self) -> TunnelId {
        self.send_tunnel_id
    }

    /// Tunnel id others address at our gateway (inbound tunnels).
    pub fn receive_tunnel_id(&self) -> TunnelId {
        self.receive_tunnel_id
    }

    pub fn expiration(&self) -> u64 {
        self.expiration
    }

    pub fn increment_verified_bytes(&self, bytes: u64) {
        self.verified_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn verified_bytes(&self) -> u64 {
        self.verified_bytes.load(Ordering::Relaxed)
    }
}

impl PartialEq for TunnelInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TunnelInfo {}

impl fmt::Debug for TunnelInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelInfo")
            .field("id", &self.id)
            .field("hops", &self.peers.len())
            .field("send", &self.send_tunnel_id)
            .field("receive", &self.receive_tunnel_id)
            .finish()
    }
}
