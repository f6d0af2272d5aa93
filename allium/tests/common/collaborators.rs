// Copyright (c) 2024 Botho Foundation

//! In-memory stand-ins for the subsystems around the router core.

use allium::{
    message::MessageStatus,
    router::{ClientManager, CommSystem, NetDb, TunnelDispatcher, TunnelInfo, TunnelManager},
    TransientSessionKeyManager,
};
use alm_data::{Destination, Hash, I2npMessage, LeaseSet, PrivateKey, TunnelId};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::mpsc;

/// Lease sets we hold, lease sets "the network" would return, and
/// destinations known to be unreachable.
#[derive(Debug, Default)]
pub struct MockNetDb {
    local: Mutex<HashMap<Hash, LeaseSet>>,
    remote: Mutex<HashMap<Hash, LeaseSet>>,
    negative: Mutex<HashSet<Hash>>,
    failed: Mutex<Vec<Hash>>,
    lookups: AtomicUsize,
    background_lookups: AtomicUsize,
}

impl MockNetDb {
    pub fn publish_local(&self, lease_set: LeaseSet) {
        self.local.lock().insert(lease_set.hash(), lease_set);
    }

    pub fn publish_remote(&self, lease_set: LeaseSet) {
        self.remote.lock().insert(lease_set.hash(), lease_set);
    }

    pub fn mark_negative(&self, key: Hash) {
        self.negative.lock().insert(key);
    }

    pub fn local(&self, key: &Hash) -> Option<LeaseSet> {
        self.local.lock().get(key).cloned()
    }

    pub fn failed(&self) -> Vec<Hash> {
        self.failed.lock().clone()
    }

    /// Blocking lookups made so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn background_lookups(&self) -> usize {
        self.background_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NetDb for MockNetDb {
    fn lookup_lease_set_locally(&self, key: &Hash) -> Option<LeaseSet> {
        self.local(key)
    }

    async fn lookup_lease_set(&self, key: &Hash, _from: &Hash, _timeout: Duration) -> Option<LeaseSet> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let found = self.remote.lock().get(key).cloned();
        if let Some(ls) = &found {
            self.publish_local(ls.clone());
        }
        found
    }

    fn lookup_lease_set_remotely(&self, _key: &Hash, _from: &Hash) {
        self.background_lookups.fetch_add(1, Ordering::SeqCst);
    }

    fn store(&self, key: Hash, lease_set: LeaseSet) {
        self.local.lock().insert(key, lease_set);
    }

    fn fail(&self, key: &Hash) {
        self.local.lock().remove(key);
        self.failed.lock().push(*key);
    }

    fn is_negative_cached(&self, key: &Hash) -> bool {
        self.negative.lock().contains(key)
    }
}

/// One outbound and one inbound tunnel per local destination.
#[derive(Debug, Default)]
pub struct MockTunnels {
    outbound: Mutex<HashMap<Hash, Arc<TunnelInfo>>>,
    inbound: Mutex<HashMap<Hash, Arc<TunnelInfo>>>,
    invalid: Mutex<HashSet<u64>>,
}

impl MockTunnels {
    pub fn set_outbound(&self, from: Hash, tunnel: Arc<TunnelInfo>) {
        self.outbound.lock().insert(from, tunnel);
    }

    pub fn remove_outbound(&self, from: &Hash) {
        self.outbound.lock().remove(from);
    }

    pub fn set_inbound(&self, dest: Hash, tunnel: Arc<TunnelInfo>) {
        self.inbound.lock().insert(dest, tunnel);
    }

    pub fn invalidate(&self, tunnel_id: u64) {
        self.invalid.lock().insert(tunnel_id);
    }
}

impl TunnelManager for MockTunnels {
    fn select_outbound_tunnel(&self, from: &Hash) -> Option<Arc<TunnelInfo>> {
        self.outbound.lock().get(from).cloned()
    }

    fn select_inbound_tunnel(&self, from: &Hash, _to: &Hash) -> Option<Arc<TunnelInfo>> {
        self.inbound.lock().get(from).cloned()
    }

    fn is_valid_tunnel(&self, _from: &Hash, tunnel: &TunnelInfo) -> bool {
        !self.invalid.lock().contains(&tunnel.id())
    }
}

/// A message handed to an outbound tunnel.
#[derive(Debug)]
pub struct Dispatched {
    pub message: I2npMessage,
    pub out_tunnel: TunnelId,
    pub target_tunnel: TunnelId,
    pub gateway: Hash,
}

/// Queues outbound tunnel traffic for the test to pick up.
#[derive(Debug)]
pub struct RecordingDispatcher {
    outbound: mpsc::UnboundedSender<Dispatched>,
    to_tunnels: Mutex<Vec<(I2npMessage, Hash, TunnelId)>>,
}

impl RecordingDispatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Dispatched>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Self {
            outbound: tx,
            to_tunnels: Mutex::new(Vec::new()),
        };
        (dispatcher, rx)
    }

    /// Messages sent straight to a tunnel gateway, oldest first.
    pub fn take_tunnel_messages(&self) -> Vec<(I2npMessage, Hash, TunnelId)> {
        std::mem::take(&mut *self.to_tunnels.lock())
    }
}

impl TunnelDispatcher for RecordingDispatcher {
    fn dispatch_outbound(&self, message: I2npMessage, out_tunnel: TunnelId, target_tunnel: TunnelId, gateway: &Hash) {
        let _ = self.outbound.send(Dispatched {
            message,
            out_tunnel,
            target_tunnel,
            gateway: *gateway,
        });
    }

    fn dispatch_to_tunnel(&self, message: I2npMessage, gateway: &Hash, tunnel_id: TunnelId) {
        self.to_tunnels.lock().push((message, *gateway, tunnel_id));
    }
}

#[derive(Debug, Default)]
pub struct MockComm {
    sent: Mutex<Vec<(I2npMessage, Hash)>>,
    unreachable: Mutex<HashSet<Hash>>,
    backlogged: Mutex<HashSet<Hash>>,
}

impl MockComm {
    pub fn sent(&self) -> Vec<(I2npMessage, Hash)> {
        self.sent.lock().clone()
    }

    pub fn set_unreachable(&self, router: Hash) {
        self.unreachable.lock().insert(router);
    }

    pub fn set_backlogged(&self, router: Hash, backlogged: bool) {
        let mut set = self.backlogged.lock();
        if backlogged {
            set.insert(router);
        } else {
            set.remove(&router);
        }
    }
}

impl CommSystem for MockComm {
    fn send_to_router(&self, message: I2npMessage, router: &Hash) {
        self.sent.lock().push((message, *router));
    }

    fn was_unreachable(&self, router: &Hash) -> bool {
        self.unreachable.lock().contains(router)
    }

    fn is_backlogged(&self, router: &Hash) -> bool {
        self.backlogged.lock().contains(router)
    }
}

#[derive(Debug, Clone)]
pub struct LocalClient {
    pub destination: Destination,
    pub private_key: PrivateKey,
    pub skm: Arc<TransientSessionKeyManager>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusUpdate {
    pub from: Hash,
    pub message_id: u64,
    pub nonce: u32,
    pub status: MessageStatus,
}

/// Local destinations and what was delivered to them.
#[derive(Debug, Default)]
pub struct MockClients {
    clients: Mutex<HashMap<Hash, LocalClient>>,
    received: Mutex<Vec<(Hash, Vec<u8>)>>,
    statuses: Mutex<Vec<StatusUpdate>>,
}

impl MockClients {
    pub fn add(&self, client: LocalClient) {
        self.clients
            .lock()
            .insert(client.destination.calculate_hash(), client);
    }

    pub fn client(&self, dest: &Hash) -> Option<LocalClient> {
        self.clients.lock().get(dest).cloned()
    }

    pub fn received(&self) -> Vec<(Hash, Vec<u8>)> {
        self.received.lock().clone()
    }

    pub fn statuses(&self) -> Vec<StatusUpdate> {
        self.statuses.lock().clone()
    }
}

impl ClientManager for MockClients {
    fn client_session_key_manager(&self, dest: &Hash) -> Option<Arc<TransientSessionKeyManager>> {
        self.clients.lock().get(dest).map(|c| c.skm.clone())
    }

    fn client_private_key(&self, dest: &Hash) -> Option<PrivateKey> {
        self.clients.lock().get(dest).map(|c| c.private_key.clone())
    }

    fn is_local(&self, dest: &Hash) -> bool {
        self.clients.lock().contains_key(dest)
    }

    fn message_received(&self, dest: &Hash, payload: Vec<u8>) {
        self.received.lock().push((*dest, payload));
    }

    fn message_delivery_status_update(&self, from: &Destination, message_id: u64, nonce: u32, status: MessageStatus) {
        self.statuses.lock().push(StatusUpdate {
            from: from.calculate_hash(),
            message_id,
            nonce,
            status,
        });
    }

    fn local_destinations(&self) -> Vec<Hash> {
        self.clients.lock().keys().copied().collect()
    }
}
