// Copyright (c) 2024 Botho Foundation

use super::{
    clock::TokioClock,
    collaborators::{
        Dispatched, LocalClient, MockClients, MockComm, MockNetDb, MockTunnels, RecordingDispatcher, StatusUpdate,
    },
};
use allium::{
    router::TunnelInfo, ClientMessage, Clock, CloveDispatcher, Collaborators, OutboundCache, OutboundClientMessageJob,
    ReceiveScope, RouterConfig, RouterContext, TransientSessionKeyManager,
};
use alm_data::{Destination, Hash, Lease, LeaseSet, PrivateKey, TunnelId};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One router core wired to in-memory collaborators.
///
/// Every local destination of the harness lives on this router, so a
/// message can travel from one destination to another and its ack back
/// without a second router.
pub struct Harness {
    pub ctx: Arc<RouterContext>,
    pub cache: Arc<OutboundCache>,
    pub clock: Arc<TokioClock>,
    pub net_db: Arc<MockNetDb>,
    pub tunnels: Arc<MockTunnels>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub comm: Arc<MockComm>,
    pub clients: Arc<MockClients>,
    outbound: mpsc::UnboundedReceiver<Dispatched>,
    rng: ChaCha20Rng,
    next_tunnel: u64,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    pub fn with_config(config: RouterConfig) -> Self {
        let mut rng = ChaCha20Rng::seed_from_u64(0xa111);
        let clock = Arc::new(TokioClock::new());
        let net_db = Arc::new(MockNetDb::default());
        let tunnels = Arc::new(MockTunnels::default());
        let (dispatcher, outbound) = RecordingDispatcher::new();
        let dispatcher = Arc::new(dispatcher);
        let comm = Arc::new(MockComm::default());
        let clients = Arc::new(MockClients::default());

        let ctx = Arc::new(RouterContext::new(
            config,
            PrivateKey::random(&mut rng),
            clock.clone(),
            Collaborators {
                net_db: net_db.clone(),
                tunnel_manager: tunnels.clone(),
                tunnel_dispatcher: dispatcher.clone(),
                comm_system: comm.clone(),
                client_manager: clients.clone(),
            },
        ));

        Self {
            ctx,
            cache: Arc::new(OutboundCache::new()),
            clock,
            net_db,
            tunnels,
            dispatcher,
            comm,
            clients,
            outbound,
            rng,
            next_tunnel: 1,
        }
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    pub fn random_hash(&mut self) -> Hash {
        Hash::random(&mut self.rng)
    }

    /// Register a new local destination with its own session key manager.
    pub fn add_client(&mut self) -> Destination {
        let (destination, private_key) = Destination::random(&mut self.rng);
        let skm = Arc::new(TransientSessionKeyManager::new(
            self.ctx.config().session_keys.clone(),
            self.clock.clone(),
            self.ctx.metrics().clone(),
        ));
        self.clients.add(LocalClient {
            destination: destination.clone(),
            private_key,
            skm,
        });
        destination
    }

    pub fn client_skm(&self, dest: &Destination) -> Arc<TransientSessionKeyManager> {
        self.clients
            .client(&dest.calculate_hash())
            .map(|c| c.skm)
            .expect("not a local destination")
    }

    /// A lease through a random gateway ending `lifetime_ms` from now.
    pub fn lease(&mut self, lifetime_ms: i64) -> Lease {
        let end = (self.now() as i64 + lifetime_ms) as u64;
        let gateway = self.random_hash();
        Lease::new(gateway, TunnelId::random(&mut self.rng), end)
    }

    pub fn lease_set(&self, dest: &Destination, leases: Vec<Lease>) -> LeaseSet {
        LeaseSet::new(dest.clone(), *dest.public_key(), leases).expect("lease set")
    }

    /// Publish a lease set for `dest` in the local netdb.
    pub fn publish(&mut self, dest: &Destination, leases: Vec<Lease>) -> LeaseSet {
        let ls = self.lease_set(dest, leases);
        self.net_db.publish_local(ls.clone());
        ls
    }

    /// A two hop tunnel expiring in ten minutes.
    pub fn tunnel(&mut self) -> Arc<TunnelInfo> {
        let id = self.next_tunnel;
        self.next_tunnel += 1;
        let peers = vec![self.random_hash(), self.random_hash()];
        Arc::new(TunnelInfo::new(
            id,
            peers,
            TunnelId::random(&mut self.rng),
            TunnelId::random(&mut self.rng),
            self.now() + 600_000,
        ))
    }

    /// Give `dest` an outbound and an inbound tunnel.
    pub fn add_tunnels(&mut self, dest: &Destination) -> (Arc<TunnelInfo>, Arc<TunnelInfo>) {
        let out = self.tunnel();
        let inbound = self.tunnel();
        self.tunnels.set_outbound(dest.calculate_hash(), out.clone());
        self.tunnels.set_inbound(dest.calculate_hash(), inbound.clone());
        (out, inbound)
    }

    pub fn message(&mut self, from: &Destination, to: &Destination, payload: &[u8]) -> ClientMessage {
        let message_id = self.rng.next_u64();
        ClientMessage::new(from.clone(), to.clone(), payload.to_vec(), message_id).with_nonce(7)
    }

    pub fn job(&self, message: ClientMessage) -> OutboundClientMessageJob {
        OutboundClientMessageJob::new(self.ctx.clone(), self.cache.clone(), message)
    }

    pub async fn next_dispatched(&mut self) -> Dispatched {
        self.outbound.recv().await.expect("dispatcher closed")
    }

    pub fn try_next_dispatched(&mut self) -> Option<Dispatched> {
        self.outbound.try_recv().ok()
    }

    /// Receive a dispatched message at its destination `to`. Returns the
    /// number of cloves dispatched.
    pub fn deliver(&self, dispatched: &Dispatched, to: &Destination) -> usize {
        let garlic = dispatched.message.as_garlic().expect("garlic");
        CloveDispatcher::new(self.ctx.clone(), ReceiveScope::Client(to.calculate_hash()))
            .receive_garlic(garlic)
            .expect("garlic opens")
    }

    /// Carry every ack waiting at a tunnel gateway back into `from`'s inbound
    /// tunnel. Returns how many were delivered.
    pub fn return_acks(&self, from: &Destination) -> usize {
        let dispatcher = CloveDispatcher::new(self.ctx.clone(), ReceiveScope::Client(from.calculate_hash()));
        let mut delivered = 0;
        for (message, _, _) in self.dispatcher.take_tunnel_messages() {
            if let Some(garlic) = message.as_garlic() {
                delivered += dispatcher.receive_garlic(garlic).expect("ack opens");
            }
        }
        delivered
    }

    pub fn statuses(&self) -> Vec<StatusUpdate> {
        self.clients.statuses()
    }
}
