// Copyright (c) 2024 Botho Foundation

//! Per sender/recipient routing memory.
//!
//! Consecutive messages between the same two destinations reuse the same
//! lease and outbound tunnel while they stay good, so that a stream running on
//! top sees its messages arrive in order. The cache also remembers the last
//! reply lease set bundled to a peer and when we last asked it for an ack.

use crate::{garlic::CLOCK_FUDGE_FACTOR, router::TunnelManager, router::TunnelInfo};
use alm_data::{Hash, Lease, LeaseSet};
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use std::{collections::HashMap, sync::Arc};
use tracing::debug;

/// Cache key: the sending and the receiving destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HashPair {
    pub from: Hash,
    pub to: Hash,
}

impl HashPair {
    pub fn new(from: Hash, to: Hash) -> Self {
        Self { from, to }
    }
}

/// The tunnel in use per pair, and the one we moved away from because it was
/// backlogged.
///
/// Both maps live under one lock so a send sees them consistently.
#[derive(Debug, Default)]
pub struct TunnelCaches {
    pub main: HashMap<HashPair, Arc<TunnelInfo>>,
    pub backlogged: HashMap<HashPair, Arc<TunnelInfo>>,
}

#[derive(Debug, Default)]
pub struct OutboundCache {
    lease_sets: DashMap<HashPair, LeaseSet>,
    leases: DashMap<HashPair, Lease>,
    last_reply_requests: DashMap<HashPair, u64>,
    tunnels: Mutex<TunnelCaches>,
}

impl OutboundCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `lease_set` as the reply lease set last bundled for `pair`,
    /// returning the one it replaces.
    pub fn put_reply_lease_set(&self, pair: HashPair, lease_set: LeaseSet) -> Option<LeaseSet> {
        self.lease_sets.insert(pair, lease_set)
    }

    pub fn reply_lease_set(&self, pair: &HashPair) -> Option<LeaseSet> {
        self.lease_sets.get(pair).map(|ls| ls.clone())
    }

    pub fn lease(&self, pair: &HashPair) -> Option<Lease> {
        self.leases.get(pair).map(|l| l.clone())
    }

    pub fn put_lease(&self, pair: HashPair, lease: Lease) {
        self.leases.insert(pair, lease);
    }

    /// Remove the cached lease for `pair` only if it is still `lease`.
    pub fn remove_lease(&self, pair: &HashPair, lease: &Lease) -> bool {
        self.leases.remove_if(pair, |_, cached| cached == lease).is_some()
    }

    pub fn last_reply_request(&self, pair: &HashPair) -> Option<u64> {
        self.last_reply_requests.get(pair).map(|t| *t)
    }

    pub fn set_last_reply_request(&self, pair: HashPair, now: u64) {
        self.last_reply_requests.insert(pair, now);
    }

    /// Lock the tunnel caches for a selection.
    pub fn tunnels(&self) -> MutexGuard<'_, TunnelCaches> {
        self.tunnels.lock()
    }

    /// Forget the choices a failed send made, unless another send has
    /// replaced them in the meantime.
    ///
    /// A send that requested an ack also bundled our lease set, which may not
    /// have arrived either, so the reply lease set is dropped with it.
    pub fn clear_caches(
        &self,
        pair: &HashPair,
        lease: Option<&Lease>,
        in_tunnel: Option<&TunnelInfo>,
        out_tunnel: Option<&TunnelInfo>,
    ) {
        if in_tunnel.is_some() {
            self.lease_sets.remove(pair);
        }
        if let Some(lease) = lease {
            self.remove_lease(pair, lease);
        }
        if let Some(out) = out_tunnel {
            let mut tunnels = self.tunnels.lock();
            if tunnels.backlogged.get(pair).is_some_and(|t| t.as_ref() == out) {
                tunnels.backlogged.remove(pair);
            }
            if tunnels.main.get(pair).is_some_and(|t| t.as_ref() == out) {
                tunnels.main.remove(pair);
            }
        }
    }

    /// Drop entries whose lease set, lease or tunnel is no longer usable, and
    /// reply request times older than `max_age` ms. Returns the number of
    /// entries removed.
    pub fn sweep(&self, now: u64, max_age: u64, tunnel_manager: &dyn TunnelManager) -> usize {
        let mut removed = 0;

        let before = self.lease_sets.len();
        self.lease_sets.retain(|_, ls| ls.is_current(now, CLOCK_FUDGE_FACTOR));
        removed += before.saturating_sub(self.lease_sets.len());

        let before = self.leases.len();
        self.leases.retain(|_, lease| !lease.is_expired(now, CLOCK_FUDGE_FACTOR));
        removed += before.saturating_sub(self.leases.len());

        let before = self.last_reply_requests.len();
        self.last_reply_requests
            .retain(|_, sent| *sent >= now.saturating_sub(max_age));
        removed += before.saturating_sub(self.last_reply_requests.len());

        {
            let mut tunnels = self.tunnels.lock();
            let before = tunnels.main.len() + tunnels.backlogged.len();
            tunnels
                .main
                .retain(|pair, t| tunnel_manager.is_valid_tunnel(&pair.from, t));
            tunnels
                .backlogged
                .retain(|pair, t| tunnel_manager.is_valid_tunnel(&pair.from, t));
            removed += before - (tunnels.main.len() + tunnels.backlogged.len());
        }

        debug!(
            removed,
            lease_sets = self.lease_sets.len(),
            leases = self.leases.len(),
            "outbound cache sweep"
        );
        removed
    }
}
