// Copyright (c) 2024 Botho Foundation

//! Delivery of one client message.
//!
//! A job finds the recipient's lease set, picks a lease and one of our
//! outbound tunnels, wraps the payload in garlic and pushes it into the
//! tunnel. When it asks for an ack it then waits for the delivery status
//! reply or the overall deadline, whichever comes first:
//!
//! ```text
//! lookup lease set -> select lease -> select tunnels -> build -> dispatch
//!                                                                  |
//!                              ack requested? -- no --> best effort success
//!                                   | yes
//!                          reply before deadline? -- no --> failure
//!                                   | yes
//!                            guaranteed success
//! ```
//!
//! The client hears about the outcome exactly once. Routing choices are
//! remembered in the [`OutboundCache`] and forgotten again when a send fails.

use super::{
    client::ClientMessage,
    helper::{create_garlic_message, AckRequest, OutboundGarlic},
    outbound_cache::{HashPair, OutboundCache},
    status::MessageStatus,
};
use crate::{
    crypto::{TagSetHandle, TransientSessionKeyManager},
    garlic::{random_id, GarlicConfig, GarlicMessageBuilder, CLOCK_FUDGE_FACTOR},
    router::{PendingId, ReplySelector, RouterContext, TunnelInfo},
};
use alm_data::{DataMessage, DeliveryInstructions, I2npMessage, Lease, LeaseSet, MessageBody};
use rand::{seq::SliceRandom, thread_rng, Rng};
use std::{sync::Arc, time::Duration};
use tokio::{sync::oneshot, task::JoinHandle, time};
use tracing::{debug, info, warn};

/// Send timeout when neither the message nor its session sets one.
pub const OVERALL_TIMEOUT_MS_DEFAULT: u64 = 60 * 1000;
/// Shortest timeout honoured when the lease set is already known.
pub const OVERALL_TIMEOUT_MS_MIN: u64 = 8 * 1000;
pub const OVERALL_TIMEOUT_MS_MAX: u64 = 90 * 1000;
/// Longest we wait for a lease set lookup.
pub const LS_LOOKUP_TIMEOUT: u64 = 15 * 1000;
/// Shortest timeout honoured when the lease set must be looked up first.
const OVERALL_TIMEOUT_NOLS_MIN: u64 = OVERALL_TIMEOUT_MS_MIN + LS_LOOKUP_TIMEOUT;
/// Reply selectors live at least this long after the start.
const REPLY_TIMEOUT_MS_MIN: u64 = OVERALL_TIMEOUT_MS_DEFAULT - 5 * 1000;
/// Ask for an ack at least this often per sender/recipient pair.
const REPLY_REQUEST_INTERVAL: u64 = 60 * 1000;
/// Lease set lookups per job, counting the first.
const MAX_LEASE_LOOKUPS: usize = 2;
/// Requested expirations below this are intervals, not timestamps.
const INTERVAL_CUTOFF: u64 = 24 * 60 * 60 * 1000;

/// Success may follow failure, never the other way round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Pending,
    Failed,
    Succeeded,
}

/// State of one outbound client message.
#[derive(Debug)]
pub struct OutboundClientMessageJob {
    ctx: Arc<RouterContext>,
    cache: Arc<OutboundCache>,
    message: ClientMessage,
    pair: HashPair,
    start: u64,
    overall_expiration: u64,
    lease_set: Option<LeaseSet>,
    lookups: usize,
    lease: Option<Lease>,
    out_tunnel: Option<Arc<TunnelInfo>>,
    in_tunnel: Option<Arc<TunnelInfo>>,
    want_ack: bool,
    outcome: Outcome,
    reported: Option<MessageStatus>,
}

/// Reply wait registered for a send that asked for an ack.
struct PendingReply {
    id: PendingId,
    reply: oneshot::Receiver<I2npMessage>,
    expiration: u64,
    skm: Arc<TransientSessionKeyManager>,
    tags: Option<TagSetHandle>,
}

impl OutboundClientMessageJob {
    /// Prepare a send of `message`.
    ///
    /// The deadline is the message's own expiration if it has one, clamped to
    /// `8s..=90s` from now (at least 23s when the lease set still has to be
    /// looked up). Otherwise the session's `clientMessageTimeout`, then the
    /// router default, applies.
    pub fn new(ctx: Arc<RouterContext>, cache: Arc<OutboundCache>, message: ClientMessage) -> Self {
        let start = ctx.now();
        let pair = HashPair::new(message.from_hash(), message.to_hash());
        let lease_set = ctx.net_db().lookup_lease_set_locally(&pair.to);

        let overall_expiration = if message.expiration > 0 {
            let mut expiration = message.expiration;
            if expiration < INTERVAL_CUTOFF {
                warn!(expiration, "client sent an interval instead of a timestamp");
                expiration = expiration.saturating_add(start);
            }
            if expiration > start {
                let min = if lease_set.is_some() {
                    OVERALL_TIMEOUT_MS_MIN
                } else {
                    OVERALL_TIMEOUT_NOLS_MIN
                };
                expiration.clamp(start + min, start + OVERALL_TIMEOUT_MS_MAX)
            } else {
                warn!(msg = message.message_id, "expired before we got to it");
                expiration
            }
        } else {
            let timeout = message
                .options
                .client_message_timeout()
                .unwrap_or(ctx.config().client.client_message_timeout_ms);
            if timeout > OVERALL_TIMEOUT_MS_MAX {
                warn!(timeout, "client message timeout too long, using the maximum");
            }
            start + timeout.min(OVERALL_TIMEOUT_MS_MAX)
        };

        Self {
            ctx,
            cache,
            message,
            pair,
            start,
            overall_expiration,
            lease_set,
            lookups: 0,
            lease: None,
            out_tunnel: None,
            in_tunnel: None,
            want_ack: false,
            outcome: Outcome::Pending,
            reported: None,
        }
    }

    /// Milliseconds since the epoch at which the send gives up.
    pub fn overall_expiration(&self) -> u64 {
        self.overall_expiration
    }

    /// The status the client was told, if any yet.
    pub fn reported_status(&self) -> Option<MessageStatus> {
        self.reported
    }

    /// Run the job on the tokio runtime.
    pub fn spawn(mut self) -> JoinHandle<MessageStatus> {
        tokio::spawn(async move { self.run().await })
    }

    /// Deliver the message and wait for its outcome. Returns the status the
    /// client was told.
    pub async fn run(&mut self) -> MessageStatus {
        let now = self.ctx.now();
        if now >= self.overall_expiration {
            return self.fail(MessageStatus::Expired);
        }

        match &self.lease_set {
            Some(ls) => {
                self.ctx.metrics().inc_lease_set_found_local();
                if !ls.is_current(now, CLOCK_FUDGE_FACTOR / 4) {
                    warn!(
                        to = %self.pair.to,
                        expired_ms = now.saturating_sub(ls.latest_lease_date()),
                        "lease set expired, firing search"
                    );
                    self.ctx
                        .net_db()
                        .lookup_lease_set_remotely(&self.pair.to, &self.pair.from);
                }
            }
            None => {
                if let Err(status) = self.lookup_lease_set().await {
                    return self.fail(status);
                }
            }
        }

        loop {
            self.want_ack = false;
            match self.get_next_lease() {
                Ok(()) => return self.send().await,
                Err(MessageStatus::BadLeaseSet)
                    if self.lookups < MAX_LEASE_LOOKUPS && self.ctx.now() < self.overall_expiration =>
                {
                    info!(to = %self.pair.to, "no usable lease, looking up the lease set again");
                    self.ctx.net_db().fail(&self.pair.to);
                    self.lease_set = None;
                    if let Err(status) = self.lookup_lease_set().await {
                        return self.fail(status);
                    }
                }
                Err(status) => return self.fail(status),
            }
        }
    }

    /// Give up on the message.
    ///
    /// Only the first failure reaches the client, and nothing does once the
    /// send succeeded. The cached lease and tunnels this send used are
    /// dropped so the next send picks new ones. Returns the status the
    /// client was told.
    pub fn fail(&mut self, status: MessageStatus) -> MessageStatus {
        if self.outcome != Outcome::Pending {
            warn!(msg = self.message.message_id, %status, outcome = ?self.outcome, "FAIL-AFTER-{:?}", self.outcome);
            return self.reported.unwrap_or(status);
        }
        self.outcome = Outcome::Failed;
        warn!(
            msg = self.message.message_id,
            to = %self.pair.to,
            %status,
            lease = ?self.lease,
            out = ?self.out_tunnel,
            ack = ?self.in_tunnel,
            elapsed_ms = self.ctx.now().saturating_sub(self.start),
            "send failed"
        );
        self.cache.clear_caches(
            &self.pair,
            self.lease.as_ref(),
            self.in_tunnel.as_deref(),
            self.out_tunnel.as_deref(),
        );
        self.ctx.metrics().inc_send_failed();
        self.notify(status)
    }

    fn notify(&mut self, status: MessageStatus) -> MessageStatus {
        self.ctx.client_manager().message_delivery_status_update(
            &self.message.from,
            self.message.message_id,
            self.message.nonce,
            status,
        );
        self.reported = Some(status);
        status
    }

    async fn lookup_lease_set(&mut self) -> Result<(), MessageStatus> {
        self.lookups += 1;
        let begin = self.ctx.now();
        let remaining = self.overall_expiration.saturating_sub(begin);
        let timeout = Duration::from_millis(LS_LOOKUP_TIMEOUT.min(remaining));
        debug!(to = %self.pair.to, ?timeout, "looking up lease set");

        let lookup = self
            .ctx
            .net_db()
            .lookup_lease_set(&self.pair.to, &self.pair.from, timeout);
        let found = time::timeout(timeout, lookup).await.ok().flatten();
        let elapsed_ms = self.ctx.now().saturating_sub(begin);

        match found {
            Some(ls) => {
                debug!(to = %self.pair.to, elapsed_ms, "lease set found remotely");
                self.ctx.metrics().inc_lease_set_found_remote();
                self.lease_set = Some(ls);
                Ok(())
            }
            None => {
                self.ctx.metrics().inc_lease_set_lookup_failed();
                if self.ctx.net_db().is_negative_cached(&self.pair.to) {
                    warn!(to = %self.pair.to, "recipient uses an unsupported encryption type");
                    Err(MessageStatus::UnsupportedEncryption)
                } else {
                    warn!(to = %self.pair.to, elapsed_ms, "could not find the recipient's lease set");
                    Err(MessageStatus::NoLeaseSet)
                }
            }
        }
    }

    /// Choose the lease to send to.
    ///
    /// The cached lease is reused while it is current and still published.
    /// Otherwise a random unexpired lease is taken, preferring gateways we
    /// could reach last time, and an ack is requested to confirm the new
    /// path.
    fn get_next_lease(&mut self) -> Result<(), MessageStatus> {
        let now = self.ctx.now();
        if self.lease_set.is_none() {
            self.lease_set = self.ctx.net_db().lookup_lease_set_locally(&self.pair.to);
        }
        let Some(ls) = &self.lease_set else {
            warn!(to = %self.pair.to, "lease set vanished before we could use it");
            return Err(MessageStatus::NoLeaseSet);
        };

        if let Some(cached) = self.cache.lease(&self.pair) {
            if !cached.is_expired(now, CLOCK_FUDGE_FACTOR / 4) && ls.leases().iter().any(|l| l.same_path(&cached)) {
                debug!(to = %self.pair.to, "reusing cached lease");
                self.lease = Some(cached);
                return Ok(());
            }
            self.cache.remove_lease(&self.pair, &cached);
            debug!(to = %self.pair.to, "cached lease is gone");
        }

        let usable = |fudge: u64| -> Vec<Lease> {
            ls.leases()
                .iter()
                .filter(|l| !l.is_expired(now, fudge))
                .cloned()
                .collect()
        };
        let mut leases = usable(CLOCK_FUDGE_FACTOR / 4);
        if leases.is_empty() {
            leases = usable(CLOCK_FUDGE_FACTOR);
        }
        if leases.is_empty() {
            info!(to = %self.pair.to, published = ls.lease_count(), "no unexpired leases");
            return Err(MessageStatus::BadLeaseSet);
        }

        leases.shuffle(&mut thread_rng());
        let comm = self.ctx.comm_system();
        let index = match leases.iter().position(|l| !comm.was_unreachable(&l.gateway)) {
            Some(index) => index,
            None => {
                warn!(to = %self.pair.to, "all lease gateways are unreachable");
                0
            }
        };
        let lease = leases.swap_remove(index);
        self.cache.put_lease(self.pair, lease.clone());
        self.lease = Some(lease);
        self.want_ack = true;
        Ok(())
    }

    /// Choose our outbound tunnel.
    ///
    /// A tunnel we left because its first hop was backlogged is resumed once
    /// the backlog clears, so an observer cannot learn who we are by causing
    /// a backlog and watching the traffic move. Otherwise the cached tunnel
    /// is kept unless it went bad or backlogged. Any change requests an ack.
    fn select_outbound_tunnel(&mut self) -> Option<Arc<TunnelInfo>> {
        let from = self.pair.from;
        let manager = self.ctx.tunnel_manager();
        let comm = self.ctx.comm_system();
        let backlogged = |t: &TunnelInfo| t.peer(1).is_some_and(|hop| comm.is_backlogged(hop));
        let mut tunnels = self.cache.tunnels();

        if let Some(tunnel) = tunnels.backlogged.get(&self.pair).cloned() {
            if manager.is_valid_tunnel(&from, &tunnel) {
                if !backlogged(&tunnel) {
                    warn!(?tunnel, to = %self.pair.to, "switching back to tunnel");
                    tunnels.backlogged.remove(&self.pair);
                    tunnels.main.insert(self.pair, tunnel.clone());
                    self.want_ack = true;
                    return Some(tunnel);
                }
            } else {
                tunnels.backlogged.remove(&self.pair);
            }
        }

        if let Some(tunnel) = tunnels.main.get(&self.pair).cloned() {
            if manager.is_valid_tunnel(&from, &tunnel) {
                if tunnel.length() <= 1 || !backlogged(&tunnel) {
                    return Some(tunnel);
                }
                warn!(?tunnel, to = %self.pair.to, "switching from backlogged tunnel");
                tunnels.backlogged.insert(self.pair, tunnel);
            }
            tunnels.main.remove(&self.pair);
        }

        let tunnel = manager.select_outbound_tunnel(&from);
        if let Some(tunnel) = &tunnel {
            tunnels.main.insert(self.pair, tunnel.clone());
        }
        self.want_ack = true;
        tunnel
    }

    fn allow_lease_bundle(&self) -> bool {
        if self.message.flags.no_lease_set {
            return false;
        }
        let client = &self.ctx.config().client;
        let options = &self.message.options;
        if !options
            .should_bundle_reply_info()
            .unwrap_or(client.should_bundle_reply_info)
        {
            return false;
        }
        let probability = options
            .bundle_reply_info_probability()
            .unwrap_or(client.bundle_reply_info_probability);
        probability >= 100 || thread_rng().gen_range(0..100) < probability
    }

    /// Our current lease set, unless the copy we last bundled to this peer is
    /// identical.
    fn reply_lease_set(&self) -> Option<LeaseSet> {
        let ours = self.ctx.net_db().lookup_lease_set_locally(&self.pair.from)?;
        match self.cache.put_reply_lease_set(self.pair, ours.clone()) {
            Some(previous) if previous == ours => {
                debug!(to = %self.pair.to, "reply lease set already sent");
                None
            }
            _ => Some(ours),
        }
    }

    fn data_clove(&self, now: u64) -> Option<GarlicConfig> {
        let mut rng = thread_rng();
        let expiration = now + OVERALL_TIMEOUT_MS_DEFAULT;
        let data = match DataMessage::new(self.message.payload.clone()) {
            Ok(data) => data,
            Err(err) => {
                warn!(msg = self.message.message_id, %err, "unsendable payload");
                return None;
            }
        };
        let message = I2npMessage::new(random_id(&mut rng), expiration, MessageBody::Data(data));
        Some(GarlicConfig::payload(
            random_id(&mut rng),
            expiration,
            DeliveryInstructions::destination(self.pair.to),
            message,
        ))
    }

    async fn send(&mut self) -> MessageStatus {
        if self.outcome != Outcome::Pending {
            warn!(msg = self.message.message_id, "SEND-AFTER-{:?}", self.outcome);
            return self.reported.unwrap_or(MessageStatus::GuaranteedFailure);
        }
        let now = self.ctx.now();
        if now >= self.overall_expiration {
            return self.fail(MessageStatus::Expired);
        }

        let Some(out_tunnel) = self.select_outbound_tunnel() else {
            warn!(to = %self.pair.to, "no outbound tunnels");
            return self.fail(MessageStatus::NoLocalTunnels);
        };
        self.out_tunnel = Some(out_tunnel.clone());
        let (Some(lease_set), Some(lease)) = (self.lease_set.clone(), self.lease.clone()) else {
            return self.fail(MessageStatus::NoLeaseSet);
        };
        let recipient_key = *lease_set.encryption_key();
        let Some(skm) = self.ctx.client_manager().client_session_key_manager(&self.pair.from) else {
            warn!(from = %self.pair.from, "sending destination has no session");
            return self.fail(MessageStatus::NoLocalTunnels);
        };

        let flags = self.message.flags;
        let options = &self.message.options;
        let tags_to_send = match flags.tags_to_send {
            0 => options.tags_to_send().unwrap_or(skm.tags_to_send()),
            n => n,
        };
        let low_threshold = match flags.tag_threshold {
            0 => options.low_tag_threshold().unwrap_or(skm.low_threshold()),
            n => n,
        };

        let should_request_reply = self
            .cache
            .last_reply_request(&self.pair)
            .map_or(true, |sent| sent < now.saturating_sub(REPLY_REQUEST_INTERVAL));
        let mut want_ack = self.want_ack
            || should_request_reply
            || GarlicMessageBuilder::needs_tags(&skm, &recipient_key, low_threshold);

        let reply_lease_set = if self.allow_lease_bundle() {
            let ls = self.reply_lease_set();
            // so we know they got it
            want_ack |= ls.is_some();
            ls
        } else {
            None
        };

        let mut ack = None;
        if want_ack {
            self.cache.set_last_reply_request(self.pair, now);
            let token = random_id(&mut thread_rng());
            let in_tunnel = self
                .ctx
                .tunnel_manager()
                .select_inbound_tunnel(&self.pair.from, &self.pair.to);
            let Some((in_tunnel, gateway)) = in_tunnel.and_then(|t| t.gateway().copied().map(|gw| (t, gw))) else {
                warn!(to = %self.pair.to, "no inbound tunnel for the ack");
                return self.fail(MessageStatus::NoLocalTunnels);
            };
            ack = Some((token, gateway, in_tunnel.receive_tunnel_id()));
            self.in_tunnel = Some(in_tunnel);
        }

        let Some(data_clove) = self.data_clove(now) else {
            return self.fail(MessageStatus::UnsupportedEncryption);
        };
        let reply_key = *self.message.from.public_key();
        let request = OutboundGarlic {
            recipient_key: &recipient_key,
            data_clove,
            expiration: self.overall_expiration,
            ack: ack.map(|(token, reply_gateway, reply_tunnel)| AckRequest {
                token,
                reply_gateway,
                reply_tunnel,
                reply_key: &reply_key,
            }),
            reply_lease_set,
            tags_to_send,
            low_threshold,
        };
        let builder = GarlicMessageBuilder::new(self.ctx.engine().clone());
        let built = match create_garlic_message(&builder, &skm, now, request) {
            Ok(built) => built,
            Err(err) => {
                warn!(to = %self.pair.to, %err, "unable to build the garlic message");
                return self.fail(MessageStatus::NoLocalTunnels);
            }
        };

        let pending = ack.map(|(token, _, _)| {
            let tags = (!built.tags.is_empty())
                .then(|| skm.tags_delivered(&recipient_key, &built.key, built.tags.clone()));
            let expiration = self.overall_expiration.max(self.start + REPLY_TIMEOUT_MS_MIN);
            let (id, reply) = self
                .ctx
                .message_registry()
                .register_pending(Box::new(ReplySelector::new(token, expiration)));
            PendingReply {
                id,
                reply,
                expiration,
                skm: skm.clone(),
                tags,
            }
        });

        debug!(
            msg = self.message.message_id,
            to = %self.pair.to,
            out = %out_tunnel.send_tunnel_id(),
            lease_tunnel = %lease.tunnel_id,
            gateway = %lease.gateway,
            want_ack,
            new_session = built.new_session,
            tags = built.tags.len(),
            "dispatching"
        );
        self.ctx.tunnel_dispatcher().dispatch_outbound(
            built.message,
            out_tunnel.send_tunnel_id(),
            lease.tunnel_id,
            &lease.gateway,
        );
        self.ctx.metrics().inc_send_dispatched();

        match pending {
            Some(pending) => self.await_reply(pending).await,
            None => {
                self.outcome = Outcome::Succeeded;
                self.ctx.metrics().inc_send_best_effort();
                self.notify(MessageStatus::BestEffortSuccess)
            }
        }
    }

    /// Wait for the ack until the deadline. A reply selector that outlives
    /// the deadline is still honoured afterwards so the tags it confirms are
    /// not lost.
    async fn await_reply(&mut self, pending: PendingReply) -> MessageStatus {
        let PendingReply {
            id,
            mut reply,
            expiration,
            skm,
            tags,
        } = pending;
        let wait = Duration::from_millis(self.overall_expiration.saturating_sub(self.ctx.now()));

        match time::timeout(wait, &mut reply).await {
            Ok(Ok(_)) => return self.on_reply(&skm, tags.as_ref()),
            // selector dropped by the registry
            Ok(Err(_)) => return self.on_timeout(&skm, tags.as_ref()),
            Err(_) => {}
        }

        let status = self.on_timeout(&skm, tags.as_ref());
        let late = Duration::from_millis(expiration.saturating_sub(self.ctx.now()));
        if !late.is_zero() {
            if let Ok(Ok(_)) = time::timeout(late, reply).await {
                self.on_reply(&skm, tags.as_ref());
                return status;
            }
        }
        self.ctx.message_registry().unregister(id);
        status
    }

    fn on_reply(&mut self, skm: &TransientSessionKeyManager, tags: Option<&TagSetHandle>) -> MessageStatus {
        let elapsed_ms = self.ctx.now().saturating_sub(self.start);
        match self.outcome {
            Outcome::Succeeded => {
                warn!(msg = self.message.message_id, "SUCCESS-AFTER-SUCCESS");
                return MessageStatus::GuaranteedSuccess;
            }
            Outcome::Failed => {
                if let Some(tags) = tags {
                    skm.tags_acked(tags);
                }
                self.outcome = Outcome::Succeeded;
                self.ctx.metrics().inc_success_after_timeout();
                warn!(msg = self.message.message_id, elapsed_ms, "SUCCESS-AFTER-TIMEOUT");
                return self.reported.unwrap_or(MessageStatus::BestEffortFailure);
            }
            Outcome::Pending => {}
        }

        self.outcome = Outcome::Succeeded;
        if let Some(tags) = tags {
            skm.tags_acked(tags);
        }
        info!(msg = self.message.message_id, to = %self.pair.to, elapsed_ms, "acked");
        self.ctx.metrics().inc_send_acked();

        if let Some(out) = &self.out_tunnel {
            let mut size = self.message.payload.len() as u64;
            if out.length() > 0 {
                // tunnel messages travel in ~1KB blocks
                size = size.div_ceil(1024) * 1024;
            }
            out.increment_verified_bytes(size);
        }
        self.notify(MessageStatus::GuaranteedSuccess)
    }

    fn on_timeout(&mut self, skm: &TransientSessionKeyManager, tags: Option<&TagSetHandle>) -> MessageStatus {
        if self.outcome == Outcome::Succeeded {
            info!(msg = self.message.message_id, "TIMEOUT-AFTER-SUCCESS");
            return self.reported.unwrap_or(MessageStatus::GuaranteedSuccess);
        }
        if let Some(tags) = tags {
            skm.fail_tags(tags);
        }
        self.ctx.metrics().inc_send_expired();
        self.fail(MessageStatus::BestEffortFailure)
    }
}
