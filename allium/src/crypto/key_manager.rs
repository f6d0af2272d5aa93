// Copyright (c) 2024 Botho Foundation

//! Session key and session tag bookkeeping.
//!
//! [`TransientSessionKeyManager`] owns both directions of symmetric session
//! state:
//!
//! ```text
//!  outbound: target PublicKey ──► OutboundSession
//!                                   ├─ current SessionKey
//!                                   ├─ live tag sets   (ordered, spendable)
//!                                   ├─ unacked sets    (speculative)
//!                                   └─ failed sets     (restorable on late ack)
//!
//!  inbound:  SessionTag ──► tag set id ──► (SessionKey, expiration, tags)
//! ```
//!
//! Outbound sessions live in a sharded map with one mutex per session, so
//! traffic to one peer never waits on another. The inbound index is a single
//! mutex-guarded structure so that inserting a tag set and consuming a tag are
//! linearizable.
//!
//! # Speculative tags
//!
//! Until a peer has acknowledged at least one tag delivery, newly delivered
//! tags stay in the unacked pool and are not spent. Once the session has been
//! acked, new deliveries go straight to the live pool. Repeated delivery
//! failures revert the session so unconfirmed sets become speculative again.

use super::tag_set::{InboundTagSet, OutboundTagSet, TagSetHandle, TagSetId};
use crate::{clock::Clock, config::SessionKeyConfig, metrics::RouterMetrics};
use alm_data::{PublicKey, SessionKey, SessionTag};
use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{debug, info, warn};

/// Inbound index size (in tags) above which per-key pruning kicks in.
const AGGRESSIVE_PRUNE_THRESHOLD: usize = 500;

/// Keys holding at least this many inbound tag sets are pruning candidates.
const PRUNE_MIN_SETS_PER_KEY: usize = 10;

/// Only untouched sets larger than this are pruned.
const PRUNE_MIN_SET_SIZE: usize = 8;

const MINUTE_MS: u64 = 60 * 1000;

/// Per-peer outbound state. Always accessed under its own mutex.
#[derive(Debug)]
pub(crate) struct OutboundSession {
    target: PublicKey,
    current_key: SessionKey,
    established: u64,
    last_used: u64,
    tag_sets: Vec<OutboundTagSet>,
    unacked: Vec<OutboundTagSet>,
    failed: Vec<OutboundTagSet>,
    acked: bool,
    consecutive_failures: u32,
}

impl OutboundSession {
    fn new(target: PublicKey, key: SessionKey, now: u64) -> Self {
        Self {
            target,
            current_key: key,
            established: now,
            last_used: now,
            tag_sets: Vec::new(),
            unacked: Vec::new(),
            failed: Vec::new(),
            acked: false,
            consecutive_failures: 0,
        }
    }

    fn is_idle(&self, now: u64, lifetime: u64) -> bool {
        self.last_used < now.saturating_sub(lifetime)
    }

    fn set_current_key(&mut self, key: SessionKey, now: u64) {
        self.last_used = now;
        if self.current_key != key {
            let dropped: usize = self.tag_sets.iter().map(|s| s.remaining()).sum();
            if dropped > 0 {
                info!(
                    target_key = ?self.target,
                    dropped,
                    "rekeying outbound session, dropping live tags"
                );
            }
            self.tag_sets.clear();
            self.unacked.retain(|s| s.key == key);
            self.failed.clear();
            self.acked = false;
        }
        self.current_key = key;
    }

    fn add_tags(&mut self, set: OutboundTagSet, now: u64) {
        self.last_used = now;
        if self.acked {
            self.tag_sets.push(set);
        } else {
            self.unacked.push(set);
        }
    }

    fn ack_tags(&mut self, id: TagSetId) {
        if let Some(pos) = self.unacked.iter().position(|s| s.id == id) {
            let mut set = self.unacked.remove(pos);
            set.acked = true;
            self.tag_sets.push(set);
        } else if let Some(set) = self.tag_sets.iter_mut().find(|s| s.id == id) {
            if set.acked {
                debug!(tag_set = id, "tag set acked twice");
            }
            set.acked = true;
        } else if let Some(pos) = self.failed.iter().position(|s| s.id == id) {
            debug!(tag_set = id, "ack for previously failed tag set, restoring");
            let mut set = self.failed.remove(pos);
            set.acked = true;
            self.tag_sets.push(set);
        } else {
            debug!(tag_set = id, "ack for unknown tag set");
        }
        self.acked = true;
        self.consecutive_failures = 0;
    }

    fn fail_tags(&mut self, id: TagSetId, max_failures: u32) {
        if let Some(pos) = self.unacked.iter().position(|s| s.id == id) {
            let set = self.unacked.remove(pos);
            self.failed.push(set);
            return;
        }
        let Some(pos) = self.tag_sets.iter().position(|s| s.id == id) else {
            return;
        };
        let set = self.tag_sets.remove(pos);
        self.failed.push(set);
        self.consecutive_failures += 1;
        if self.consecutive_failures >= max_failures {
            self.acked = false;
            let (confirmed, unconfirmed): (Vec<_>, Vec<_>) =
                self.tag_sets.drain(..).partition(|s| s.acked);
            warn!(
                target_key = ?self.target,
                failures = self.consecutive_failures,
                confirmed = confirmed.len(),
                reverted = unconfirmed.len(),
                "repeated tag delivery failures, session no longer trusted"
            );
            self.tag_sets = confirmed;
            self.unacked.extend(unconfirmed);
        }
    }

    fn consume_next(&mut self, now: u64, duration: u64) -> Option<SessionTag> {
        self.last_used = now;
        while let Some(set) = self.tag_sets.first_mut() {
            if !set.is_expired(now, duration) && set.key == self.current_key {
                if let Some(tag) = set.take_next() {
                    return Some(tag);
                }
            }
            self.tag_sets.remove(0);
        }
        None
    }

    /// Spendable tags. Sets the peer has not confirmed count for a third.
    fn available_tags(&self, now: u64, duration: u64) -> usize {
        self.tag_sets
            .iter()
            .filter(|s| !s.is_expired(now, duration))
            .map(|s| {
                let sz = s.remaining();
                if s.acked {
                    sz
                } else {
                    (sz + 2) / 3
                }
            })
            .sum()
    }

    fn last_expiration(&self, duration: u64) -> Option<u64> {
        self.tag_sets
            .iter()
            .filter(|s| s.remaining() > 0)
            .map(|s| s.date)
            .max()
            .map(|date| date + duration)
    }

    /// Drop expired tag sets, returning how many went.
    fn expire_tags(&mut self, now: u64, duration: u64) -> usize {
        let before = self.tag_sets.len() + self.unacked.len() + self.failed.len();
        self.tag_sets.retain(|s| !s.is_expired(now, duration));
        self.unacked.retain(|s| !s.is_expired(now, duration));
        self.failed.retain(|s| !s.is_expired(now, duration));
        before - (self.tag_sets.len() + self.unacked.len() + self.failed.len())
    }

    fn tag_set_count(&self) -> usize {
        self.tag_sets.len() + self.unacked.len()
    }

    fn tag_count(&self) -> usize {
        self.tag_sets
            .iter()
            .chain(self.unacked.iter())
            .map(|s| s.remaining())
            .sum()
    }
}

/// All inbound tags, indexed both by tag and by tag set.
#[derive(Debug, Default)]
struct InboundIndex {
    tags: HashMap<SessionTag, TagSetId>,
    sets: HashMap<TagSetId, InboundTagSet>,
}

impl InboundIndex {
    fn remove_set(&mut self, id: TagSetId) -> usize {
        match self.sets.remove(&id) {
            Some(set) => {
                for tag in &set.tags {
                    self.tags.remove(tag);
                }
                set.tags.len()
            }
            None => 0,
        }
    }

    fn remove_sets(&mut self, ids: impl IntoIterator<Item = TagSetId>) -> usize {
        ids.into_iter().map(|id| self.remove_set(id)).sum()
    }
}

/// Counts describing the state of a [`TransientSessionKeyManager`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionKeyStats {
    pub inbound_tag_sets: usize,
    pub inbound_tags: usize,
    pub outbound_sessions: usize,
    pub outbound_tag_sets: usize,
    pub outbound_tags: usize,
}

/// In-memory session key manager. Nothing survives a restart.
#[derive(Debug)]
pub struct TransientSessionKeyManager {
    config: SessionKeyConfig,
    clock: Arc<dyn Clock>,
    metrics: Arc<RouterMetrics>,
    outbound: DashMap<PublicKey, Arc<Mutex<OutboundSession>>>,
    inbound: Mutex<InboundIndex>,
    next_sent_id: AtomicU64,
    next_received_id: AtomicU64,
}

impl TransientSessionKeyManager {
    pub fn new(config: SessionKeyConfig, clock: Arc<dyn Clock>, metrics: Arc<RouterMetrics>) -> Self {
        Self {
            config: config.clamped(),
            clock,
            metrics,
            outbound: DashMap::new(),
            inbound: Mutex::new(InboundIndex::default()),
            next_sent_id: AtomicU64::new(0),
            next_received_id: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &SessionKeyConfig {
        &self.config
    }

    /// Tags to bundle when a session runs low.
    pub fn tags_to_send(&self) -> usize {
        self.config.tags_to_send
    }

    pub fn low_threshold(&self) -> usize {
        self.config.low_tag_threshold
    }

    /// How long received tags stay valid unless the sender says otherwise.
    pub fn inbound_tag_lifetime(&self) -> Duration {
        self.config.session_lifetime()
    }

    fn tag_duration_ms(&self) -> u64 {
        self.config.tag_duration().as_millis() as u64
    }

    fn lifetime_ms(&self) -> u64 {
        self.config.session_lifetime().as_millis() as u64
    }

    fn session(&self, target: &PublicKey) -> Option<Arc<Mutex<OutboundSession>>> {
        self.outbound.get(target).map(|s| Arc::clone(s.value()))
    }

    fn new_session(&self, target: &PublicKey, key: SessionKey, now: u64) -> Arc<Mutex<OutboundSession>> {
        Arc::new(Mutex::new(OutboundSession::new(*target, key, now)))
    }

    /// The live session key for `target`, or `None` if there is no session or
    /// it has been idle longer than the session lifetime.
    pub fn get_current_key(&self, target: &PublicKey) -> Option<SessionKey> {
        let session = self.session(target)?;
        let sess = session.lock();
        if sess.is_idle(self.clock.now(), self.lifetime_ms()) {
            debug!(target_key = ?target, "outbound session expired");
            return None;
        }
        Some(sess.current_key.duplicate())
    }

    /// The live session key for `target`, creating a session with a fresh
    /// random key if there is none or the old one went idle.
    ///
    /// Concurrent callers for the same target always agree on the key.
    pub fn get_current_or_new_key(&self, target: &PublicKey) -> SessionKey {
        let now = self.clock.now();
        let lifetime = self.lifetime_ms();
        match self.outbound.entry(*target) {
            Entry::Occupied(mut entry) => {
                {
                    let sess = entry.get().lock();
                    if !sess.is_idle(now, lifetime) {
                        return sess.current_key.duplicate();
                    }
                }
                debug!(target_key = ?target, "replacing idle outbound session");
                let key = SessionKey::random(&mut rand::thread_rng());
                entry.insert(self.new_session(target, key.duplicate(), now));
                key
            }
            Entry::Vacant(entry) => {
                let key = SessionKey::random(&mut rand::thread_rng());
                entry.insert(self.new_session(target, key.duplicate(), now));
                key
            }
        }
    }

    /// Install a new session for `target`, replacing any existing one.
    pub fn create_session(&self, target: &PublicKey, key: SessionKey) {
        let session = self.new_session(target, key, self.clock.now());
        if let Some(old) = self.outbound.insert(*target, session) {
            let dropped = old.lock().tag_count();
            if dropped > 0 {
                warn!(target_key = ?target, dropped, "replaced outbound session with unused tags");
            }
        }
    }

    /// Spend one live tag for `target`.
    ///
    /// `None` means the caller must fall back to asymmetric encryption: there
    /// is no session, `key` is no longer the session's key, or no live tag is
    /// left.
    pub fn consume_next_available_tag(&self, target: &PublicKey, key: &SessionKey) -> Option<SessionTag> {
        let session = self.session(target)?;
        let mut sess = session.lock();
        if sess.current_key != *key {
            debug!(target_key = ?target, "tag requested for stale session key");
            return None;
        }
        sess.consume_next(self.clock.now(), self.tag_duration_ms())
    }

    pub fn available_tags(&self, target: &PublicKey, key: &SessionKey) -> usize {
        let Some(session) = self.session(target) else {
            return 0;
        };
        let sess = session.lock();
        if sess.current_key != *key {
            return 0;
        }
        sess.available_tags(self.clock.now(), self.tag_duration_ms())
    }

    /// Time until the newest live tag set expires.
    pub fn available_time_left(&self, target: &PublicKey, key: &SessionKey) -> Duration {
        let Some(session) = self.session(target) else {
            return Duration::ZERO;
        };
        let sess = session.lock();
        if sess.current_key != *key {
            return Duration::ZERO;
        }
        match sess.last_expiration(self.tag_duration_ms()) {
            Some(end) => Duration::from_millis(end.saturating_sub(self.clock.now())),
            None => Duration::ZERO,
        }
    }

    /// Whether the next message to `target` should carry fresh tags.
    pub fn should_send_tags(&self, target: &PublicKey, key: &SessionKey, low_threshold: usize) -> bool {
        self.available_tags(target, key) < low_threshold
            || self.available_time_left(target, key) < self.config.expiration_window()
    }

    /// Whether `target` has ever acknowledged a tag delivery on its current
    /// session (and not since lost that trust).
    pub fn ack_received(&self, target: &PublicKey) -> bool {
        self.session(target).is_some_and(|s| s.lock().acked)
    }

    /// Record that `tags` were sent to `target` under `key`.
    ///
    /// Creates the session if needed; a different key on an existing session
    /// replaces its key and drops its live tags.
    pub fn tags_delivered(&self, target: &PublicKey, key: &SessionKey, tags: Vec<SessionTag>) -> TagSetHandle {
        let now = self.clock.now();
        let id = self.next_sent_id.fetch_add(1, Ordering::Relaxed) + 1;
        let session = match self.outbound.entry(*target) {
            Entry::Occupied(entry) => {
                let session = Arc::clone(entry.get());
                session.lock().set_current_key(key.duplicate(), now);
                session
            }
            Entry::Vacant(entry) => {
                let session = self.new_session(target, key.duplicate(), now);
                entry.insert(Arc::clone(&session));
                session
            }
        };
        let set = OutboundTagSet::new(id, key.duplicate(), tags, now);
        debug!(target_key = ?target, tag_set = id, tags = set.original_size(), "tags delivered");
        session.lock().add_tags(set, now);
        TagSetHandle {
            target: *target,
            key: key.duplicate(),
            id,
        }
    }

    /// The peer confirmed receipt of the tag set.
    pub fn tags_acked(&self, handle: &TagSetHandle) {
        let Some(session) = self.session(&handle.target) else {
            return;
        };
        let mut sess = session.lock();
        if sess.current_key != handle.key {
            debug!(tag_set = handle.id, "ack for tag set of an old session key");
            return;
        }
        sess.ack_tags(handle.id);
    }

    /// The message carrying the tag set was never confirmed.
    pub fn fail_tags(&self, handle: &TagSetHandle) {
        let Some(session) = self.session(&handle.target) else {
            return;
        };
        let mut sess = session.lock();
        if sess.current_key != handle.key {
            return;
        }
        sess.fail_tags(handle.id, self.config.max_consecutive_failures);
    }

    /// Install tags a peer delivered to us, valid for `expire_after`.
    ///
    /// A tag that is already mapped to a different key poisons both tag sets:
    /// the old set and the whole new delivery are discarded.
    pub fn tags_received(&self, key: &SessionKey, tags: Vec<SessionTag>, expire_after: Duration) {
        if tags.is_empty() {
            return;
        }
        let now = self.clock.now();
        let id = self.next_received_id.fetch_add(1, Ordering::Relaxed) + 1;
        let received = tags.len();
        let overage = {
            let mut index = self.inbound.lock();
            let mut accepted = HashSet::with_capacity(tags.len());
            let mut collision = None;
            for tag in &tags {
                match index.tags.get(tag).copied() {
                    None => {
                        index.tags.insert(*tag, id);
                        accepted.insert(*tag);
                    }
                    // listed twice in this delivery
                    Some(old_id) if old_id == id => continue,
                    Some(old_id) => {
                        let same_key = index.sets.get(&old_id).is_some_and(|s| s.key == *key);
                        if same_key {
                            debug!(?tag, "duplicate tag delivery for the same key");
                            continue;
                        }
                        collision = Some(old_id);
                        break;
                    }
                }
            }
            if let Some(old_id) = collision {
                let mut purged = index.remove_set(old_id);
                for tag in &accepted {
                    index.tags.remove(tag);
                    purged += 1;
                }
                self.metrics.inc_tag_collision();
                self.metrics.add_inbound_tags_expired(purged as u64);
                warn!(
                    old_tag_set = old_id,
                    new_tags = received,
                    purged,
                    "session tag delivered under two keys, possible attack; purged both sets"
                );
                return;
            }
            if accepted.is_empty() {
                return;
            }
            let original_size = accepted.len();
            index.sets.insert(
                id,
                InboundTagSet {
                    key: key.duplicate(),
                    expiration: now + expire_after.as_millis() as u64,
                    tags: accepted,
                    original_size,
                },
            );
            self.metrics.add_tags_received(original_size as u64);
            index.tags.len().saturating_sub(self.config.max_inbound_tags)
        };
        if overage > 0 {
            self.clear_excess(overage);
        }
    }

    /// Resolve and remove an inbound tag.
    ///
    /// `None` means the tag is unknown (or expired) and the message needs the
    /// asymmetric path.
    pub fn consume_tag(&self, tag: &SessionTag) -> Option<SessionKey> {
        let now = self.clock.now();
        let mut index = self.inbound.lock();
        let id = index.tags.remove(tag)?;
        let set = index.sets.get_mut(&id)?;
        set.tags.remove(tag);
        if set.is_expired(now) {
            debug!(tag_set = id, "tag from expired set");
            index.remove_set(id);
            return None;
        }
        let key = set.key.duplicate();
        if set.tags.is_empty() {
            index.sets.remove(&id);
        }
        self.metrics.inc_tag_consumed();
        Some(key)
    }

    /// Periodic cleanup.
    ///
    /// Expires inbound tag sets, prunes untouched bulk deliveries when the
    /// index is large, expires outbound tag sets and forgets outbound
    /// sessions that have been idle for the session lifetime with nothing left
    /// to spend. Returns the number of tags and sessions removed.
    pub fn aggressive_expire(&self) -> usize {
        let now = self.clock.now();
        let lifetime = self.lifetime_ms();
        let mut removed = 0;
        let remaining = {
            let mut index = self.inbound.lock();
            let expired: Vec<_> = index
                .sets
                .iter()
                .filter(|(_, set)| set.is_expired(now))
                .map(|(id, _)| *id)
                .collect();
            removed += index.remove_sets(expired);

            if index.tags.len() > AGGRESSIVE_PRUNE_THRESHOLD {
                let mut by_key: HashMap<&SessionKey, Vec<TagSetId>> = HashMap::new();
                for (id, set) in &index.sets {
                    by_key.entry(&set.key).or_default().push(*id);
                }
                let mut prune = Vec::new();
                for ids in by_key.values().filter(|ids| ids.len() >= PRUNE_MIN_SETS_PER_KEY) {
                    let age = prune_age(ids.len());
                    for id in ids {
                        let set = &index.sets[id];
                        if set.is_untouched()
                            && set.tags.len() > PRUNE_MIN_SET_SIZE
                            && set.expiration < (now + lifetime).saturating_sub(age)
                        {
                            prune.push(*id);
                        }
                    }
                }
                if !prune.is_empty() {
                    debug!(sets = prune.len(), "pruning untouched inbound tag sets");
                }
                removed += index.remove_sets(prune);
            }
            index.tags.len()
        };
        self.metrics.add_inbound_tags_expired(removed as u64);

        let duration = self.tag_duration_ms();
        let mut sessions_removed = 0;
        self.outbound.retain(|_, session| {
            let mut sess = session.lock();
            removed += sess.expire_tags(now, duration);
            let idle = sess.is_idle(now, lifetime) && sess.available_tags(now, duration) == 0;
            if idle {
                sessions_removed += 1;
            }
            !idle
        });
        removed += sessions_removed;
        self.metrics.add_outbound_sessions_expired(sessions_removed as u64);

        debug!(
            removed,
            inbound_tags = remaining,
            outbound_sessions = self.outbound.len(),
            "session key cleanup"
        );
        removed
    }

    /// Emergency eviction when the inbound index is over capacity.
    ///
    /// Sets close to expiry go first, sets with plenty of life left are kept,
    /// and the rest are evicted until twice the overage worth of sets has
    /// been reclaimed.
    fn clear_excess(&self, overage: usize) {
        let now = self.clock.now();
        let to_remove = overage * 2;
        let mut index = self.inbound.lock();
        let mut old = 0;
        let mut removed = Vec::new();
        for (id, set) in &index.sets {
            let left = set.expiration.saturating_sub(now);
            if left < 3 * MINUTE_MS {
                old += 1;
                removed.push(*id);
            } else if left > 8 * MINUTE_MS {
                continue;
            } else if removed.len() < to_remove {
                removed.push(*id);
            }
        }
        let sets = removed.len();
        let tags = index.remove_sets(removed);
        self.metrics.add_inbound_tags_expired(tags as u64);
        warn!(
            overage,
            old,
            sets,
            tags,
            remaining = index.tags.len(),
            "inbound tag index over capacity, evicted tag sets"
        );
    }

    pub fn outbound_session_count(&self) -> usize {
        self.outbound.len()
    }

    pub fn inbound_tag_count(&self) -> usize {
        self.inbound.lock().tags.len()
    }

    pub fn snapshot(&self) -> SessionKeyStats {
        let (inbound_tag_sets, inbound_tags) = {
            let index = self.inbound.lock();
            (index.sets.len(), index.tags.len())
        };
        let mut stats = SessionKeyStats {
            inbound_tag_sets,
            inbound_tags,
            ..Default::default()
        };
        for session in self.outbound.iter() {
            let sess = session.lock();
            stats.outbound_sessions += 1;
            stats.outbound_tag_sets += sess.tag_set_count();
            stats.outbound_tags += sess.tag_count();
        }
        stats
    }
}

/// Minimum age of an untouched set before pruning, shrinking as a key
/// accumulates more sets.
fn prune_age(sets: usize) -> u64 {
    let scaled = (9 * MINUTE_MS).saturating_sub((sets - PRUNE_MIN_SETS_PER_KEY) as u64 * 8 * MINUTE_MS / 40);
    scaled.max(MINUTE_MS).min(5 * MINUTE_MS)
}
