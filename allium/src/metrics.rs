// Copyright (c) 2024 Botho Foundation

//! Counters for the garlic pipeline and the send path.

use std::sync::atomic::{AtomicU64, Ordering};

/// Router-wide counters. All updates use relaxed ordering.
#[derive(Debug, Default)]
pub struct RouterMetrics {
    /// Garlic blocks opened with the asymmetric header.
    pub decrypt_new_session: AtomicU64,
    /// Garlic blocks opened with a session tag.
    pub decrypt_existing_session: AtomicU64,
    /// Garlic blocks that could not be opened.
    pub decrypt_failures: AtomicU64,
    /// Garlic blocks sealed with the asymmetric header.
    pub encrypt_new_session: AtomicU64,
    /// Garlic blocks sealed behind a session tag.
    pub encrypt_existing_session: AtomicU64,
    /// Inbound tags delivered under a second key.
    pub tag_collisions: AtomicU64,
    /// Inbound tags installed.
    pub tags_received: AtomicU64,
    /// Inbound tags consumed by decryption.
    pub tags_consumed: AtomicU64,
    /// Inbound tags dropped by expiry or eviction.
    pub inbound_tags_expired: AtomicU64,
    /// Outbound sessions dropped as idle.
    pub outbound_sessions_expired: AtomicU64,
    /// Cloves handed to a clove receiver.
    pub cloves_dispatched: AtomicU64,
    /// Cloves dropped as replayed or expired.
    pub cloves_rejected: AtomicU64,
    /// Sends whose lease set was already known.
    pub lease_set_found_local: AtomicU64,
    /// Sends whose lease set had to be looked up.
    pub lease_set_found_remote: AtomicU64,
    /// Lease set lookups that found nothing.
    pub lease_set_lookup_failed: AtomicU64,
    /// Garlic messages pushed into a tunnel.
    pub sends_dispatched: AtomicU64,
    /// Sends confirmed by a delivery status reply.
    pub sends_acked: AtomicU64,
    /// Sends finished without requesting an ack.
    pub sends_best_effort: AtomicU64,
    /// Sends that failed for any reason.
    pub sends_failed: AtomicU64,
    /// Sends that ran out of time.
    pub sends_expired: AtomicU64,
    /// Acks that arrived after the send had already failed.
    pub success_after_timeout: AtomicU64,
}

impl RouterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_decrypt_new_session(&self) {
        self.decrypt_new_session.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_decrypt_existing_session(&self) {
        self.decrypt_existing_session.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_decrypt_failure(&self) {
        self.decrypt_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_encrypt_new_session(&self) {
        self.encrypt_new_session.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_encrypt_existing_session(&self) {
        self.encrypt_existing_session.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_tag_collision(&self) {
        self.tag_collisions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_tags_received(&self, n: u64) {
        self.tags_received.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_tag_consumed(&self) {
        self.tags_consumed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_inbound_tags_expired(&self, n: u64) {
        self.inbound_tags_expired.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_outbound_sessions_expired(&self, n: u64) {
        self.outbound_sessions_expired.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_clove_dispatched(&self) {
        self.cloves_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_clove_rejected(&self) {
        self.cloves_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_lease_set_found_local(&self) {
        self.lease_set_found_local.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_lease_set_found_remote(&self) {
        self.lease_set_found_remote.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_lease_set_lookup_failed(&self) {
        self.lease_set_lookup_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_send_dispatched(&self) {
        self.sends_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_send_acked(&self) {
        self.sends_acked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_send_best_effort(&self) {
        self.sends_best_effort.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_send_failed(&self) {
        self.sends_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_send_expired(&self) {
        self.sends_expired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_success_after_timeout(&self) {
        self.success_after_timeout.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of the current metrics.
    pub fn snapshot(&self) -> RouterMetricsSnapshot {
        RouterMetricsSnapshot {
            decrypt_new_session: self.decrypt_new_session.load(Ordering::Relaxed),
            decrypt_existing_session: self.decrypt_existing_session.load(Ordering::Relaxed),
            decrypt_failures: self.decrypt_failures.load(Ordering::Relaxed),
            encrypt_new_session: self.encrypt_new_session.load(Ordering::Relaxed),
            encrypt_existing_session: self.encrypt_existing_session.load(Ordering::Relaxed),
            tag_collisions: self.tag_collisions.load(Ordering::Relaxed),
            tags_received: self.tags_received.load(Ordering::Relaxed),
            tags_consumed: self.tags_consumed.load(Ordering::Relaxed),
            inbound_tags_expired: self.inbound_tags_expired.load(Ordering::Relaxed),
            outbound_sessions_expired: self.outbound_sessions_expired.load(Ordering::Relaxed),
            cloves_dispatched: self.cloves_dispatched.load(Ordering::Relaxed),
            cloves_rejected: self.cloves_rejected.load(Ordering::Relaxed),
            lease_set_found_local: self.lease_set_found_local.load(Ordering::Relaxed),
            lease_set_found_remote: self.lease_set_found_remote.load(Ordering::Relaxed),
            lease_set_lookup_failed: self.lease_set_lookup_failed.load(Ordering::Relaxed),
            sends_dispatched: self.sends_dispatched.load(Ordering::Relaxed),
            sends_acked: self.sends_acked.load(Ordering::Relaxed),
            sends_best_effort: self.sends_best_effort.load(Ordering::Relaxed),
            sends_failed: self.sends_failed.load(Ordering::Relaxed),
            sends_expired: self.sends_expired.load(Ordering::Relaxed),
            success_after_timeout: self.success_after_timeout.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`RouterMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouterMetricsSnapshot {
    pub decrypt_new_session: u64,
    pub decrypt_existing_session: u64,
    pub decrypt_failures: u64,
    pub encrypt_new_session: u64,
    pub encrypt_existing_session: u64,
    pub tag_collisions: u64,
    pub tags_received: u64,
    pub tags_consumed: u64,
    pub inbound_tags_expired: u64,
    pub outbound_sessions_expired: u64,
    pub cloves_dispatched: u64,
    pub cloves_rejected: u64,
    pub lease_set_found_local: u64,
    pub lease_set_found_remote: u64,
    pub lease_set_lookup_failed: u64,
    pub sends_dispatched: u64,
    pub sends_acked: u64,
    pub sends_best_effort: u64,
    pub sends_failed: u64,
    pub sends_expired: u64,
    pub success_after_timeout: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = RouterMetrics::new();
        metrics.inc_decrypt_failure();
        metrics.inc_decrypt_failure();
        metrics.add_tags_received(40);
        metrics.inc_send_acked();

        let snap = metrics.snapshot();
        assert_eq!(snap.decrypt_failures, 2);
        assert_eq!(snap.tags_received, 40);
        assert_eq!(snap.sends_acked, 1);
        assert_eq!(snap.sends_failed, 0);
    }
}
