// Copyright (c) 2024 Botho Foundation

//! Clove replay protection.

use super::error::ReplayError;
use crate::clock::Clock;
use parking_lot::Mutex;
use std::{collections::HashSet, sync::Arc};
use tracing::debug;

/// Tolerated clock skew between routers, in milliseconds.
pub const CLOCK_FUDGE_FACTOR: u64 = 60 * 1000;

/// Furthest in the future a clove may expire, before the fudge factor.
pub const MAX_MESSAGE_LIFETIME: u64 = 90 * 1000;

/// Rejects cloves that are expired, implausibly far in the future, or have
/// been seen before.
///
/// A clove is identified by its id and expiration. Entries are remembered
/// until their expiration plus the fudge factor has passed, after which the
/// expiry check alone rejects a replay.
#[derive(Debug)]
pub struct MessageValidator {
    clock: Arc<dyn Clock>,
    seen: Mutex<HashSet<(u32, u64)>>,
}

impl MessageValidator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            seen: Mutex::new(HashSet::new()),
        }
    }

    pub fn validate(&self, id: u32, expiration: u64) -> Result<(), ReplayError> {
        let now = self.clock.now();
        if expiration.saturating_add(CLOCK_FUDGE_FACTOR) < now {
            return Err(ReplayError::Expired {
                id,
                ago_ms: now.saturating_sub(expiration),
            });
        }
        if expiration > now.saturating_add(MAX_MESSAGE_LIFETIME + CLOCK_FUDGE_FACTOR) {
            return Err(ReplayError::TooFarInFuture {
                id,
                ahead_ms: expiration - now,
            });
        }
        if !self.seen.lock().insert((id, expiration)) {
            return Err(ReplayError::Duplicate(id));
        }
        Ok(())
    }

    /// Forget entries old enough that the expiry check covers them.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut seen = self.seen.lock();
        let before = seen.len();
        seen.retain(|(_, expiration)| expiration.saturating_add(CLOCK_FUDGE_FACTOR) >= now);
        let removed = before - seen.len();
        if removed > 0 {
            debug!(removed, remaining = seen.len(), "replay cache sweep");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const NOW: u64 = 10_000_000;

    fn validator() -> (Arc<ManualClock>, MessageValidator) {
        let clock = Arc::new(ManualClock::new(NOW));
        (clock.clone(), MessageValidator::new(clock))
    }

    #[test]
    fn test_duplicate_rejected() {
        let (_, v) = validator();
        assert_eq!(v.validate(5, NOW + 1_000), Ok(()));
        assert_eq!(v.validate(5, NOW + 1_000), Err(ReplayError::Duplicate(5)));
        // same id, different expiration is a different clove
        assert_eq!(v.validate(5, NOW + 2_000), Ok(()));
    }

    #[test]
    fn test_expiry_bounds() {
        let (_, v) = validator();
        assert_eq!(v.validate(1, NOW - CLOCK_FUDGE_FACTOR), Ok(()));
        assert!(matches!(
            v.validate(2, NOW - CLOCK_FUDGE_FACTOR - 1),
            Err(ReplayError::Expired { id: 2, .. })
        ));
        assert!(matches!(
            v.validate(3, NOW + MAX_MESSAGE_LIFETIME + CLOCK_FUDGE_FACTOR + 1),
            Err(ReplayError::TooFarInFuture { id: 3, .. })
        ));
    }

    #[test]
    fn test_expiration_at_end_of_time() {
        let (_, v) = validator();
        assert!(matches!(
            v.validate(7, u64::MAX),
            Err(ReplayError::TooFarInFuture { id: 7, .. })
        ));
        assert!(matches!(
            v.validate(8, u64::MAX - CLOCK_FUDGE_FACTOR + 1),
            Err(ReplayError::TooFarInFuture { id: 8, .. })
        ));
        assert!(v.is_empty());
        assert_eq!(v.sweep(), 0);
    }

    #[test]
    fn test_sweep_forgets_old_entries() {
        let (clock, v) = validator();
        v.validate(1, NOW + 1_000).unwrap();
        v.validate(2, NOW + 100_000).unwrap();
        clock.advance(1_000 + CLOCK_FUDGE_FACTOR + 1);
        assert_eq!(v.sweep(), 1);
        assert_eq!(v.len(), 1);
    }
}
