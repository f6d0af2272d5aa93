// Copyright (c) 2024 Botho Foundation

use allium::Clock;
use tokio::time::Instant;

/// Epoch milliseconds the test clocks start at.
pub const TEST_EPOCH_MS: u64 = 1_700_000_000_000;

/// Wall clock driven by tokio's timer, so paused-time tests see the router
/// core and its timeouts move together.
#[derive(Debug)]
pub struct TokioClock {
    base: u64,
    start: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            base: TEST_EPOCH_MS,
            start: Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> u64 {
        self.base + self.start.elapsed().as_millis() as u64
    }
}
