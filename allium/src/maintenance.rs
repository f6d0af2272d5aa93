// Copyright (c) 2024 Botho Foundation

//! Background upkeep of the router core.
//!
//! - session key cleanup for the router and every local destination
//! - the outbound cache sweep
//! - expiry of reply selectors and of the replay filter

use crate::{message::OutboundCache, router::RouterContext};
use std::{sync::Arc, time::Duration};
use tokio::{
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, info};

/// How often expired reply selectors and seen message ids are dropped.
pub const REGISTRY_EXPIRE_INTERVAL: Duration = Duration::from_secs(10);

/// Handle to the maintenance task. Dropping it stops the task.
#[derive(Debug)]
pub struct Maintenance {
    handle: JoinHandle<()>,
}

impl Maintenance {
    /// Start the periodic jobs on the current tokio runtime.
    pub fn spawn(ctx: Arc<RouterContext>, cache: Arc<OutboundCache>) -> Self {
        let handle = tokio::spawn(run(ctx, cache));
        Self { handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the task and wait for it to wind down.
    pub async fn shutdown(mut self) {
        self.handle.abort();
        let _ = (&mut self.handle).await;
    }
}

impl Drop for Maintenance {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn run(ctx: Arc<RouterContext>, cache: Arc<OutboundCache>) {
    let mut session_cleanup = interval(ctx.config().session_keys.cleanup_interval());
    let sweep_interval = ctx.config().outbound_cache.sweep_interval();
    let mut cache_sweep = interval(sweep_interval);
    let mut registry_expire = interval(REGISTRY_EXPIRE_INTERVAL);
    for timer in [&mut session_cleanup, &mut cache_sweep, &mut registry_expire] {
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    }
    info!(?sweep_interval, "router maintenance started");

    loop {
        tokio::select! {
            _ = session_cleanup.tick() => expire_sessions(&ctx),
            _ = cache_sweep.tick() => {
                let removed = cache.sweep(ctx.now(), sweep_interval.as_millis() as u64, ctx.tunnel_manager());
                debug!(removed, "outbound cache swept");
            }
            _ = registry_expire.tick() => {
                let selectors = ctx.message_registry().expire(ctx.now());
                let seen = ctx.validator().sweep();
                if selectors > 0 || seen > 0 {
                    debug!(selectors, seen, "expired reply selectors and seen ids");
                }
            }
        }
    }
}

fn expire_sessions(ctx: &RouterContext) {
    let mut removed = ctx.session_keys().aggressive_expire();
    let clients = ctx.client_manager();
    for dest in clients.local_destinations() {
        if let Some(skm) = clients.client_session_key_manager(&dest) {
            removed += skm.aggressive_expire();
        }
    }
    debug!(removed, "session keys expired");
}
