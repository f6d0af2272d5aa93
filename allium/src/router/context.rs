// Copyright (c) 2024 Botho Foundation

use super::{
    registry::MessageRegistry,
    traits::{ClientManager, CommSystem, NetDb, TunnelDispatcher, TunnelManager},
};
use crate::{
    clock::Clock,
    config::RouterConfig,
    crypto::{GarlicEngine, TransientSessionKeyManager},
    garlic::MessageValidator,
    metrics::RouterMetrics,
};
use alm_data::{Hash, PrivateKey};
use std::{fmt, sync::Arc};

/// Handles to the external subsystems.
#[derive(Clone)]
pub struct Collaborators {
    pub net_db: Arc<dyn NetDb>,
    pub tunnel_manager: Arc<dyn TunnelManager>,
    pub tunnel_dispatcher: Arc<dyn TunnelDispatcher>,
    pub comm_system: Arc<dyn CommSystem>,
    pub client_manager: Arc<dyn ClientManager>,
}

/// Everything the router core shares between jobs.
///
/// One instance per router, passed around behind an `Arc`.
pub struct RouterContext {
    router_hash: Hash,
    private_key: PrivateKey,
    config: RouterConfig,
    clock: Arc<dyn Clock>,
    metrics: Arc<RouterMetrics>,
    session_keys: Arc<TransientSessionKeyManager>,
    registry: MessageRegistry,
    validator: Arc<MessageValidator>,
    engine: GarlicEngine,
    collaborators: Collaborators,
}

impl RouterContext {
    /// Build a context for the router owning `private_key`. The router hash
    /// is the SHA-256 of its public key.
    pub fn new(config: RouterConfig, private_key: PrivateKey, clock: Arc<dyn Clock>, collaborators: Collaborators) -> Self {
        let metrics = Arc::new(RouterMetrics::new());
        let session_keys = Arc::new(TransientSessionKeyManager::new(
            config.session_keys.clone(),
            clock.clone(),
            metrics.clone(),
        ));
        let router_hash = Hash::digest(private_key.public_key().as_bytes());
        Self {
            router_hash,
            private_key,
            config,
            validator: Arc::new(MessageValidator::new(clock.clone())),
            engine: GarlicEngine::new(metrics.clone()),
            clock,
            metrics,
            session_keys,
            registry: MessageRegistry::new(),
            collaborators,
        }
    }

    pub fn router_hash(&self) -> &Hash {
        &self.router_hash
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    pub fn metrics(&self) -> &Arc<RouterMetrics> {
        &self.metrics
    }

    /// The router's own session key manager, for garlic addressed to the
    /// router identity.
    pub fn session_keys(&self) -> &Arc<TransientSessionKeyManager> {
        &self.session_keys
    }

    pub fn message_registry(&self) -> &MessageRegistry {
        &self.registry
    }

    pub fn validator(&self) -> &Arc<MessageValidator> {
        &self.validator
    }

    pub fn engine(&self) -> &GarlicEngine {
        &self.engine
    }

    pub fn net_db(&self) -> &dyn NetDb {
        self.collaborators.net_db.as_ref()
    }

    pub fn tunnel_manager(&self) -> &dyn TunnelManager {
        self.collaborators.tunnel_manager.as_ref()
    }

    pub fn tunnel_dispatcher(&self) -> &dyn TunnelDispatcher {
        self.collaborators.tunnel_dispatcher.as_ref()
    }

    pub fn comm_system(&self) -> &dyn CommSystem {
        self.collaborators.comm_system.as_ref()
    }

    pub fn client_manager(&self) -> &dyn ClientManager {
        self.collaborators.client_manager.as_ref()
    }
}

impl fmt::Debug for RouterContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterContext")
            .field("router_hash", &self.router_hash)
            .field("clock", &self.clock)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
