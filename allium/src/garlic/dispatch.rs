// Copyright (c) 2024 Botho Foundation

//! Routing of opened cloves by their delivery instructions.

use super::{
    clove::GarlicClove,
    error::{GarlicError, GarlicResult},
    receiver::{CloveReceiver, GarlicMessageReceiver},
};
use crate::router::RouterContext;
use alm_data::{DeliveryTarget, GarlicMessage, Hash, I2npMessage, MessageBody};
use std::sync::Arc;
use tracing::{debug, warn};

/// How many garlic layers one inbound message may unwrap.
pub const MAX_GARLIC_DEPTH: usize = 3;

/// Whose keys open the garlic and who local data is delivered to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveScope {
    /// Garlic addressed to the router identity.
    Router,
    /// Garlic that came in through a tunnel of a local destination.
    Client(Hash),
}

/// The router's [`CloveReceiver`].
///
/// LOCAL cloves are consumed here: delivery status replies go to the message
/// registry, lease set stores to the network database, data to the client of
/// the scope, and nested garlic is opened in turn. DESTINATION cloves are
/// delivered if the destination is ours. ROUTER cloves addressed to us are
/// LOCAL; the rest are forwarded directly. TUNNEL cloves go to the tunnel
/// dispatcher.
#[derive(Debug, Clone)]
pub struct CloveDispatcher {
    ctx: Arc<RouterContext>,
    receiver: GarlicMessageReceiver,
    scope: ReceiveScope,
    depth: usize,
}

impl CloveDispatcher {
    pub fn new(ctx: Arc<RouterContext>, scope: ReceiveScope) -> Self {
        let receiver = GarlicMessageReceiver::new(
            ctx.engine().clone(),
            ctx.validator().clone(),
            ctx.metrics().clone(),
        );
        Self {
            ctx,
            receiver,
            scope,
            depth: 0,
        }
    }

    pub fn scope(&self) -> &ReceiveScope {
        &self.scope
    }

    /// Open `message` with the keys of this scope and dispatch its cloves.
    ///
    /// Returns the number of cloves dispatched; 0 if the scope's destination
    /// is no longer local.
    pub fn receive_garlic(&self, message: &GarlicMessage) -> GarlicResult<usize> {
        if self.depth >= MAX_GARLIC_DEPTH {
            return Err(GarlicError::TooDeep(self.depth + 1));
        }
        match &self.scope {
            ReceiveScope::Router => {
                self.receiver
                    .receive(message, self.ctx.private_key(), self.ctx.session_keys(), self)
            }
            ReceiveScope::Client(dest) => {
                let clients = self.ctx.client_manager();
                let (Some(key), Some(skm)) = (
                    clients.client_private_key(dest),
                    clients.client_session_key_manager(dest),
                ) else {
                    warn!(%dest, "garlic for a destination that is not local");
                    return Ok(0);
                };
                self.receiver.receive(message, &key, &skm, self)
            }
        }
    }

    fn nested(&self, scope: ReceiveScope) -> Self {
        Self {
            ctx: self.ctx.clone(),
            receiver: self.receiver.clone(),
            scope,
            depth: self.depth + 1,
        }
    }

    /// Consume a message addressed to us. `dest` is the local destination it
    /// belongs to, if any.
    fn deliver_locally(&self, message: I2npMessage, dest: Option<&Hash>) {
        if message.as_delivery_status().is_some() {
            self.ctx.message_registry().notify(&message);
            return;
        }
        let msg_id = message.unique_id;
        match message.body {
            MessageBody::DeliveryStatus(_) => {}
            MessageBody::DatabaseStore(store) => {
                debug!(key = %store.key, "storing bundled lease set");
                self.ctx.net_db().store(store.key, store.lease_set);
            }
            MessageBody::Data(data) => match dest {
                Some(dest) => self.ctx.client_manager().message_received(dest, data.into_payload()),
                None => debug!(msg_id, "dropping data message addressed to the router"),
            },
            MessageBody::Garlic(garlic) => {
                let scope = match dest {
                    Some(dest) => ReceiveScope::Client(*dest),
                    None => ReceiveScope::Router,
                };
                if let Err(err) = self.nested(scope).receive_garlic(&garlic) {
                    debug!(msg_id, %err, "dropping nested garlic");
                }
            }
        }
    }

    fn local_destination(&self) -> Option<&Hash> {
        match &self.scope {
            ReceiveScope::Router => None,
            ReceiveScope::Client(dest) => Some(dest),
        }
    }
}

impl CloveReceiver for CloveDispatcher {
    fn handle_clove(&self, clove: GarlicClove) {
        let GarlicClove {
            instructions, message, ..
        } = clove;
        match instructions.target {
            DeliveryTarget::Local => self.deliver_locally(message, self.local_destination()),
            DeliveryTarget::Destination(dest) => {
                if self.ctx.client_manager().is_local(&dest) {
                    self.deliver_locally(message, Some(&dest));
                } else {
                    debug!(%dest, "dropping clove for a remote destination");
                }
            }
            DeliveryTarget::Router(router) => {
                if router == *self.ctx.router_hash() {
                    self.deliver_locally(message, None);
                } else {
                    self.ctx.comm_system().send_to_router(message, &router);
                }
            }
            DeliveryTarget::Tunnel { gateway, tunnel_id } => {
                self.ctx
                    .tunnel_dispatcher()
                    .dispatch_to_tunnel(message, &gateway, tunnel_id);
            }
        }
    }
}
