// Copyright (c) 2024 Botho Foundation

//! Router context, the collaborator seams and reply tracking.

mod context;
mod registry;
mod traits;
mod tunnel;

pub use context::{Collaborators, RouterContext};
pub use registry::{MessageRegistry, MessageSelector, PendingId, ReplySelector};
pub use traits::{ClientManager, CommSystem, NetDb, TunnelDispatcher, TunnelManager};
pub use tunnel::TunnelInfo;
