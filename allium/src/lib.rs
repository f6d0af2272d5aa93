// Copyright (c) 2024 Botho Foundation

//! Core of the Allium garlic router.
//!
//! - [`crypto`]: session key and tag lifecycle, and the hybrid
//!   asymmetric/symmetric garlic encryption
//! - [`garlic`]: building, opening, validating and dispatching garlic cloves
//! - [`message`]: the outbound client send path and its routing cache
//! - [`router`]: the router context and the seams to the network database,
//!   tunnels, transports and client sessions
//!
//! The subsystems behind those seams are provided by the embedding router.

#![deny(missing_debug_implementations)]

pub mod clock;
pub mod config;
pub mod crypto;
pub mod garlic;
pub mod maintenance;
pub mod message;
pub mod metrics;
pub mod router;
pub mod telemetry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ClientConfig, ClientOptions, OutboundCacheConfig, RouterConfig, SessionKeyConfig};
pub use crypto::{GarlicEngine, TagSetHandle, TransientSessionKeyManager};
pub use garlic::{
    CloveDispatcher, CloveSet, GarlicConfig, GarlicError, GarlicMessageBuilder, GarlicMessageParser,
    GarlicMessageReceiver, ReceiveScope,
};
pub use maintenance::Maintenance;
pub use message::{ClientMessage, MessageStatus, OutboundCache, OutboundClientMessageJob, SendFlags};
pub use metrics::{RouterMetrics, RouterMetricsSnapshot};
pub use router::{Collaborators, RouterContext};
