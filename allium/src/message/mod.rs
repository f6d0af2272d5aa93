// Copyright (c) 2024 Botho Foundation

//! The outbound client send path.

mod client;
mod helper;
mod outbound_cache;
mod send_job;
mod status;

pub use client::{ClientMessage, SendFlags};
pub use helper::{create_garlic_message, AckRequest, OutboundGarlic};
pub use outbound_cache::{HashPair, OutboundCache, TunnelCaches};
pub use send_job::{
    OutboundClientMessageJob, LS_LOOKUP_TIMEOUT, OVERALL_TIMEOUT_MS_DEFAULT, OVERALL_TIMEOUT_MS_MAX,
    OVERALL_TIMEOUT_MS_MIN,
};
pub use status::MessageStatus;
