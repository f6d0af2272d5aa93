// Copyright (c) 2024 Botho Foundation
//
//! Common test utilities for the router core integration tests.
//!
//! A [`Harness`] wires one [`allium::RouterContext`] to in-memory
//! collaborators. Local destinations added to it share the router, so a send
//! can be carried to its recipient and the ack carried back by hand:
//!
//! ```ignore
//! let mut h = Harness::new();
//! let (alice, bob) = (h.add_client(), h.add_client());
//! h.add_tunnels(&alice);
//! let lease = h.lease(600_000);
//! h.publish(&bob, vec![lease]);
//! let job = h.job(h.message(&alice, &bob, b"hi")).spawn();
//! let sent = h.next_dispatched().await;
//! h.deliver(&sent, &bob);
//! h.return_acks(&alice);
//! assert_eq!(job.await.unwrap(), MessageStatus::GuaranteedSuccess);
//! ```

#![allow(dead_code)]

mod clock;
mod collaborators;
mod harness;

pub use clock::*;
pub use collaborators::*;
pub use harness::*;
