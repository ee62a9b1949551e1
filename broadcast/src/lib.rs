//! Replicast Broadcast Layer
//!
//! Delivery strategies and payload routing for replicated CRDT state.  An
//! application hands a payload and a target reference to the
//! [`router::CachedRouter`]; the router wraps it and submits it to a
//! [`dispatch::Broadcast`] strategy; the strategy runs its protocol over a
//! [`replicast_net::Network`]; on every node the strategy eventually
//! delivers to its local fanout and the router demultiplexes to the
//! target's receiver.
//!
//! ```text
//!  application ──▶ CachedRouter ──▶ Broadcast strategy ──▶ Network
//!                       ▲                  │
//!                       │  deliver(payload)▼
//!                  per-target         Fanout (ordered,
//!                  receivers          sequential receivers)
//! ```
//!
//! Three strategies implement the same trait:
//!
//! | Strategy | Guarantee |
//! |----------|-----------|
//! | [`best_effort::BestEffortBroadcast`] | Delivery wherever the send reaches; honest-peer assumption |
//! | [`reliable::ReliableBroadcast`] | Bracha reliable broadcast tolerating `⌊(n−1)/3⌋` Byzantine members |
//! | [`local::LocalBroadcast`] | Single-node self-delivery |

pub mod best_effort;
pub mod dispatch;
pub mod error;
pub mod fingerprint;
pub mod local;
pub mod reliable;
pub mod router;

pub use {
    best_effort::{BestEffortBroadcast, MESSAGE_TOPIC},
    dispatch::{delivery_handler, Broadcast, DeliveryHandler, Fanout},
    error::{BroadcastError, Result},
    fingerprint::{canonical_bytes, canonical_string, message_fingerprint},
    local::LocalBroadcast,
    reliable::{ReliableBroadcast, ECHO_TOPIC, INITIAL_TOPIC, READY_TOPIC},
    router::{CachedRouter, ReplicaFactory},
};
