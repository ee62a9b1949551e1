//! Replicast Networking Layer
//!
//! Point-to-point message plumbing for replicast's broadcast strategies.
//! Two interchangeable transports deliver topic-addressed JSON payloads
//! between a fixed set of nodes:
//!
//! - **Plain** ([`network::TcpNetwork`]) — length-prefixed frames over TCP;
//!   inbound connections self-declare their sender id and are *not*
//!   authenticated.
//! - **Encrypted** ([`secure::SecureNetwork`]) — the same contract with an
//!   RSA handshake against known public keys and AES-256-CBC on every
//!   steady-state frame.
//!
//! ## Architecture
//!
//! ```text
//!  ┌─────────────────────────────────────────────────┐
//!  │  Broadcast strategies (replicast-broadcast)     │
//!  │  ← (from, payload) per topic                    │
//!  │  → send_message(target, topic, payload)         │
//!  └──────────────────────┬──────────────────────────┘
//!                         │  Network trait
//!  ┌──────────────────────▼──────────────────────────┐
//!  │  TcpNetwork / SecureNetwork                     │
//!  │  • one outbound writer task per peer            │
//!  │  • one reader task per inbound connection       │
//!  │  • reconnect with bounded exponential backoff   │
//!  └──────────────────────┬──────────────────────────┘
//!                         │
//!  ┌──────────────────────▼──────────────────────────┐
//!  │  Framing (ASCII decimal length + NUL + body)    │
//!  └─────────────────────────────────────────────────┘
//! ```
//!
//! ## Crate modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`membership`] | Node ids, peer addresses, fixed member set |
//! | [`config`]     | `NetConfig` defaults and dev overrides |
//! | [`frame`]      | Wire framing: encoder and incremental decoder |
//! | [`network`]    | `Network` trait and the plain TCP transport |
//! | [`secure`]     | Encrypted transport and its crypto helpers |
//! | [`keys`]       | RSA key-file generation and loading |
//! | [`barrier`]    | Startup barrier: wait until all peers are up |
//! | [`error`]      | Crate-wide error enum |

pub mod barrier;
pub mod config;
pub mod error;
pub mod frame;
pub mod keys;
pub mod membership;
pub mod network;
pub mod secure;

pub use {
    barrier::{await_network_ready, SETUP_TOPIC},
    config::NetConfig,
    error::{NetError, Result},
    membership::{Membership, NodeId, Peer},
    network::{topic_handler, Network, TcpNetwork, TopicHandler, SENDER_ID_TOPIC},
    secure::{KeyLocator, SecureNetwork},
};
