//! Error types for the replicast networking layer.

use {crate::membership::NodeId, thiserror::Error};

/// Errors that can occur in the networking layer.
#[derive(Error, Debug)]
pub enum NetError {
    /// Transport-level I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to encode or decode a JSON frame body.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// The target node was never registered.
    #[error("unknown peer: {0}")]
    UnknownPeer(NodeId),

    /// The network has been stopped; no further sends are accepted.
    #[error("network is stopped")]
    Stopped,

    /// A frame announced a length beyond the configured maximum.
    #[error("frame too large: {size} bytes (max {max} bytes)")]
    FrameTooLarge {
        /// Announced frame length.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The session handshake with a peer could not be completed.
    #[error("handshake with {peer} failed: {reason}")]
    Handshake {
        /// The peer the handshake was attempted with.
        peer: NodeId,
        /// Human-readable failure cause.
        reason: String,
    },

    /// Encryption or decryption failed.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// A key file could not be generated, read, or parsed.
    #[error("key error: {0}")]
    Key(String),

    /// The readiness barrier expired before every peer was heard from.
    #[error("readiness barrier timed out; still missing: {missing:?}")]
    BarrierTimeout {
        /// Peers that never signaled readiness.
        missing: Vec<NodeId>,
    },

    /// The outbound queue for a peer has been torn down.
    #[error("outbound channel to {0} closed")]
    ChannelClosed(NodeId),
}

/// Convenience result type for networking operations.
pub type Result<T> = std::result::Result<T, NetError>;
