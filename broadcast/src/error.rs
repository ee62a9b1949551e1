//! Error types for the broadcast layer.

use thiserror::Error;

/// Errors that can occur in the broadcast strategies and the router.
#[derive(Error, Debug)]
pub enum BroadcastError {
    /// A transport-level failure bubbled up from the network.
    #[error(transparent)]
    Network(#[from] replicast_net::NetError),

    /// Failed to encode or decode a payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// `add_receiver_for` was called twice for the same target.
    #[error("a receiver is already registered for target {0}")]
    DuplicateReceiver(String),

    /// A payload was delivered for a target that has no receiver, even
    /// after the materialization attempt.
    #[error(
        "no receiver for target {0} after materialization; the replica was \
         likely created against a different router instance"
    )]
    ReceiverMissing(String),
}

/// Convenience result type for broadcast operations.
pub type Result<T> = std::result::Result<T, BroadcastError>;
