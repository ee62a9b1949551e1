//! Configuration for the replicast networking layer.

use std::net::SocketAddr;

/// Configuration shared by the plain and encrypted networks.
///
/// Controls framing limits, reconnect behavior, and queue sizing for
/// node-to-node message delivery.
#[derive(Debug, Clone)]
pub struct NetConfig {
    /// Local address to bind the listener on.
    /// Default: `0.0.0.0:7400`
    pub bind_addr: SocketAddr,

    /// Maximum size of a single frame body in bytes.
    /// Payloads are small JSON values; 1 MB leaves generous headroom.
    pub max_frame_bytes: usize,

    /// Capacity of the per-peer outbound queue on the plain network.
    pub channel_buffer_size: usize,

    /// Initial delay before reconnecting a failed outbound socket (ms).
    /// Doubles on every consecutive failure.
    pub reconnect_base_ms: u64,

    /// Upper bound on the reconnect delay (ms).
    pub reconnect_max_ms: u64,

    /// Capacity of the per-peer outbound queue on the encrypted network.
    /// Messages sent before the session handshake completes are held here;
    /// once the queue is full further sends are dropped with a warning.
    pub max_pending_messages: usize,

    /// RSA modulus size for session handshakes, in bits.
    pub rsa_modulus_bits: usize,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:7400".parse().expect("valid default bind addr"),
            max_frame_bytes: 1_048_576, // 1 MB
            channel_buffer_size: 1_024,
            reconnect_base_ms: 100,
            reconnect_max_ms: 5_000,
            max_pending_messages: 1_024,
            rsa_modulus_bits: 2_048,
        }
    }
}

impl NetConfig {
    /// Create a config suitable for local testing: ephemeral port, short
    /// reconnect delays, small queues.
    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn dev_default() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".parse().expect("valid dev bind addr"),
            max_frame_bytes: 1_048_576,
            channel_buffer_size: 256,
            reconnect_base_ms: 20,
            reconnect_max_ms: 500,
            max_pending_messages: 256,
            // Small keys keep debug-mode key generation fast in tests.
            rsa_modulus_bits: 1_024,
        }
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_frame_bytes == 0 {
            return Err(ConfigError::InvalidMaxFrameBytes);
        }
        if self.channel_buffer_size == 0 || self.max_pending_messages == 0 {
            return Err(ConfigError::InvalidQueueCapacity);
        }
        if self.reconnect_base_ms == 0 || self.reconnect_base_ms > self.reconnect_max_ms {
            return Err(ConfigError::InvalidReconnectDelays {
                base_ms: self.reconnect_base_ms,
                max_ms: self.reconnect_max_ms,
            });
        }
        if self.rsa_modulus_bits < 1_024 || self.rsa_modulus_bits % 8 != 0 {
            return Err(ConfigError::InvalidRsaModulus(self.rsa_modulus_bits));
        }
        Ok(())
    }
}

/// Errors in network configuration.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("max_frame_bytes must be > 0")]
    InvalidMaxFrameBytes,
    #[error("queue capacities must be > 0")]
    InvalidQueueCapacity,
    #[error("reconnect delays invalid: base={base_ms}ms max={max_ms}ms")]
    InvalidReconnectDelays { base_ms: u64, max_ms: u64 },
    #[error("rsa_modulus_bits must be a multiple of 8 and >= 1024, got {0}")]
    InvalidRsaModulus(usize),
}
