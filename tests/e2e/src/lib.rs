//! Replicast End-to-End Test Suite
//!
//! Exercises the broadcast strategies, the router, and both transports as
//! whole systems: multiple nodes, real handshakes, fault injection.  Fast
//! deterministic scenarios run over an in-memory hub network; transport
//! scenarios run over loopback TCP.
//!
//! Each test file can be run independently:
//!
//! ```bash
//! cargo test -p replicast-e2e-tests --test best_effort_network -- --nocapture
//! cargo test -p replicast-e2e-tests --test reliable_broadcast -- --nocapture
//! cargo test -p replicast-e2e-tests --test byzantine_faults -- --nocapture
//! cargo test -p replicast-e2e-tests --test router_lifecycle -- --nocapture
//! cargo test -p replicast-e2e-tests --test secure_transport -- --nocapture
//! cargo test -p replicast-e2e-tests --test network_bootstrap -- --nocapture
//! ```
