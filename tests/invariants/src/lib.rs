//! Replicast Property-Based Invariant Tests
//!
//! Uses proptest to verify critical invariants across:
//! - Wire framing: round-trip identity under arbitrary stream chunking
//! - Canonical fingerprints: stability across structurally equal values
//! - Reliable broadcast safety under adversarial event sequences
