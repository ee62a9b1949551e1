//! Canonical serialization and message fingerprints.
//!
//! Fingerprints are compared across nodes, so every node must serialize
//! structurally equal values to identical bytes.  The canonical form is the
//! `serde_json` encoding of a [`Value`]: object keys iterate in sorted
//! (`BTreeMap`) order and numbers use serde_json's standard formatting.
//! All hashing and map keying in this crate goes through this module.

use {
    crate::error::Result,
    serde_json::Value,
    sha2::{Digest, Sha256},
};

/// Canonical byte encoding of a value.
pub fn canonical_bytes(value: &Value) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Canonical string encoding of a value, used as a map key.
pub fn canonical_string(value: &Value) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Fingerprint of an annotated broadcast message: the originating UUID plus
/// the SHA-256 of the canonical serialization.  Two messages are the same
/// logical message iff their fingerprints match; the originator id is part
/// of the hashed content.
pub fn message_fingerprint(uuid: &str, annotated: &Value) -> Result<String> {
    let digest = Sha256::digest(canonical_bytes(annotated)?);
    let mut fingerprint = String::with_capacity(uuid.len() + 1 + digest.len() * 2);
    fingerprint.push_str(uuid);
    fingerprint.push(':');
    for byte in digest {
        fingerprint.push_str(&format!("{byte:02x}"));
    }
    Ok(fingerprint)
}

// ── Tests ───────────────────────────────────────────────────────────────────
