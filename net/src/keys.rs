//! RSA key-file generation and loading.
//!
//! Key files are PEM-encoded: PKCS#8 for private keys, SPKI for public
//! keys.  The encrypted network reads its own private key and every peer's
//! public key from disk; this module is the only place that touches the
//! files.

use {
    crate::error::{NetError, Result},
    log::info,
    rsa::{
        pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding},
        RsaPrivateKey, RsaPublicKey,
    },
    std::path::Path,
};

/// Generate a fresh RSA keypair and write it to the two given files:
/// PKCS#8 PEM for the private key, SPKI PEM for the public key.
pub fn generate_keypair_files(
    private_key_path: &Path,
    public_key_path: &Path,
    modulus_bits: usize,
) -> Result<()> {
    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, modulus_bits)
        .map_err(|e| NetError::Key(format!("keypair generation failed: {e}")))?;
    let public_key = RsaPublicKey::from(&private_key);

    let private_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| NetError::Key(format!("private key encoding failed: {e}")))?;
    std::fs::write(private_key_path, private_pem.as_bytes())?;

    let public_pem = public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| NetError::Key(format!("public key encoding failed: {e}")))?;
    std::fs::write(public_key_path, public_pem)?;

    info!(
        "wrote {modulus_bits}-bit keypair to {} / {}",
        private_key_path.display(),
        public_key_path.display()
    );
    Ok(())
}

/// Load a PKCS#8 PEM private key.
pub fn load_private_key(path: &Path) -> Result<RsaPrivateKey> {
    let pem = std::fs::read_to_string(path)?;
    RsaPrivateKey::from_pkcs8_pem(&pem)
        .map_err(|e| NetError::Key(format!("{}: {e}", path.display())))
}

/// Load an SPKI PEM public key.
pub fn load_public_key(path: &Path) -> Result<RsaPublicKey> {
    let pem = std::fs::read_to_string(path)?;
    RsaPublicKey::from_public_key_pem(&pem)
        .map_err(|e| NetError::Key(format!("{}: {e}", path.display())))
}

// ── Tests ───────────────────────────────────────────────────────────────────
