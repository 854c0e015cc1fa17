//! AES-256-GCM sealing of whole credential sets.
//!
//! A set is serialized to JSON and encrypted as one unit under a fresh nonce,
//! so a persisted row can only ever decrypt to a complete set.

use super::CredentialSet;
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Size of the master key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Decodes a base64 master key and checks it is exactly 32 bytes.
pub fn validate_key(key_base64: &str) -> Result<Vec<u8>> {
    let key_bytes = BASE64
        .decode(key_base64.trim())
        .context("Failed to decode base64 encryption key")?;

    if key_bytes.len() != KEY_SIZE {
        return Err(anyhow!(
            "Encryption key must be {} bytes (256 bits), got {} bytes",
            KEY_SIZE,
            key_bytes.len()
        ));
    }

    Ok(key_bytes)
}

fn cipher(key: &[u8]) -> Result<Aes256Gcm> {
    if key.len() != KEY_SIZE {
        return Err(anyhow!("Encryption key must be {} bytes", KEY_SIZE));
    }
    Aes256Gcm::new_from_slice(key).map_err(|e| anyhow!("Failed to create cipher: {}", e))
}

/// Seals a credential set.
///
/// # Returns
/// * `Ok((ciphertext, nonce))` - both base64-encoded
/// * `Err` - If serialization or encryption fails
pub fn seal(credentials: &CredentialSet, key: &[u8]) -> Result<(String, String)> {
    let cipher = cipher(key)?;
    let plaintext = serde_json::to_vec(credentials).context("Failed to serialize credentials")?;

    // Never reuse a nonce under the same key
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_ref())
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    Ok((BASE64.encode(&ciphertext), BASE64.encode(nonce)))
}

/// Opens a sealed credential set.
///
/// Fails on a wrong key, a mismatched nonce, or any tampering with the ciphertext.
pub fn open(ciphertext: &str, nonce: &str, key: &[u8]) -> Result<CredentialSet> {
    let cipher = cipher(key)?;

    let ciphertext = BASE64
        .decode(ciphertext)
        .context("Failed to decode ciphertext")?;
    let nonce_bytes = BASE64.decode(nonce).context("Failed to decode nonce")?;
    if nonce_bytes.len() != NONCE_SIZE {
        return Err(anyhow!(
            "Invalid nonce size: expected {}, got {}",
            NONCE_SIZE,
            nonce_bytes.len()
        ));
    }

    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
        .map_err(|e| anyhow!("Decryption failed (wrong key or corrupted data): {}", e))?;

    serde_json::from_slice(&plaintext).context("Decrypted data is not a credential set")
}
