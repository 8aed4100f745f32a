//! Symmetric envelope for private-key material at rest.
//!
//! Blob layout: `16-byte salt ∥ 12-byte nonce ∥ AES-256-GCM ciphertext+tag`.
//! The key is derived per blob with PBKDF2-HMAC-SHA256 (4096 iterations,
//! 32-byte key); salt and nonce are fresh per encryption.

use crate::infra::error::{SignerError, SignerResult};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const PBKDF2_ITERATIONS: u32 = 4096;

fn derive_key(password: &[u8], salt: &[u8]) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, PBKDF2_ITERATIONS, &mut key);
    key
}

/// Encrypt `plaintext` under the vault password.
pub fn encrypt(plaintext: &[u8], password: &[u8]) -> SignerResult<Vec<u8>> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let key = derive_key(password, &salt);
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| SignerError::VaultUnreadable(e.to_string()))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|e| SignerError::VaultUnreadable(format!("encryption failed: {e}")))?;

    let mut out = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a vault blob. Authentication failure is [`SignerError::VaultTampered`].
pub fn decrypt(blob: &[u8], password: &[u8]) -> SignerResult<Vec<u8>> {
    if blob.len() < SALT_LEN + NONCE_LEN {
        return Err(SignerError::VaultUnreadable("data too short".to_string()));
    }
    let (salt, rest) = blob.split_at(SALT_LEN);
    let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);

    let key = derive_key(password, salt);
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| SignerError::VaultUnreadable(e.to_string()))?;
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| SignerError::VaultTampered)
}
