//! Credential encryption utilities
//!
//! Instance and Prowlarr API keys are stored as AES-256-GCM ciphertext with a
//! per-value nonce, both base64 encoded.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use anyhow::{Result, anyhow};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use rand::RngCore;

/// AES-256-GCM nonce size (96 bits = 12 bytes)
const NONCE_SIZE: usize = 12;
/// AES-256 key size (256 bits = 32 bytes)
const KEY_SIZE: usize = 32;

/// Encrypts and decrypts stored API keys
#[derive(Clone)]
pub struct CredentialEncryption {
    cipher: Aes256Gcm,
}

impl CredentialEncryption {
    /// Create from raw key bytes. The key must be exactly 32 bytes.
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_SIZE {
            return Err(anyhow!(
                "Invalid key length: expected {} bytes, got {}",
                KEY_SIZE,
                key.len()
            ));
        }

        let cipher =
            Aes256Gcm::new_from_slice(key).map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

        Ok(Self { cipher })
    }

    /// Create from a base64-encoded key (the `ENCRYPTION_KEY` format)
    pub fn from_base64_key(key_b64: &str) -> Result<Self> {
        let key = BASE64
            .decode(key_b64.trim())
            .map_err(|e| anyhow!("Invalid base64 key: {}", e))?;
        Self::new(&key)
    }

    /// Generate a random base64 key for initial setup
    pub fn generate_key() -> String {
        let mut key = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        BASE64.encode(key)
    }

    /// Encrypt a plaintext value.
    ///
    /// Returns `(ciphertext_base64, nonce_base64)`.
    pub fn encrypt(&self, plaintext: &str) -> Result<(String, String)> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        Ok((BASE64.encode(&ciphertext), BASE64.encode(nonce_bytes)))
    }

    /// Decrypt a value produced by [`encrypt`](Self::encrypt)
    pub fn decrypt(&self, encrypted_b64: &str, nonce_b64: &str) -> Result<String> {
        let ciphertext = BASE64
            .decode(encrypted_b64)
            .map_err(|e| anyhow!("Invalid encrypted data: {}", e))?;
        let nonce_bytes = BASE64
            .decode(nonce_b64)
            .map_err(|e| anyhow!("Invalid nonce: {}", e))?;

        if nonce_bytes.len() != NONCE_SIZE {
            return Err(anyhow!(
                "Invalid nonce length: expected {}, got {}",
                NONCE_SIZE,
                nonce_bytes.len()
            ));
        }

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|e| anyhow!("Decryption failed: {}", e))?;

        String::from_utf8(plaintext).map_err(|e| anyhow!("Invalid UTF-8 in decrypted data: {}", e))
    }
}

// Never print key material
impl std::fmt::Debug for CredentialEncryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialEncryption")
            .field("cipher", &"[REDACTED]")
            .finish()
    }
}
