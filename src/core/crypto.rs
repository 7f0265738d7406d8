//! Credential encryption for provider connections
//!
//! Provider tokens are stored encrypted with AES-256-GCM. The 32-byte key is
//! derived from the configured secret with SHA-256; the stored form is
//! base64(nonce || ciphertext).

use crate::core::error::{CuratorError, Result};
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use sha2::{Digest, Sha256};

const NONCE_LEN: usize = 12;

/// Encrypts and decrypts provider credentials with a key derived from a secret
#[derive(Clone)]
pub struct CredentialCipher {
    key: [u8; 32],
}

impl CredentialCipher {
    pub fn from_secret(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Self { key }
    }

    pub fn encrypt(&self, value: &str) -> Result<String> {
        let cipher = Aes256Gcm::new((&self.key).into());

        let mut nonce_bytes = [0u8; NONCE_LEN];
        use aes_gcm::aead::rand_core::RngCore;
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, value.as_bytes())
            .map_err(|e| CuratorError::ConfigError(format!("Encryption failed: {}", e)))?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend_from_slice(&ciphertext);

        Ok(general_purpose::STANDARD.encode(&combined))
    }

    pub fn decrypt(&self, encrypted: &str) -> Result<String> {
        let cipher = Aes256Gcm::new((&self.key).into());

        let combined = general_purpose::STANDARD
            .decode(encrypted)
            .map_err(|e| CuratorError::ConfigError(format!("Invalid encrypted data: {}", e)))?;

        if combined.len() < NONCE_LEN {
            return Err(CuratorError::ConfigError(
                "Invalid encrypted data length".to_string(),
            ));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| CuratorError::ConfigError(format!("Decryption failed: {}", e)))?;

        String::from_utf8(plaintext).map_err(|e| {
            CuratorError::ConfigError(format!("Invalid UTF-8 in decrypted data: {}", e))
        })
    }
}
