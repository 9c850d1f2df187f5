//! Encryption at rest
//!
//! Provides:
//! - AES-256-GCM encryption with a random 96-bit nonce prepended to the ciphertext
//! - A key ring: the legacy master key plus named keys for rotation
//! - Plaintext checksums (hex SHA-256) used as forensic fingerprints
//!
//! The checksum never depends on the key, so re-encrypting identical content
//! under another key still matches the stored fingerprint.

use crate::config::CryptoConfig;
use crate::errors::{AppError, Result};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use zeroize::{Zeroize, ZeroizeOnDrop};

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// 256-bit key material, wiped on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
struct KeyMaterial([u8; KEY_LEN]);

impl KeyMaterial {
    /// 64 hex chars are taken verbatim, anything else is hashed down to 32 bytes
    fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.len() == KEY_LEN * 2 {
            if let Ok(bytes) = hex::decode(trimmed) {
                let mut key = [0u8; KEY_LEN];
                key.copy_from_slice(&bytes);
                return KeyMaterial(key);
            }
        }
        let digest = Sha256::digest(trimmed.as_bytes());
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&digest);
        KeyMaterial(key)
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.0).map_err(|_| AppError::Configuration {
            message: "invalid encryption key length".to_string(),
        })
    }
}

/// Output of a successful encryption
#[derive(Debug, Clone)]
pub struct EncryptedContent {
    /// Nonce followed by the AEAD ciphertext and tag
    pub ciphertext: Vec<u8>,
    /// Hex SHA-256 of the plaintext
    pub checksum: String,
    /// Key ring entry used; `None` for the master key
    pub key_id: Option<String>,
}

/// Symmetric encryption of file bytes
#[derive(Clone)]
pub struct CryptoStore {
    master: KeyMaterial,
    keys: HashMap<String, KeyMaterial>,
    active_key_id: Option<String>,
}

impl std::fmt::Debug for CryptoStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoStore")
            .field("key_ids", &self.keys.keys().collect::<Vec<_>>())
            .field("active_key_id", &self.active_key_id)
            .finish()
    }
}

impl CryptoStore {
    /// Build a store that only knows the master key
    pub fn new(master_key: &str) -> Self {
        Self {
            master: KeyMaterial::parse(master_key),
            keys: HashMap::new(),
            active_key_id: None,
        }
    }

    /// Build the key ring from configuration
    pub fn from_config(config: &CryptoConfig) -> Result<Self> {
        let master = config.master_key.as_deref().ok_or_else(|| AppError::Configuration {
            message: "crypto.master_key is not set".to_string(),
        })?;

        let mut store = Self::new(master);
        for (id, raw) in &config.keys {
            store = store.with_key(id.clone(), raw);
        }

        if let Some(active) = &config.active_key_id {
            if !store.keys.contains_key(active) {
                return Err(AppError::Configuration {
                    message: format!("crypto.active_key_id '{}' is not in crypto.keys", active),
                });
            }
            store.active_key_id = Some(active.clone());
        }

        Ok(store)
    }

    /// Register a named key
    pub fn with_key(mut self, id: impl Into<String>, raw: &str) -> Self {
        self.keys.insert(id.into(), KeyMaterial::parse(raw));
        self
    }

    /// Use a named key for new encryptions
    pub fn with_active_key(mut self, id: impl Into<String>) -> Self {
        self.active_key_id = Some(id.into());
        self
    }

    /// Generate a fresh random key as hex, for provisioning
    pub fn generate_key_hex() -> String {
        let bytes: [u8; KEY_LEN] = rand::random();
        hex::encode(bytes)
    }

    /// Hex SHA-256 of the plaintext
    pub fn checksum(plaintext: &[u8]) -> String {
        hex::encode(Sha256::digest(plaintext))
    }

    /// Fail with `ChecksumMismatch` unless `plaintext` hashes to `expected`
    pub fn verify_checksum(plaintext: &[u8], expected: &str, resource: &str) -> Result<()> {
        if Self::checksum(plaintext).eq_ignore_ascii_case(expected) {
            Ok(())
        } else {
            Err(AppError::ChecksumMismatch {
                resource: resource.to_string(),
            })
        }
    }

    fn key(&self, key_id: Option<&str>) -> Result<&KeyMaterial> {
        match key_id {
            None => Ok(&self.master),
            Some(id) => self.keys.get(id).ok_or_else(|| AppError::CorruptData {
                resource: format!("encryption key {}", id),
                message: "unknown key id".to_string(),
            }),
        }
    }

    /// Encrypt under the active key, computing the plaintext checksum first
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedContent> {
        let checksum = Self::checksum(plaintext);
        let key_id = self.active_key_id.clone();
        let cipher = self.key(key_id.as_deref())?.cipher()?;

        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let sealed = cipher.encrypt(nonce, plaintext).map_err(|_| AppError::Internal {
            message: "encryption failed".to_string(),
        })?;

        let mut ciphertext = Vec::with_capacity(NONCE_LEN + sealed.len());
        ciphertext.extend_from_slice(&nonce_bytes);
        ciphertext.extend_from_slice(&sealed);

        Ok(EncryptedContent {
            ciphertext,
            checksum,
            key_id,
        })
    }

    /// Decrypt bytes produced by [`encrypt`](Self::encrypt).
    ///
    /// `key_id` is the id recorded on the file; `None` selects the master key.
    /// Anything that fails to authenticate is `CorruptData`.
    pub fn decrypt(&self, ciphertext: &[u8], key_id: Option<&str>) -> Result<Vec<u8>> {
        if ciphertext.len() < NONCE_LEN {
            return Err(AppError::CorruptData {
                resource: "ciphertext".to_string(),
                message: "shorter than nonce".to_string(),
            });
        }

        let cipher = self.key(key_id)?.cipher()?;
        let (nonce_bytes, sealed) = ciphertext.split_at(NONCE_LEN);

        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), sealed)
            .map_err(|_| AppError::CorruptData {
                resource: "ciphertext".to_string(),
                message: "authentication failed".to_string(),
            })
    }
}
