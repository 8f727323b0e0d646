//! AES-256-GCM seal/open keyed by the PAKE session key.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};

use crate::crypto::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};
use crate::error::{Error, Result};

/// AES-256-GCM cipher for frame payloads.
#[derive(Clone)]
pub struct AeadCipher {
    cipher: Aes256Gcm,
}

impl AeadCipher {
    /// Create a cipher from a 32-byte session key.
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_SIZE {
            return Err(Error::invalid_message(format!(
                "session key must be {KEY_SIZE} bytes, got {}",
                key.len()
            )));
        }
        Ok(Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        })
    }

    /// Encrypt `plaintext` under `nonce`, returning ciphertext with the
    /// 16-byte tag appended.
    pub fn seal(&self, nonce: &[u8; NONCE_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
        self.cipher
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .map_err(|_| Error::invalid_message("encryption failed"))
    }

    /// Decrypt and authenticate `ciphertext` (tag included) under `nonce`.
    pub fn open(&self, nonce: &[u8; NONCE_SIZE], ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < TAG_SIZE {
            return Err(Error::invalid_message(format!(
                "ciphertext shorter than tag: {} bytes",
                ciphertext.len()
            )));
        }
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::invalid_message("decryption/authentication failed"))
    }
}
