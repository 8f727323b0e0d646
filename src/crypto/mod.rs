//! Cryptographic building blocks for the end-to-end layer.
//!
//! This module provides:
//! - AES-256-GCM authenticated encryption keyed by the PAKE session key
//! - the framed encrypting/decrypting stream adapter
//!
//! Nonces come straight from the OS entropy source. The session key
//! itself is derived in [`crate::pake`] and zeroized on drop.

mod cipher;
mod stream;

pub use cipher::AeadCipher;
pub use stream::EncryptedStream;

/// Size of the symmetric session key in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// Size of the AES-GCM nonce in bytes (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Size of the AES-GCM authentication tag in bytes (128 bits).
pub const TAG_SIZE: usize = 16;

/// Largest plaintext carried by a single frame.
pub const MAX_PLAINTEXT: usize = 16 * 1024;

/// Largest wire frame body: nonce, ciphertext, and tag.
pub const MAX_FRAME: usize = NONCE_SIZE + MAX_PLAINTEXT + TAG_SIZE;
