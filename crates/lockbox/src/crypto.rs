//! symmetric primitives
//!
//! - chacha20poly1305 for pairing sessions (12 byte iv)
//! - xchacha20poly1305 for the lockbox (24 byte nonce)
//!
//! open functions return `None` on authentication failure; callers
//! treat that as "message did not decrypt" rather than as an error.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce, XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::{Error, Result};

pub const SESSION_KEY_LEN: usize = 32;
pub const SESSION_IV_LEN: usize = 12;
pub const LOCKBOX_KEY_LEN: usize = 32;
pub const LOCKBOX_NONCE_LEN: usize = 24;

/// generate random bytes
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// encrypt under a session key
pub fn session_seal(
    key: &[u8; SESSION_KEY_LEN],
    iv: &[u8; SESSION_IV_LEN],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(key.into());
    cipher
        .encrypt(Nonce::from_slice(iv), plaintext)
        .map_err(|e| Error::EncryptionFailed(e.to_string()))
}

/// decrypt under a session key
pub fn session_open(
    key: &[u8; SESSION_KEY_LEN],
    iv: &[u8; SESSION_IV_LEN],
    ciphertext: &[u8],
) -> Option<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(key.into());
    cipher.decrypt(Nonce::from_slice(iv), ciphertext).ok()
}

/// encrypt under the lockbox key
pub fn lockbox_seal(
    key: &[u8; LOCKBOX_KEY_LEN],
    nonce: &[u8; LOCKBOX_NONCE_LEN],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.into());
    cipher
        .encrypt(XNonce::from_slice(nonce), plaintext)
        .map_err(|e| Error::EncryptionFailed(e.to_string()))
}

/// decrypt under the lockbox key
pub fn lockbox_open(
    key: &[u8; LOCKBOX_KEY_LEN],
    nonce: &[u8; LOCKBOX_NONCE_LEN],
    ciphertext: &[u8],
) -> Option<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.into());
    cipher.decrypt(XNonce::from_slice(nonce), ciphertext).ok()
}
