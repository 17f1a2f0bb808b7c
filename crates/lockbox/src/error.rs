//! error types for lockbox
//!
//! only programmer/sequencing bugs and decode failures are errors.
//! a failed decrypt or an insufficient set of shares is an expected
//! outcome and is reported through empty values instead.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    // === sequencing bugs ===
    #[error("session key not derived yet")]
    SessionKeyMissing,

    #[error("operation not supported for {0} keys")]
    UnsupportedKeyOperation(&'static str),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    // === codec errors ===
    #[error("truncated input: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("unknown {kind} tag: {tag}")]
    UnknownTag { kind: &'static str, tag: u8 },

    #[error("field too long: {len} bytes (max 65535)")]
    FieldTooLong { len: usize },

    #[error("invalid utf-8 in text field")]
    InvalidUtf8,

    #[error("invalid base45 input: {0}")]
    Base45(String),

    // === sharing errors ===
    #[error("invalid sharing parameters: {shares} shares, threshold {threshold}")]
    InvalidSharingParams { shares: usize, threshold: usize },

    #[error("invalid share format")]
    InvalidShareFormat,

    #[error("not enough shares: have {have}, need {need}")]
    NotEnoughShares { have: usize, need: usize },

    // === vault ===
    #[error("account id already in vault: {0}")]
    DuplicateAccount(String),

    // === collaborators ===
    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid config: {0}")]
    Config(String),
}
