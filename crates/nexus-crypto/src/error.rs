//! Crypto error types.

use thiserror::Error;

/// Errors from the Falcon signing oracle and key handling.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Key material has the wrong size for Falcon-512.
    #[error("Invalid {kind} key size: expected {expected} bytes, got {got}")]
    InvalidKeySize {
        kind: &'static str,
        expected: usize,
        got: usize,
    },

    /// Key or signature bytes rejected by the primitive.
    #[error("Malformed {0}: {1}")]
    Malformed(&'static str, String),

    /// Key material is not valid hex.
    #[error("Invalid key hex: {0}")]
    InvalidKeyHex(String),

    /// Refusing to sign an empty message.
    #[error("Cannot sign empty data")]
    EmptyMessage,
}

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;
