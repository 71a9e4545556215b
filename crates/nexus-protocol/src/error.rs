//! Session and template error types.

use thiserror::Error;

/// Why a received template was not accepted. Each validation step has its
/// own kind so rejections can be counted and diagnosed precisely.
#[derive(Error, Debug)]
pub enum TemplateError {
    /// Payload did not decode into a compact block header.
    #[error("Template parse failed: {0}")]
    Parse(#[from] nexus_llp::LlpError),

    /// Empty or missing template payload.
    #[error("Empty template payload")]
    Empty,

    /// Header channel differs from the session channel.
    #[error("Channel mismatch: expected {expected}, got {got}")]
    ChannelMismatch { expected: u32, got: u32 },

    /// Height regression or superseded template.
    #[error("Stale template: received height {received}, current {current}")]
    Stale { received: u32, current: u32 },

    /// Compact difficulty field is zero.
    #[error("Invalid difficulty: bits is zero")]
    ZeroBits,

    /// Merkle root is entirely zero.
    #[error("Invalid merkle root: all zeros")]
    ZeroMerkle,

    /// Submission fields rejected before signing.
    #[error("Submission verification failed: {0}")]
    Submission(String),
}

impl TemplateError {
    /// True for height-regression rejections.
    pub fn is_stale(&self) -> bool {
        matches!(self, TemplateError::Stale { .. })
    }
}

/// Session-level errors. Everything here escalates past the state machine's
/// in-place recovery: the connection manager resets the session and arms the
/// reconnect timer.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Signing oracle failure.
    #[error("Crypto failure: {0}")]
    Crypto(#[from] nexus_crypto::CryptoError),

    /// Node replied AUTH_RESULT = failure.
    #[error("Authentication rejected by node")]
    AuthRejected,

    /// Node attempted the retired challenge-response handshake.
    #[error("Node negotiated legacy challenge-response authentication")]
    LegacyChallenge,

    /// Node asked to close the connection.
    #[error("Connection closed by node")]
    ConnectionClosed,

    /// Framing failure on an outbound packet.
    #[error("Wire error: {0}")]
    Llp(#[from] nexus_llp::LlpError),

    /// Transport failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for session operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
