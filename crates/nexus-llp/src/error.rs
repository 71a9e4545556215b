//! Wire protocol error types.

use thiserror::Error;

/// Errors produced by the LLP codecs and framing layer.
#[derive(Error, Debug)]
pub enum LlpError {
    /// Decoder ran past the end of the input.
    #[error("Truncated buffer: need {need} bytes at offset {offset}, have {have}")]
    TruncatedBuffer {
        offset: usize,
        need: usize,
        have: usize,
    },

    /// Opcode violates its class framing rules.
    #[error("Invalid opcode {opcode} ({name}): {reason}")]
    InvalidOpcode {
        opcode: u8,
        name: &'static str,
        reason: &'static str,
    },

    /// Declared payload length exceeds the allowed maximum.
    #[error("Packet too large: opcode {opcode} declared {size} bytes, max {max}")]
    PacketTooLarge { opcode: u8, size: usize, max: usize },

    /// Required payload absent.
    #[error("Empty payload for opcode {opcode} ({name})")]
    EmptyPayload { opcode: u8, name: &'static str },

    /// Hex string rejected by the strict decode policy.
    #[error("Invalid hex: {0}")]
    InvalidHex(String),

    /// Field does not fit its wire encoding.
    #[error("Field out of range: {0}")]
    FieldOutOfRange(String),

    /// I/O error from the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for LLP operations.
pub type LlpResult<T> = Result<T, LlpError>;
