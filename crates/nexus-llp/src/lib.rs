//! # nexus-llp
//!
//! Wire layer for the miner-to-node LLP session.
//!
//! This crate provides:
//! - Explicit-endianness integer and hash byte codec
//! - Packet framing with a re-entrant stream parser
//! - The compact 92-byte block-header codec
//! - The signed block-submission payload codec

pub mod bytes;
mod block;
mod error;
mod packet;
mod submit;

pub use block::{BlockHeader, CHANNEL_HASH, CHANNEL_PRIME, HEADER_SIZE};
pub use error::{LlpError, LlpResult};
pub use packet::{
    opcode_name, opcodes, packet_class, parse_packet, LlpCodec, Packet, PacketClass, Parsed,
    MAX_PAYLOAD_SIZE,
};
pub use submit::{
    widen_merkle_root, BlockSubmission, SUBMIT_PREFIX_SIZE, SUBMIT_SIGNED_SIZE,
};
