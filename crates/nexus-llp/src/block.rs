//! Compact block-header codec.
//!
//! The node serves templates as a fixed 92-byte record, all integers
//! big-endian:
//!
//! ```text
//! offset  field          size
//! 0       version        4
//! 4       prev_hash      32
//! 36      merkle_root    32
//! 68      channel        4
//! 72      height         4
//! 76      bits           4
//! 80      nonce          8
//! 88      time           4
//! ```
//!
//! An earlier protocol dialect used a 216-byte header with a 1024-bit
//! previous-block hash; only the compact layout exists on the current wire
//! and this codec handles nothing else.

use crate::{bytes as codec, LlpResult};

/// Serialized size of the compact header.
pub const HEADER_SIZE: usize = 92;

/// Prime-channel selector.
pub const CHANNEL_PRIME: u32 = 1;
/// Hash-channel selector.
pub const CHANNEL_HASH: u32 = 2;

/// A compact block header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block format version.
    pub version: u32,
    /// Hash of the previous block.
    pub prev_hash: [u8; 32],
    /// Merkle root of the block's transactions.
    pub merkle_root: [u8; 32],
    /// Mining channel (1 = prime, 2 = hash).
    pub channel: u32,
    /// Block height.
    pub height: u32,
    /// Compact difficulty target.
    pub bits: u32,
    /// Search nonce.
    pub nonce: u64,
    /// Block timestamp.
    pub time: u32,
}

impl BlockHeader {
    /// Decode a header from the front of `data`.
    ///
    /// Exactly [`HEADER_SIZE`] bytes are consumed; trailing bytes are the
    /// caller's concern. Fails with `TruncatedBuffer` below 92 bytes.
    pub fn decode(data: &[u8]) -> LlpResult<Self> {
        Ok(Self {
            version: codec::u32_be(data, 0)?,
            prev_hash: codec::hash256(data, 4)?,
            merkle_root: codec::hash256(data, 36)?,
            channel: codec::u32_be(data, 68)?,
            height: codec::u32_be(data, 72)?,
            bits: codec::u32_be(data, 76)?,
            nonce: codec::u64_be(data, 80)?,
            time: codec::u32_be(data, 88)?,
        })
    }

    /// Encode into exactly [`HEADER_SIZE`] bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE);
        codec::put_u32_be(&mut out, self.version);
        out.extend_from_slice(&self.prev_hash);
        out.extend_from_slice(&self.merkle_root);
        codec::put_u32_be(&mut out, self.channel);
        codec::put_u32_be(&mut out, self.height);
        codec::put_u32_be(&mut out, self.bits);
        codec::put_u64_be(&mut out, self.nonce);
        codec::put_u32_be(&mut out, self.time);
        debug_assert_eq!(out.len(), HEADER_SIZE);
        out
    }

    /// True when the merkle root is entirely zero.
    pub fn merkle_is_zero(&self) -> bool {
        self.merkle_root.iter().all(|&b| b == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> BlockHeader {
        BlockHeader {
            version: 4,
            prev_hash: [0x11; 32],
            merkle_root: [0x22; 32],
            channel: CHANNEL_HASH,
            height: 1000,
            bits: 0x7b7f0000,
            nonce: 0xDEADBEEFCAFEBABE,
            time: 1_700_000_000,
        }
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let header = sample_header();
        let bytes = header.encode();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(BlockHeader::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn test_field_positions_are_big_endian() {
        let header = sample_header();
        let bytes = header.encode();
        assert_eq!(&bytes[0..4], &[0, 0, 0, 4]);
        assert_eq!(&bytes[68..72], &[0, 0, 0, 2]);
        assert_eq!(&bytes[72..76], &[0, 0, 0x03, 0xE8]);
        assert_eq!(&bytes[76..80], &[0x7b, 0x7f, 0, 0]);
        assert_eq!(
            &bytes[80..88],
            &[0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE, 0xBA, 0xBE]
        );
    }

    #[test]
    fn test_short_buffer_rejected() {
        let header = sample_header();
        let mut bytes = header.encode();
        bytes.truncate(91);
        assert!(BlockHeader::decode(&bytes).is_err());
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let header = sample_header();
        let mut bytes = header.encode();
        bytes.extend_from_slice(&[0xFF; 16]);
        assert_eq!(BlockHeader::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn test_merkle_zero_detection() {
        let mut header = sample_header();
        assert!(!header.merkle_is_zero());
        header.merkle_root = [0u8; 32];
        assert!(header.merkle_is_zero());
    }
}
