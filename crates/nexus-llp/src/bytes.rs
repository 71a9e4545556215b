//! Integer and hash byte codec.
//!
//! The LLP wire format mixes endianness deliberately: packet framing and
//! block-header integers travel big-endian, while the authentication and
//! submission inner fields travel little-endian. Every helper here names its
//! byte order explicitly; there is no default.

use crate::{LlpError, LlpResult};

fn require(buf: &[u8], offset: usize, need: usize) -> LlpResult<()> {
    if buf.len() < offset + need {
        return Err(LlpError::TruncatedBuffer {
            offset,
            need,
            have: buf.len().saturating_sub(offset),
        });
    }
    Ok(())
}

/// Decode a big-endian u16 at `offset`.
pub fn u16_be(buf: &[u8], offset: usize) -> LlpResult<u16> {
    require(buf, offset, 2)?;
    Ok(u16::from_be_bytes([buf[offset], buf[offset + 1]]))
}

/// Decode a little-endian u16 at `offset`.
pub fn u16_le(buf: &[u8], offset: usize) -> LlpResult<u16> {
    require(buf, offset, 2)?;
    Ok(u16::from_le_bytes([buf[offset], buf[offset + 1]]))
}

/// Decode a big-endian u32 at `offset`.
pub fn u32_be(buf: &[u8], offset: usize) -> LlpResult<u32> {
    require(buf, offset, 4)?;
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    Ok(u32::from_be_bytes(bytes))
}

/// Decode a little-endian u32 at `offset`.
pub fn u32_le(buf: &[u8], offset: usize) -> LlpResult<u32> {
    require(buf, offset, 4)?;
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    Ok(u32::from_le_bytes(bytes))
}

/// Decode a big-endian u64 at `offset`.
pub fn u64_be(buf: &[u8], offset: usize) -> LlpResult<u64> {
    require(buf, offset, 8)?;
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    Ok(u64::from_be_bytes(bytes))
}

/// Decode a little-endian u64 at `offset`.
pub fn u64_le(buf: &[u8], offset: usize) -> LlpResult<u64> {
    require(buf, offset, 8)?;
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    Ok(u64::from_le_bytes(bytes))
}

/// Append a big-endian u16.
pub fn put_u16_be(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_be_bytes());
}

/// Append a little-endian u16.
pub fn put_u16_le(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Append a big-endian u32.
pub fn put_u32_be(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

/// Append a little-endian u32.
pub fn put_u32_le(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Append a big-endian u64.
pub fn put_u64_be(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_be_bytes());
}

/// Append a little-endian u64.
pub fn put_u64_le(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Copy a 256-bit hash out of `buf` at `offset`.
pub fn hash256(buf: &[u8], offset: usize) -> LlpResult<[u8; 32]> {
    require(buf, offset, 32)?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&buf[offset..offset + 32]);
    Ok(out)
}

/// Copy a 512-bit hash out of `buf` at `offset`.
pub fn hash512(buf: &[u8], offset: usize) -> LlpResult<[u8; 64]> {
    require(buf, offset, 64)?;
    let mut out = [0u8; 64];
    out.copy_from_slice(&buf[offset..offset + 64]);
    Ok(out)
}

/// Copy a 1024-bit hash out of `buf` at `offset`.
pub fn hash1024(buf: &[u8], offset: usize) -> LlpResult<[u8; 128]> {
    require(buf, offset, 128)?;
    let mut out = [0u8; 128];
    out.copy_from_slice(&buf[offset..offset + 128]);
    Ok(out)
}

/// Encode bytes as lowercase hex.
pub fn to_hex(data: &[u8]) -> String {
    hex::encode(data)
}

/// Decode a hex string under the strict policy: even length, case-insensitive,
/// no whitespace. Nothing is returned on failure.
pub fn from_hex(s: &str) -> LlpResult<Vec<u8>> {
    if s.len() % 2 != 0 {
        return Err(LlpError::InvalidHex(format!(
            "odd length {} (hex strings must encode whole bytes)",
            s.len()
        )));
    }
    hex::decode(s).map_err(|e| LlpError::InvalidHex(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_roundtrips() {
        let mut buf = Vec::new();
        put_u32_be(&mut buf, 0xDEADBEEF);
        put_u32_le(&mut buf, 0xDEADBEEF);
        put_u64_be(&mut buf, 0x0102030405060708);
        put_u64_le(&mut buf, 0x0102030405060708);
        put_u16_be(&mut buf, 0xABCD);
        put_u16_le(&mut buf, 0xABCD);

        assert_eq!(u32_be(&buf, 0).unwrap(), 0xDEADBEEF);
        assert_eq!(u32_le(&buf, 4).unwrap(), 0xDEADBEEF);
        assert_eq!(u64_be(&buf, 8).unwrap(), 0x0102030405060708);
        assert_eq!(u64_le(&buf, 16).unwrap(), 0x0102030405060708);
        assert_eq!(u16_be(&buf, 24).unwrap(), 0xABCD);
        assert_eq!(u16_le(&buf, 26).unwrap(), 0xABCD);
    }

    #[test]
    fn test_endianness_is_not_interchangeable() {
        let buf = [0x12, 0x34, 0x56, 0x78];
        assert_eq!(u32_be(&buf, 0).unwrap(), 0x12345678);
        assert_eq!(u32_le(&buf, 0).unwrap(), 0x78563412);
    }

    #[test]
    fn test_truncated_decode() {
        let buf = [0u8; 3];
        match u32_be(&buf, 0) {
            Err(LlpError::TruncatedBuffer { need: 4, have: 3, .. }) => {}
            other => panic!("expected TruncatedBuffer, got {:?}", other),
        }
        assert!(u64_le(&buf, 0).is_err());
        assert!(u16_be(&buf, 2).is_err());
    }

    #[test]
    fn test_hash_extraction() {
        let mut buf = vec![0u8; 130];
        buf[1] = 0xAA;
        buf[32] = 0xBB;
        let h = hash256(&buf, 1).unwrap();
        assert_eq!(h[0], 0xAA);
        assert_eq!(h[31], 0xBB);
        assert!(hash512(&buf, 100).is_err());
        assert!(hash1024(&buf, 0).is_ok());
        assert!(hash1024(&buf, 3).is_err());
    }

    #[test]
    fn test_hex_roundtrip() {
        let data = vec![0x00, 0x7f, 0xff, 0x10];
        let s = to_hex(&data);
        assert_eq!(s, "007fff10");
        assert_eq!(from_hex(&s).unwrap(), data);
        // Case-insensitive decode.
        assert_eq!(from_hex("007FFF10").unwrap(), data);
    }

    #[test]
    fn test_hex_strict_policy() {
        assert!(from_hex("abc").is_err());
        assert!(from_hex("zz").is_err());
        assert!(from_hex("").unwrap().is_empty());
    }
}
