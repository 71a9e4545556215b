//! Block submission payload codec.
//!
//! A solved block travels as a `SUBMIT_BLOCK` packet whose payload keeps the
//! Falcon signature separate from the solved fields:
//!
//! ```text
//! merkle_root   64 bytes
//! nonce          8 bytes, little-endian
//! timestamp      8 bytes, little-endian
//! sig_len        2 bytes, little-endian
//! signature      sig_len bytes
//! ```
//!
//! Unlike the outer framing, the inner fields here are little-endian; that
//! mismatch is the node's wire format, not something to normalize away.

use crate::{bytes as codec, LlpError, LlpResult};

/// Fixed prefix ahead of the signature: merkle(64) + nonce(8) + ts(8) +
/// sig_len(2).
pub const SUBMIT_PREFIX_SIZE: usize = 82;

/// The portion covered by the signature: everything before `sig_len`.
pub const SUBMIT_SIGNED_SIZE: usize = 80;

/// A solved-block submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSubmission {
    /// Merkle root echoed from the solved template, widened to the 64-byte
    /// wire slot.
    pub merkle_root: [u8; 64],
    /// Winning nonce.
    pub nonce: u64,
    /// Submission timestamp, Unix epoch seconds.
    pub timestamp: u64,
    /// Falcon signature over the 80-byte signed prefix.
    pub signature: Vec<u8>,
}

impl BlockSubmission {
    /// The signed prefix: `merkle_root ∥ nonce_le ∥ timestamp_le`.
    pub fn signed_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SUBMIT_SIGNED_SIZE);
        out.extend_from_slice(&self.merkle_root);
        codec::put_u64_le(&mut out, self.nonce);
        codec::put_u64_le(&mut out, self.timestamp);
        out
    }

    /// Serialize the full submission payload.
    ///
    /// Rejects signatures that do not fit the 2-byte length field.
    pub fn encode(&self) -> LlpResult<Vec<u8>> {
        if self.signature.len() > u16::MAX as usize {
            return Err(LlpError::FieldOutOfRange(format!(
                "signature length {} exceeds u16 wire field",
                self.signature.len()
            )));
        }
        let mut out = Vec::with_capacity(SUBMIT_PREFIX_SIZE + self.signature.len());
        out.extend_from_slice(&self.merkle_root);
        codec::put_u64_le(&mut out, self.nonce);
        codec::put_u64_le(&mut out, self.timestamp);
        codec::put_u16_le(&mut out, self.signature.len() as u16);
        out.extend_from_slice(&self.signature);
        Ok(out)
    }

    /// Deserialize a submission payload.
    pub fn decode(data: &[u8]) -> LlpResult<Self> {
        let merkle_root = codec::hash512(data, 0)?;
        let nonce = codec::u64_le(data, 64)?;
        let timestamp = codec::u64_le(data, 72)?;
        let sig_len = codec::u16_le(data, 80)? as usize;
        if data.len() < SUBMIT_PREFIX_SIZE + sig_len {
            return Err(LlpError::TruncatedBuffer {
                offset: SUBMIT_PREFIX_SIZE,
                need: sig_len,
                have: data.len() - SUBMIT_PREFIX_SIZE,
            });
        }
        Ok(Self {
            merkle_root,
            nonce,
            timestamp,
            signature: data[SUBMIT_PREFIX_SIZE..SUBMIT_PREFIX_SIZE + sig_len].to_vec(),
        })
    }
}

/// Widen a 32- or 64-byte merkle root into the fixed 64-byte submission slot.
///
/// Prime-channel roots are 256-bit; they occupy the leading half and the rest
/// stays zero. Any other length is rejected.
pub fn widen_merkle_root(merkle: &[u8]) -> LlpResult<[u8; 64]> {
    let mut out = [0u8; 64];
    match merkle.len() {
        32 | 64 => {
            out[..merkle.len()].copy_from_slice(merkle);
            Ok(out)
        }
        other => Err(LlpError::FieldOutOfRange(format!(
            "merkle root must be 32 or 64 bytes, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BlockSubmission {
        let mut merkle_root = [0u8; 64];
        merkle_root[63] = 0x03;
        BlockSubmission {
            merkle_root,
            nonce: 0xDEADBEEFCAFEBABE,
            timestamp: 1_700_000_042,
            signature: vec![0x5A; 652],
        }
    }

    #[test]
    fn test_encode_layout() {
        let submission = sample();
        let bytes = submission.encode().unwrap();
        assert_eq!(bytes.len(), SUBMIT_PREFIX_SIZE + 652);
        // Nonce little-endian at offset 64.
        assert_eq!(
            &bytes[64..72],
            &[0xBE, 0xBA, 0xFE, 0xCA, 0xEF, 0xBE, 0xAD, 0xDE]
        );
        // sig_len little-endian at offset 80: 652 = 0x028C.
        assert_eq!(&bytes[80..82], &[0x8C, 0x02]);
    }

    #[test]
    fn test_roundtrip() {
        let submission = sample();
        let bytes = submission.encode().unwrap();
        assert_eq!(BlockSubmission::decode(&bytes).unwrap(), submission);
    }

    #[test]
    fn test_signed_prefix_excludes_length_field() {
        let submission = sample();
        let signed = submission.signed_bytes();
        assert_eq!(signed.len(), SUBMIT_SIGNED_SIZE);
        assert_eq!(&signed[..], &submission.encode().unwrap()[..SUBMIT_SIGNED_SIZE]);
    }

    #[test]
    fn test_max_signature_length() {
        let mut submission = sample();
        submission.signature = vec![0u8; u16::MAX as usize];
        let bytes = submission.encode().unwrap();
        assert_eq!(BlockSubmission::decode(&bytes).unwrap(), submission);

        submission.signature = vec![0u8; u16::MAX as usize + 1];
        assert!(submission.encode().is_err());
    }

    #[test]
    fn test_widen_merkle_root() {
        let short = [0xABu8; 32];
        let wide = widen_merkle_root(&short).unwrap();
        assert_eq!(&wide[..32], &short);
        assert_eq!(&wide[32..], &[0u8; 32]);

        let full = [0xCDu8; 64];
        assert_eq!(widen_merkle_root(&full).unwrap(), full);

        assert!(widen_merkle_root(&[0u8; 33]).is_err());
        assert!(widen_merkle_root(&[0u8; 0]).is_err());
    }

    #[test]
    fn test_truncated_signature_rejected() {
        let submission = sample();
        let mut bytes = submission.encode().unwrap();
        bytes.truncate(bytes.len() - 1);
        assert!(BlockSubmission::decode(&bytes).is_err());
    }
}
