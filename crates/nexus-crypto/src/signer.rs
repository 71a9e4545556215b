//! Typed signing operations over an owned keypair.
//!
//! The session layer never touches raw key material; it asks this wrapper
//! for one of three canonical messages to be signed and the wrapper keeps
//! lock-free counters about what it signed and how long that took.

use crate::{CryptoResult, MinerKeyPair, FALCON512_SIG_MAX, FALCON512_SIG_MIN};
use nexus_llp::bytes as codec;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, warn};

/// What a signature is for. Metadata only; it selects the counter bumped,
/// not the signing algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureKind {
    /// Session authentication message.
    Authentication,
    /// Solved-block signature.
    Block,
    /// Anything else.
    Payload,
}

/// A snapshot of the wrapper's counters. Values are read with Relaxed
/// ordering and may be slightly behind each other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignerStats {
    /// All signatures produced.
    pub total_signatures: u64,
    /// Authentication signatures.
    pub auth_signatures: u64,
    /// Block signatures.
    pub block_signatures: u64,
    /// Generic payload signatures.
    pub payload_signatures: u64,
    /// Cumulative signing time in microseconds.
    pub total_time_us: u64,
    /// Mean signing time in microseconds.
    pub average_time_us: u64,
}

/// Signature wrapper owning the miner's keypair.
pub struct FalconSigner {
    keys: MinerKeyPair,
    total_signatures: AtomicU64,
    auth_signatures: AtomicU64,
    block_signatures: AtomicU64,
    payload_signatures: AtomicU64,
    total_time_us: AtomicU64,
}

impl FalconSigner {
    /// Wrap a keypair.
    pub fn new(keys: MinerKeyPair) -> Self {
        Self {
            keys,
            total_signatures: AtomicU64::new(0),
            auth_signatures: AtomicU64::new(0),
            block_signatures: AtomicU64::new(0),
            payload_signatures: AtomicU64::new(0),
            total_time_us: AtomicU64::new(0),
        }
    }

    /// The public key bytes, for the AUTH_RESPONSE credential packet.
    pub fn public_bytes(&self) -> &[u8] {
        self.keys.public_bytes()
    }

    /// Sign the session authentication message.
    ///
    /// Canonical form: `address_bytes ∥ timestamp_u64_le`, no length
    /// prefixes. The node reconstructs exactly these bytes to verify.
    pub fn sign_authentication(&self, address: &str, timestamp: u64) -> CryptoResult<Vec<u8>> {
        let mut message = Vec::with_capacity(address.len() + 8);
        message.extend_from_slice(address.as_bytes());
        codec::put_u64_le(&mut message, timestamp);
        debug!(
            address,
            timestamp,
            message_bytes = message.len(),
            "Signing authentication message"
        );
        self.sign_internal(&message, SignatureKind::Authentication)
    }

    /// Sign a solved block: `merkle_root ∥ nonce_u64_le`.
    pub fn sign_block(&self, merkle_root: &[u8; 64], nonce: u64) -> CryptoResult<Vec<u8>> {
        let mut message = Vec::with_capacity(64 + 8);
        message.extend_from_slice(merkle_root);
        codec::put_u64_le(&mut message, nonce);
        self.sign_internal(&message, SignatureKind::Block)
    }

    /// Sign an arbitrary payload.
    pub fn sign_payload(&self, payload: &[u8], kind: SignatureKind) -> CryptoResult<Vec<u8>> {
        self.sign_internal(payload, kind)
    }

    fn sign_internal(&self, message: &[u8], kind: SignatureKind) -> CryptoResult<Vec<u8>> {
        let start = Instant::now();
        let signature = self.keys.sign(message)?;
        let elapsed_us = start.elapsed().as_micros() as u64;

        self.total_signatures.fetch_add(1, Ordering::Relaxed);
        self.total_time_us.fetch_add(elapsed_us, Ordering::Relaxed);
        let per_kind = match kind {
            SignatureKind::Authentication => &self.auth_signatures,
            SignatureKind::Block => &self.block_signatures,
            SignatureKind::Payload => &self.payload_signatures,
        };
        per_kind.fetch_add(1, Ordering::Relaxed);

        // Sizes outside the typical Falcon-512 range are suspicious but not
        // rejected; the node is the arbiter.
        if signature.len() < FALCON512_SIG_MIN || signature.len() > FALCON512_SIG_MAX {
            warn!(
                kind = ?kind,
                size = signature.len(),
                expected_min = FALCON512_SIG_MIN,
                expected_max = FALCON512_SIG_MAX,
                "Signature size outside expected Falcon-512 range"
            );
        }

        debug!(kind = ?kind, size = signature.len(), elapsed_us, "Signature generated");
        Ok(signature)
    }

    /// Read the counters.
    pub fn stats(&self) -> SignerStats {
        let total = self.total_signatures.load(Ordering::Relaxed);
        let total_time_us = self.total_time_us.load(Ordering::Relaxed);
        SignerStats {
            total_signatures: total,
            auth_signatures: self.auth_signatures.load(Ordering::Relaxed),
            block_signatures: self.block_signatures.load(Ordering::Relaxed),
            payload_signatures: self.payload_signatures.load(Ordering::Relaxed),
            total_time_us,
            average_time_us: if total > 0 { total_time_us / total } else { 0 },
        }
    }

    /// Zero the counters.
    pub fn reset_stats(&self) {
        self.total_signatures.store(0, Ordering::Relaxed);
        self.auth_signatures.store(0, Ordering::Relaxed);
        self.block_signatures.store(0, Ordering::Relaxed);
        self.payload_signatures.store(0, Ordering::Relaxed);
        self.total_time_us.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify;

    fn signer() -> FalconSigner {
        FalconSigner::new(MinerKeyPair::generate())
    }

    #[test]
    fn test_auth_message_shape() {
        let signer = signer();
        let signature = signer.sign_authentication("10.0.0.5", 0x0102030405060708).unwrap();

        // Reconstruct the canonical message and verify against it: address
        // bytes then little-endian timestamp, nothing else.
        let mut message = b"10.0.0.5".to_vec();
        message.extend_from_slice(&[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
        assert!(verify(signer.public_bytes(), &message, &signature).unwrap());
    }

    #[test]
    fn test_block_message_shape() {
        let signer = signer();
        let merkle = [0x42u8; 64];
        let signature = signer.sign_block(&merkle, 1).unwrap();

        let mut message = merkle.to_vec();
        message.extend_from_slice(&1u64.to_le_bytes());
        assert!(verify(signer.public_bytes(), &message, &signature).unwrap());
    }

    #[test]
    fn test_stats_counters() {
        let signer = signer();
        signer.sign_authentication("addr", 1).unwrap();
        signer.sign_block(&[0u8; 64], 2).unwrap();
        signer.sign_block(&[1u8; 64], 3).unwrap();
        signer.sign_payload(b"extra", SignatureKind::Payload).unwrap();

        let stats = signer.stats();
        assert_eq!(stats.total_signatures, 4);
        assert_eq!(stats.auth_signatures, 1);
        assert_eq!(stats.block_signatures, 2);
        assert_eq!(stats.payload_signatures, 1);
        assert!(stats.average_time_us <= stats.total_time_us);

        signer.reset_stats();
        assert_eq!(signer.stats(), SignerStats::default());
    }
}
