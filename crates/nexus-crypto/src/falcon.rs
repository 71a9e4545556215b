//! Falcon-512 keypair handling.
//!
//! Falcon-512 is the post-quantum signature scheme the node accepts for
//! miner authentication. Key sizes are fixed (897-byte public, 1281-byte
//! private); signatures are compressed and vary in length, typically
//! 600-700 bytes. The private key lives in zeroized memory and is wiped
//! when the keypair is dropped.

use crate::{CryptoError, CryptoResult};
use pqcrypto_falcon::falcon512;
use pqcrypto_traits::sign::{DetachedSignature as _, PublicKey as _, SecretKey as _};
use tracing::debug;
use zeroize::Zeroizing;

/// Falcon-512 public key size.
pub const FALCON512_PUBKEY_SIZE: usize = 897;
/// Falcon-512 private key size.
pub const FALCON512_PRIVKEY_SIZE: usize = 1281;
/// Lower bound of the typical Falcon-512 signature size range.
pub const FALCON512_SIG_MIN: usize = 600;
/// Upper bound of the typical Falcon-512 signature size range.
pub const FALCON512_SIG_MAX: usize = 700;

/// A miner's Falcon-512 keypair.
pub struct MinerKeyPair {
    public: Vec<u8>,
    secret: Zeroizing<Vec<u8>>,
}

impl MinerKeyPair {
    /// Generate a fresh keypair from the system's cryptographic RNG.
    pub fn generate() -> Self {
        let (pk, sk) = falcon512::keypair();
        debug!(
            pubkey_bytes = pk.as_bytes().len(),
            privkey_bytes = sk.as_bytes().len(),
            "Generated Falcon-512 keypair"
        );
        Self {
            public: pk.as_bytes().to_vec(),
            secret: Zeroizing::new(sk.as_bytes().to_vec()),
        }
    }

    /// Build a keypair from raw key bytes, validating Falcon-512 sizes.
    pub fn from_bytes(public: Vec<u8>, secret: Vec<u8>) -> CryptoResult<Self> {
        if public.len() != FALCON512_PUBKEY_SIZE {
            return Err(CryptoError::InvalidKeySize {
                kind: "public",
                expected: FALCON512_PUBKEY_SIZE,
                got: public.len(),
            });
        }
        if secret.len() != FALCON512_PRIVKEY_SIZE {
            return Err(CryptoError::InvalidKeySize {
                kind: "private",
                expected: FALCON512_PRIVKEY_SIZE,
                got: secret.len(),
            });
        }
        Ok(Self {
            public,
            secret: Zeroizing::new(secret),
        })
    }

    /// Build a keypair from the hex strings stored in the miner config.
    pub fn from_hex(public_hex: &str, secret_hex: &str) -> CryptoResult<Self> {
        let public = nexus_llp::bytes::from_hex(public_hex)
            .map_err(|e| CryptoError::InvalidKeyHex(e.to_string()))?;
        let secret = nexus_llp::bytes::from_hex(secret_hex)
            .map_err(|e| CryptoError::InvalidKeyHex(e.to_string()))?;
        Self::from_bytes(public, secret)
    }

    /// The public key bytes.
    pub fn public_bytes(&self) -> &[u8] {
        &self.public
    }

    /// The public key as lowercase hex (shareable with the node operator).
    pub fn public_hex(&self) -> String {
        nexus_llp::bytes::to_hex(&self.public)
    }

    /// The private key as lowercase hex, for writing config material. The
    /// returned buffer is zeroized on drop.
    pub fn secret_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(nexus_llp::bytes::to_hex(&self.secret))
    }

    /// Sign a message. Successive signatures over the same message differ;
    /// Falcon signing is randomized.
    pub fn sign(&self, message: &[u8]) -> CryptoResult<Vec<u8>> {
        if message.is_empty() {
            return Err(CryptoError::EmptyMessage);
        }
        let sk = falcon512::SecretKey::from_bytes(&self.secret)
            .map_err(|e| CryptoError::Malformed("private key", e.to_string()))?;
        let sig = falcon512::detached_sign(message, &sk);
        Ok(sig.as_bytes().to_vec())
    }
}

impl std::fmt::Debug for MinerKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MinerKeyPair")
            .field("public", &format_args!("{}..", &self.public_hex()[..16]))
            .field("secret", &"<zeroized on drop>")
            .finish()
    }
}

/// Verify a Falcon-512 signature.
///
/// Malformed key bytes are an error; a well-formed signature that simply
/// does not verify yields `Ok(false)`.
pub fn verify(public: &[u8], message: &[u8], signature: &[u8]) -> CryptoResult<bool> {
    let pk = falcon512::PublicKey::from_bytes(public)
        .map_err(|e| CryptoError::Malformed("public key", e.to_string()))?;
    let sig = match falcon512::DetachedSignature::from_bytes(signature) {
        Ok(sig) => sig,
        // Out-of-range signature bytes cannot verify under any key.
        Err(_) => return Ok(false),
    };
    Ok(falcon512::verify_detached_signature(&sig, message, &pk).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_key_sizes() {
        let keys = MinerKeyPair::generate();
        assert_eq!(keys.public_bytes().len(), FALCON512_PUBKEY_SIZE);
        assert_eq!(keys.secret.len(), FALCON512_PRIVKEY_SIZE);
    }

    #[test]
    fn test_sign_verify_roundtrip() {
        let keys = MinerKeyPair::generate();
        let message = b"192.168.1.10\x2a\x00\x00\x00\x00\x00\x00\x00";
        let signature = keys.sign(message).unwrap();

        assert!(signature.len() <= FALCON512_SIG_MAX);
        assert!(verify(keys.public_bytes(), message, &signature).unwrap());
        assert!(!verify(keys.public_bytes(), b"different message", &signature).unwrap());
    }

    #[test]
    fn test_signatures_are_randomized() {
        let keys = MinerKeyPair::generate();
        let message = b"same message";
        let sig_a = keys.sign(message).unwrap();
        let sig_b = keys.sign(message).unwrap();
        assert_ne!(sig_a, sig_b);
        assert!(verify(keys.public_bytes(), message, &sig_a).unwrap());
        assert!(verify(keys.public_bytes(), message, &sig_b).unwrap());
    }

    #[test]
    fn test_empty_message_rejected() {
        let keys = MinerKeyPair::generate();
        assert!(matches!(keys.sign(b""), Err(CryptoError::EmptyMessage)));
    }

    #[test]
    fn test_wrong_key_sizes_rejected() {
        assert!(matches!(
            MinerKeyPair::from_bytes(vec![0u8; 896], vec![0u8; FALCON512_PRIVKEY_SIZE]),
            Err(CryptoError::InvalidKeySize { kind: "public", .. })
        ));
        assert!(matches!(
            MinerKeyPair::from_bytes(vec![0u8; FALCON512_PUBKEY_SIZE], vec![0u8; 100]),
            Err(CryptoError::InvalidKeySize { kind: "private", .. })
        ));
    }

    #[test]
    fn test_hex_roundtrip() {
        let keys = MinerKeyPair::generate();
        let restored =
            MinerKeyPair::from_hex(&keys.public_hex(), &keys.secret_hex()).unwrap();
        let message = b"hex roundtrip";
        let signature = restored.sign(message).unwrap();
        assert!(verify(keys.public_bytes(), message, &signature).unwrap());
    }

    #[test]
    fn test_bad_hex_rejected() {
        assert!(matches!(
            MinerKeyPair::from_hex("not-hex", "also-not-hex"),
            Err(CryptoError::InvalidKeyHex(_))
        ));
    }
}
