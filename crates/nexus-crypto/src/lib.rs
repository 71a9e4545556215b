//! # nexus-crypto
//!
//! Falcon-512 miner authentication: keypair generation and storage, the
//! signing oracle, and the typed signature wrapper used by the session
//! layer.

mod error;
mod falcon;
mod signer;

pub use error::{CryptoError, CryptoResult};
pub use falcon::{
    verify, MinerKeyPair, FALCON512_PRIVKEY_SIZE, FALCON512_PUBKEY_SIZE, FALCON512_SIG_MAX,
    FALCON512_SIG_MIN,
};
pub use signer::{FalconSigner, SignatureKind, SignerStats};
