//! Cryptographic primitives for the integrity ledger.

pub mod hashing;
pub mod signatures;

pub use hashing::{canonicalize, chain_hash, sha256_hex, Canonical};
pub use signatures::{ProofSigner, SignatureBundle};
