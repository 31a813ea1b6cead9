//! Hash Primitives
//!
//! Deterministic serialization, SHA-256 digests and HMAC-SHA256 tags shared by
//! every chain, Merkle root and proof in the crate.

use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{IntegrityError, Result};

type HmacSha256 = Hmac<Sha256>;

/// A record that can be reduced to canonical bytes for hashing.
///
/// Field order is the struct declaration order, which `serde_json` preserves
/// for structs. Nested JSON objects serialize with sorted keys.
pub trait Canonical: Serialize {
    /// Reject incomplete records before anything is hashed.
    fn validate(&self) -> Result<()>;
}

/// Canonical byte form of a validated record.
pub fn canonicalize<T: Canonical>(value: &T) -> Result<Vec<u8>> {
    value.validate()?;
    canonical_json(value)
}

/// Canonical JSON for internal structures that carry no required-field rules.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value)
        .map_err(|e| IntegrityError::ValidationError(format!("Failed to canonicalize: {}", e)))
}

/// SHA-256 of `bytes` as 64 lowercase hex characters.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// `H(canonical ‖ previous_hash)`, the link hash of every chain block.
pub fn chain_hash(canonical: &[u8], previous_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical);
    hasher.update(previous_hash.as_bytes());
    hex::encode(hasher.finalize())
}

/// HMAC-SHA256 tag over `bytes`, hex encoded.
pub fn sign(bytes: &[u8], key: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| IntegrityError::CryptoError(format!("Invalid MAC key: {}", e)))?;
    mac.update(bytes);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of an HMAC-SHA256 tag.
pub fn verify(bytes: &[u8], signature: &str, key: &[u8]) -> bool {
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        return false;
    };
    mac.update(bytes);
    mac.verify_slice(&expected).is_ok()
}

/// True for a 64-character lowercase hex digest.
pub fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
