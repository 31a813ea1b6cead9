use rand::rngs::OsRng;
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::crypto::hashing;
use crate::error::{IntegrityError, Result};

/// Internal MAC plus a publicly verifiable ECDSA signature over the same bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureBundle {
    pub mac: String,
    pub signature: String,
    pub public_key: String,
}

/// Signs Merkle roots and election proofs.
///
/// The HMAC key only proves consistency inside our own database; anyone
/// holding it can forge tags. Public verification goes through the secp256k1
/// key, whose compressed public half is published.
#[derive(Clone)]
pub struct ProofSigner {
    secp: Secp256k1<secp256k1::All>,
    secret_key: SecretKey,
    public_key: PublicKey,
    mac_key: Vec<u8>,
}

impl ProofSigner {
    pub fn new(mac_key: Vec<u8>, secret_key: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        Self {
            secp,
            secret_key,
            public_key,
            mac_key,
        }
    }

    /// Load the signing key from its hex encoding.
    pub fn from_hex(mac_key: Vec<u8>, secret_key_hex: &str) -> Result<Self> {
        let bytes = hex::decode(secret_key_hex.trim())
            .map_err(|e| IntegrityError::CryptoError(format!("Invalid secret key hex: {}", e)))?;
        let secret_key = SecretKey::from_slice(&bytes)
            .map_err(|e| IntegrityError::CryptoError(format!("Invalid secret key: {}", e)))?;
        Ok(Self::new(mac_key, secret_key))
    }

    /// Fresh random signing key. Signatures made with it cannot be checked
    /// after a restart unless the public key was recorded.
    pub fn generate(mac_key: Vec<u8>) -> Self {
        let secret_key = SecretKey::new(&mut OsRng);
        Self::new(mac_key, secret_key)
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key.serialize())
    }

    pub fn sign(&self, bytes: &[u8]) -> Result<SignatureBundle> {
        let mac = hashing::sign(bytes, &self.mac_key)?;
        let message = digest_message(bytes)?;
        let signature = self.secp.sign_ecdsa(&message, &self.secret_key);

        Ok(SignatureBundle {
            mac,
            signature: hex::encode(signature.serialize_compact()),
            public_key: self.public_key_hex(),
        })
    }

    pub fn verify_mac(&self, bytes: &[u8], mac: &str) -> bool {
        hashing::verify(bytes, mac, &self.mac_key)
    }

    /// Check an ECDSA signature with nothing but the published public key.
    pub fn verify_public(bytes: &[u8], signature_hex: &str, public_key_hex: &str) -> Result<bool> {
        let signature_bytes = hex::decode(signature_hex)
            .map_err(|e| IntegrityError::CryptoError(format!("Invalid signature hex: {}", e)))?;
        let signature = Signature::from_compact(&signature_bytes)
            .map_err(|e| IntegrityError::CryptoError(format!("Invalid signature format: {}", e)))?;

        let public_key_bytes = hex::decode(public_key_hex)
            .map_err(|e| IntegrityError::CryptoError(format!("Invalid public key hex: {}", e)))?;
        let public_key = PublicKey::from_slice(&public_key_bytes)
            .map_err(|e| IntegrityError::CryptoError(format!("Invalid public key format: {}", e)))?;

        let message = digest_message(bytes)?;
        let secp = Secp256k1::verification_only();
        Ok(secp.verify_ecdsa(&message, &signature, &public_key).is_ok())
    }
}

fn digest_message(bytes: &[u8]) -> Result<Message> {
    let digest = Sha256::digest(bytes);
    Message::from_digest_slice(&digest)
        .map_err(|e| IntegrityError::CryptoError(format!("Invalid message hash: {}", e)))
}
