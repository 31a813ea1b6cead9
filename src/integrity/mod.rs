//! Integrity verification and Merkle transparency.

pub mod merkle;
pub mod publisher;
pub mod scheduler;
pub mod verify;

pub use merkle::{build_proof, build_root, verify_merkle_proof, MerkleProof, MerkleTree};
pub use publisher::{MerklePublisher, Publication, RootOverride};
pub use verify::{IntegrityVerifier, VerificationReport, Violation, ViolationKind};
