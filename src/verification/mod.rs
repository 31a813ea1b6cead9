//! Voter- and observer-facing verification.

pub mod election_proof;
pub mod reference;

pub use election_proof::{ElectionProof, ElectionProofService};
pub use reference::{ReferenceReceipt, ReferenceVerdict, VoteReferenceService};
