//! Vote Reference Codes
//!
//! A voter receives a short code derived from the public facts of their vote
//! block. Checking the code later proves the block is still the one that was
//! recorded, without ever disclosing the candidate.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::crypto::hashing::{canonical_json, sha256_hex};
use crate::database::models::{ProofSnapshot, VoteReference};
use crate::database::LedgerStore;
use crate::error::{IntegrityError, Result};
use crate::ledger::block::{Block, ChainKind};
use crate::ledger::vote::VotePayload;

pub const REFERENCE_CODE_LEN: usize = 16;

pub const MSG_NOT_FOUND: &str = "Reference code not found";
pub const MSG_VOTE_MISSING: &str = "Vote record not found";
pub const MSG_ALTERED: &str = "Vote record has been altered since this reference was issued";
pub const MSG_VERIFIED: &str = "Vote is recorded and unaltered";

/// First 16 hex digits of the snapshot hash, uppercased.
pub fn reference_code(snapshot: &ProofSnapshot) -> Result<String> {
    let digest = sha256_hex(&canonical_json(snapshot)?);
    Ok(digest[..REFERENCE_CODE_LEN].to_uppercase())
}

/// Uppercased code, or `None` if it cannot be a reference code.
pub fn normalize_code(code: &str) -> Option<String> {
    let code = code.trim().to_uppercase();
    (code.len() == REFERENCE_CODE_LEN && code.chars().all(|c| c.is_ascii_hexdigit())).then_some(code)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceReceipt {
    pub reference_code: String,
    pub verification_endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceVerdict {
    pub valid: bool,
    pub election_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub message: String,
}

impl ReferenceVerdict {
    fn not_found() -> Self {
        Self {
            valid: false,
            election_id: None,
            timestamp: None,
            message: MSG_NOT_FOUND.to_string(),
        }
    }

    fn from_snapshot(snapshot: &ProofSnapshot, valid: bool, message: &str) -> Self {
        Self {
            valid,
            election_id: Some(snapshot.election_id.clone()),
            timestamp: Some(snapshot.timestamp),
            message: message.to_string(),
        }
    }
}

pub struct VoteReferenceService {
    store: Arc<dyn LedgerStore>,
    base_path: String,
}

impl VoteReferenceService {
    pub fn new(store: Arc<dyn LedgerStore>, base_path: impl Into<String>) -> Self {
        Self {
            store,
            base_path: base_path.into().trim_end_matches('/').to_string(),
        }
    }

    fn receipt(&self, reference: &VoteReference) -> ReferenceReceipt {
        ReferenceReceipt {
            reference_code: reference.reference_code.clone(),
            verification_endpoint: format!("{}/votes/verify/{}", self.base_path, reference.reference_code),
        }
    }

    /// Issue (or return the already issued) reference for a vote.
    pub async fn issue_reference(&self, subject_id: &str) -> Result<ReferenceReceipt> {
        if let Some(existing) = self.store.reference_by_subject(subject_id).await? {
            return Ok(self.receipt(&existing));
        }

        let stored = self
            .store
            .block_by_subject(ChainKind::Votes, subject_id)
            .await?
            .ok_or_else(|| IntegrityError::NotFound(format!("No vote recorded for {}", subject_id)))?;
        let block = Block::<VotePayload>::from_stored(stored)?;
        if !block.verify_hash() {
            return Err(IntegrityError::violation(
                Some(block.sequence_no),
                format!("Vote block for {} does not match its hash", subject_id),
            ));
        }

        let proof_snapshot = ProofSnapshot {
            vote_id_hash: sha256_hex(subject_id.as_bytes()),
            election_id: block.payload.election_id.clone(),
            timestamp: block.payload.timestamp,
            proof_hash: block.block_hash.clone(),
        };
        let reference = VoteReference {
            subject_id: subject_id.to_string(),
            reference_code: reference_code(&proof_snapshot)?,
            proof_snapshot,
            created_at: Utc::now().trunc_subsecs(3),
        };

        let stored = self.store.insert_reference(&reference).await?.ok_or_else(|| {
            IntegrityError::CryptoError(format!(
                "Reference code {} already belongs to another vote",
                reference.reference_code
            ))
        })?;

        info!("Issued reference {} for vote block #{}", stored.reference_code, block.sequence_no);
        Ok(self.receipt(&stored))
    }

    /// Check a code against the current state of its vote block.
    pub async fn verify_reference(&self, code: &str) -> Result<ReferenceVerdict> {
        let Some(code) = normalize_code(code) else {
            return Ok(ReferenceVerdict::not_found());
        };
        let Some(reference) = self.store.reference_by_code(&code).await? else {
            return Ok(ReferenceVerdict::not_found());
        };
        let snapshot = &reference.proof_snapshot;

        let Some(current) = self
            .store
            .block_by_subject(ChainKind::Votes, &reference.subject_id)
            .await?
        else {
            warn!("Reference {} points at a missing vote block", code);
            return Ok(ReferenceVerdict::from_snapshot(snapshot, false, MSG_VOTE_MISSING));
        };

        // The stored hash, the stored payload and the columns copied from it
        // must all still match.
        let content_intact = matches!(current.recompute_hash(), Ok(hash) if hash == snapshot.proof_hash);
        let columns_intact = matches!(current.column_mismatch(), Ok(None));
        if current.block_hash != snapshot.proof_hash || !content_intact || !columns_intact {
            warn!(
                "Reference {} failed verification at vote block #{}",
                code, current.sequence_no
            );
            return Ok(ReferenceVerdict::from_snapshot(snapshot, false, MSG_ALTERED));
        }

        Ok(ReferenceVerdict::from_snapshot(snapshot, true, MSG_VERIFIED))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snapshot() -> ProofSnapshot {
        ProofSnapshot {
            vote_id_hash: sha256_hex(b"vote-1"),
            election_id: "E-1".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            proof_hash: "ab".repeat(32),
        }
    }

    #[test]
    fn test_reference_code_shape() {
        let code = reference_code(&snapshot()).unwrap();
        assert_eq!(code.len(), 16);
        assert_eq!(code, code.to_uppercase());
        assert_eq!(code, reference_code(&snapshot()).unwrap());
    }

    #[test]
    fn test_code_depends_on_proof_hash() {
        let mut other = snapshot();
        other.proof_hash = "cd".repeat(32);
        assert_ne!(reference_code(&snapshot()).unwrap(), reference_code(&other).unwrap());
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code(" 0123abcdef456789 ").as_deref(), Some("0123ABCDEF456789"));
        assert_eq!(normalize_code("short"), None);
        assert_eq!(normalize_code("ZZZZZZZZZZZZZZZZ"), None);
    }
}
