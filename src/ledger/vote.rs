use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::hashing::{is_sha256_hex, sha256_hex, Canonical};
use crate::error::{IntegrityError, Result};
use crate::ledger::block::{ChainKind, ChainPayload};

/// A vote as reported by the vote-casting subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteCast {
    pub subject_id: String,
    pub election_id: String,
    pub candidate_id: String,
    pub timestamp: DateTime<Utc>,
    pub voter_id: String,
}

/// Vote block payload. The voter is present only as `SHA-256(voter_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VotePayload {
    pub subject_id: String,
    pub election_id: String,
    pub candidate_id: String,
    pub timestamp: DateTime<Utc>,
    pub voter_hash: String,
}

impl VotePayload {
    pub fn from_cast(cast: VoteCast) -> Result<Self> {
        if cast.voter_id.trim().is_empty() {
            return Err(IntegrityError::missing_field("voter_id"));
        }

        let payload = Self {
            voter_hash: sha256_hex(cast.voter_id.as_bytes()),
            subject_id: cast.subject_id,
            election_id: cast.election_id,
            candidate_id: cast.candidate_id,
            timestamp: cast.timestamp,
        };
        payload.validate()?;
        Ok(payload)
    }
}

impl Canonical for VotePayload {
    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("subject_id", &self.subject_id),
            ("election_id", &self.election_id),
            ("candidate_id", &self.candidate_id),
        ] {
            if value.trim().is_empty() {
                return Err(IntegrityError::missing_field(name));
            }
        }

        if !is_sha256_hex(&self.voter_hash) {
            return Err(IntegrityError::ValidationError(
                "voter_hash must be a SHA-256 hex digest".to_string(),
            ));
        }

        Ok(())
    }
}

impl ChainPayload for VotePayload {
    const CHAIN: ChainKind = ChainKind::Votes;

    fn subject_id(&self) -> &str {
        &self.subject_id
    }

    fn election_id(&self) -> Option<&str> {
        Some(&self.election_id)
    }
}
