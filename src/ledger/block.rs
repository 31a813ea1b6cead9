//! Ledger Block
//!
//! A block binds one payload to its predecessor:
//! `block_hash = SHA-256(canonical(payload) ‖ previous_hash)`.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::audit::entry::AuditPayload;
use crate::crypto::hashing::{canonicalize, chain_hash, Canonical};
use crate::database::models::StoredBlock;
use crate::error::{IntegrityError, Result};
use crate::ledger::vote::VotePayload;

/// `previous_hash` of the first block in every chain.
pub const GENESIS_HASH: &str = "0";

/// The independent chains kept by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainKind {
    Votes,
    Audit,
}

impl ChainKind {
    pub const ALL: [ChainKind; 2] = [ChainKind::Votes, ChainKind::Audit];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChainKind::Votes => "votes",
            ChainKind::Audit => "audit",
        }
    }

}

impl FromStr for ChainKind {
    type Err = IntegrityError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "votes" | "vote" => Ok(ChainKind::Votes),
            "audit" => Ok(ChainKind::Audit),
            _ => Err(IntegrityError::ValidationError(format!("Unknown chain: {}", s))),
        }
    }
}

impl fmt::Display for ChainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payload type owned by exactly one chain.
pub trait ChainPayload: Canonical + DeserializeOwned + Clone + Send + Sync + 'static {
    const CHAIN: ChainKind;

    fn subject_id(&self) -> &str;

    fn election_id(&self) -> Option<&str> {
        None
    }
}

/// One immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block<P> {
    pub sequence_no: u64,
    pub subject_id: String,
    pub block_hash: String,
    pub previous_hash: String,
    pub payload: P,
    pub created_at: DateTime<Utc>,
}

impl<P: ChainPayload> Block<P> {
    /// Hash `payload` onto `previous_hash`. Fails before hashing if the
    /// payload is incomplete.
    pub fn seal(
        sequence_no: u64,
        payload: P,
        previous_hash: String,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        let canonical = canonicalize(&payload)?;
        let block_hash = chain_hash(&canonical, &previous_hash);

        Ok(Self {
            sequence_no,
            subject_id: payload.subject_id().to_string(),
            block_hash,
            previous_hash,
            payload,
            created_at,
        })
    }

    pub fn calculate_hash(&self) -> Result<String> {
        let canonical = canonicalize(&self.payload)?;
        Ok(chain_hash(&canonical, &self.previous_hash))
    }

    pub fn verify_hash(&self) -> bool {
        matches!(self.calculate_hash(), Ok(hash) if hash == self.block_hash)
    }

    pub fn to_stored(&self) -> Result<StoredBlock> {
        Ok(StoredBlock {
            chain: P::CHAIN,
            sequence_no: self.sequence_no,
            subject_id: self.subject_id.clone(),
            election_id: self.payload.election_id().map(str::to_string),
            block_hash: self.block_hash.clone(),
            previous_hash: self.previous_hash.clone(),
            payload: String::from_utf8(canonicalize(&self.payload)?)
                .map_err(|e| IntegrityError::ValidationError(format!("Payload is not UTF-8: {}", e)))?,
            created_at: self.created_at,
        })
    }

    pub fn from_stored(stored: StoredBlock) -> Result<Self> {
        if stored.chain != P::CHAIN {
            return Err(IntegrityError::ValidationError(format!(
                "Block belongs to chain {}, expected {}",
                stored.chain,
                P::CHAIN
            )));
        }

        let payload: P = stored.parse_payload()?;
        if let Some(mismatch) = stored.columns_against(&payload) {
            return Err(IntegrityError::violation(Some(stored.sequence_no), mismatch.to_string()));
        }
        Ok(Self {
            sequence_no: stored.sequence_no,
            subject_id: stored.subject_id,
            block_hash: stored.block_hash,
            previous_hash: stored.previous_hash,
            payload,
            created_at: stored.created_at,
        })
    }

    pub fn summary(&self) -> String {
        format!(
            "{}#{} {} ({} -> {})",
            P::CHAIN,
            self.sequence_no,
            self.subject_id,
            self.previous_hash,
            self.block_hash
        )
    }
}

/// An indexed column that no longer agrees with the hashed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMismatch {
    pub column: &'static str,
    pub payload_value: String,
    pub column_value: String,
}

impl fmt::Display for ColumnMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} column is {} but the hashed payload says {}",
            self.column, self.column_value, self.payload_value
        )
    }
}

fn display_column(value: Option<&str>) -> String {
    value.unwrap_or("(none)").to_string()
}

impl StoredBlock {
    /// Parse the persisted payload. Unparseable text is stored corruption,
    /// reported against this block's sequence number.
    pub fn parse_payload<P: ChainPayload>(&self) -> Result<P> {
        serde_json::from_str(&self.payload).map_err(|e| {
            IntegrityError::violation(
                Some(self.sequence_no),
                format!("Stored {} payload is malformed: {}", self.chain, e),
            )
        })
    }

    /// Recompute the link hash from the persisted payload text.
    pub fn recompute_hash(&self) -> Result<String> {
        let canonical = match self.chain {
            ChainKind::Votes => canonicalize(&self.parse_payload::<VotePayload>()?)?,
            ChainKind::Audit => canonicalize(&self.parse_payload::<AuditPayload>()?)?,
        };
        Ok(chain_hash(&canonical, &self.previous_hash))
    }

    /// Compare `subject_id` and `election_id` against the payload they were
    /// copied from. Lookups and election selection go through these columns.
    pub fn column_mismatch(&self) -> Result<Option<ColumnMismatch>> {
        Ok(match self.chain {
            ChainKind::Votes => self.columns_against(&self.parse_payload::<VotePayload>()?),
            ChainKind::Audit => self.columns_against(&self.parse_payload::<AuditPayload>()?),
        })
    }

    fn columns_against<P: ChainPayload>(&self, payload: &P) -> Option<ColumnMismatch> {
        if payload.subject_id() != self.subject_id {
            return Some(ColumnMismatch {
                column: "subject_id",
                payload_value: payload.subject_id().to_string(),
                column_value: self.subject_id.clone(),
            });
        }
        if payload.election_id() != self.election_id.as_deref() {
            return Some(ColumnMismatch {
                column: "election_id",
                payload_value: display_column(payload.election_id()),
                column_value: display_column(self.election_id.as_deref()),
            });
        }
        None
    }
}
