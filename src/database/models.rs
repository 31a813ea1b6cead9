use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::entry::AuditPayload;
use crate::ledger::block::ChainKind;

/// Block as persisted: the payload is kept as its canonical JSON text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBlock {
    pub chain: ChainKind,
    pub sequence_no: u64,
    pub subject_id: String,
    pub election_id: Option<String>,
    pub block_hash: String,
    pub previous_hash: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTail {
    pub sequence_no: u64,
    pub block_hash: String,
}

/// Result of a compare-and-insert against a chain or root history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Another writer advanced the tail (or took the generation) first.
    Conflict,
    /// The subject already has a block in this chain.
    DuplicateSubject,
}

/// Public fields of a vote frozen when its reference code was issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofSnapshot {
    pub vote_id_hash: String,
    pub election_id: String,
    pub timestamp: DateTime<Utc>,
    pub proof_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteReference {
    pub subject_id: String,
    pub reference_code: String,
    pub proof_snapshot: ProofSnapshot,
    pub created_at: DateTime<Utc>,
}

/// One generation of a published Merkle root for a window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleRootRecord {
    pub chain: ChainKind,
    pub window_key: String,
    pub generation: u32,
    pub root_hash: String,
    pub leaf_count: u64,
    pub mac: String,
    pub signature: String,
    pub public_key: String,
    pub published_at: DateTime<Utc>,
    pub supersedes: Option<u32>,
    pub override_reason: Option<String>,
}

/// Last point at which a chain verified clean.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub chain: ChainKind,
    pub sequence_no: u64,
    pub block_hash: String,
    pub verified_at: DateTime<Utc>,
}

/// Audit chain search. Every criterion reads the hashed payload; dates bound
/// the event `timestamp` inclusively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFilter {
    pub entity_type: Option<String>,
    pub action_type: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

impl AuditFilter {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn matches(&self, payload: &AuditPayload) -> bool {
        let millis = payload.timestamp.timestamp_millis();
        self.entity_type.as_ref().map_or(true, |t| *t == payload.entity_type)
            && self.action_type.as_ref().map_or(true, |t| *t == payload.action_type)
            && self.start_date.map_or(true, |start| millis >= start.timestamp_millis())
            && self.end_date.map_or(true, |end| millis <= end.timestamp_millis())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, page: u64, limit: u64, total: u64) -> Self {
        let total_pages = if limit == 0 { 0 } else { total.div_ceil(limit) };
        Self {
            items,
            page,
            limit,
            total,
            total_pages,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            limit: self.limit,
            total: self.total,
            total_pages: self.total_pages,
        }
    }
}

/// Clamp 1-based page parameters and turn them into an offset.
pub fn page_bounds(page: Option<u64>, limit: Option<u64>, default_limit: u64, max_limit: u64) -> (u64, u64, u64) {
    let page = page.unwrap_or(1).max(1);
    let limit = limit.unwrap_or(default_limit).clamp(1, max_limit.max(1));
    let offset = (page - 1).saturating_mul(limit);
    (page, limit, offset)
}
