//! Storage boundary for the integrity ledger.
//!
//! Blocks and root generations are insert-only: the trait has no update or
//! delete path for either. Checkpoints are the one overwritable record.

pub mod memory;
pub mod models;
pub mod schema;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::ledger::block::ChainKind;
use models::{
    AuditFilter, ChainTail, Checkpoint, InsertOutcome, MerkleRootRecord, StoredBlock, VoteReference,
};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Highest block of `chain`, if any.
    async fn tail(&self, chain: ChainKind) -> Result<Option<ChainTail>>;

    /// Insert `block` only if it extends the current tail.
    async fn insert_block(&self, block: &StoredBlock) -> Result<InsertOutcome>;

    async fn block_at(&self, chain: ChainKind, sequence_no: u64) -> Result<Option<StoredBlock>>;

    async fn block_by_subject(&self, chain: ChainKind, subject_id: &str) -> Result<Option<StoredBlock>>;

    /// Blocks ordered by `sequence_no`, skipping `offset`.
    async fn blocks_range(&self, chain: ChainKind, offset: u64, limit: u64) -> Result<Vec<StoredBlock>>;

    /// Up to `limit` blocks with `from_seq <= sequence_no <= to_seq`, ordered.
    async fn blocks_between(
        &self,
        chain: ChainKind,
        from_seq: u64,
        to_seq: u64,
        limit: u64,
    ) -> Result<Vec<StoredBlock>>;

    async fn block_count(&self, chain: ChainKind) -> Result<u64>;

    /// Audit blocks whose payload matches `filter`, ordered by `sequence_no`,
    /// plus the number of matches.
    async fn search_audit(
        &self,
        filter: &AuditFilter,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<StoredBlock>, u64)>;

    /// Blocks with `start <= created_at < end`, ordered by `sequence_no`.
    async fn blocks_created_between(
        &self,
        chain: ChainKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StoredBlock>>;

    /// Store a reference unless the subject already has one. Returns the
    /// subject's stored reference, or `None` if the code belongs to another
    /// subject.
    async fn insert_reference(&self, reference: &VoteReference) -> Result<Option<VoteReference>>;

    async fn reference_by_subject(&self, subject_id: &str) -> Result<Option<VoteReference>>;

    async fn reference_by_code(&self, reference_code: &str) -> Result<Option<VoteReference>>;

    /// All generations for a window, oldest first.
    async fn merkle_root_history(&self, chain: ChainKind, window_key: &str) -> Result<Vec<MerkleRootRecord>>;

    /// `Conflict` when the generation is already taken.
    async fn insert_merkle_root(&self, record: &MerkleRootRecord) -> Result<InsertOutcome>;

    /// Newest windows first, plus the total number of stored generations.
    async fn list_merkle_roots(&self, offset: u64, limit: u64) -> Result<(Vec<MerkleRootRecord>, u64)>;

    async fn checkpoint(&self, chain: ChainKind) -> Result<Option<Checkpoint>>;

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()>;
}
