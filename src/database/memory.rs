//! In-memory implementation of the LedgerStore trait.
//!
//! Same semantics as the SQLite store without persistence. Used by tests and
//! by embedders that keep the ledger in-process.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::audit::entry::AuditPayload;
use crate::database::models::{
    AuditFilter, ChainTail, Checkpoint, InsertOutcome, MerkleRootRecord, StoredBlock, VoteReference,
};
use crate::database::LedgerStore;
use crate::error::Result;
use crate::ledger::block::{ChainKind, GENESIS_HASH};

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// chain -> sequence_no -> block
    blocks: HashMap<ChainKind, BTreeMap<u64, StoredBlock>>,
    /// (chain, subject_id) -> sequence_no
    subjects: HashMap<(ChainKind, String), u64>,
    references: HashMap<String, VoteReference>,
    /// reference_code -> subject_id
    reference_codes: HashMap<String, String>,
    merkle_roots: Vec<MerkleRootRecord>,
    checkpoints: HashMap<ChainKind, Checkpoint>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn tail(&self, chain: ChainKind) -> Result<Option<ChainTail>> {
        let inner = self.inner.read().await;
        Ok(inner
            .blocks
            .get(&chain)
            .and_then(|blocks| blocks.values().next_back())
            .map(|block| ChainTail {
                sequence_no: block.sequence_no,
                block_hash: block.block_hash.clone(),
            }))
    }

    async fn insert_block(&self, block: &StoredBlock) -> Result<InsertOutcome> {
        let mut inner = self.inner.write().await;

        let (expected_sequence, expected_previous) = match inner
            .blocks
            .get(&block.chain)
            .and_then(|blocks| blocks.values().next_back())
        {
            Some(tail) => (tail.sequence_no + 1, tail.block_hash.clone()),
            None => (1, GENESIS_HASH.to_string()),
        };

        if block.sequence_no != expected_sequence || block.previous_hash != expected_previous {
            return Ok(InsertOutcome::Conflict);
        }

        let subject_key = (block.chain, block.subject_id.clone());
        if inner.subjects.contains_key(&subject_key) {
            return Ok(InsertOutcome::DuplicateSubject);
        }

        inner.subjects.insert(subject_key, block.sequence_no);
        inner
            .blocks
            .entry(block.chain)
            .or_default()
            .insert(block.sequence_no, block.clone());

        Ok(InsertOutcome::Inserted)
    }

    async fn block_at(&self, chain: ChainKind, sequence_no: u64) -> Result<Option<StoredBlock>> {
        let inner = self.inner.read().await;
        Ok(inner
            .blocks
            .get(&chain)
            .and_then(|blocks| blocks.get(&sequence_no))
            .cloned())
    }

    async fn block_by_subject(&self, chain: ChainKind, subject_id: &str) -> Result<Option<StoredBlock>> {
        let inner = self.inner.read().await;
        let Some(sequence_no) = inner.subjects.get(&(chain, subject_id.to_string())) else {
            return Ok(None);
        };
        Ok(inner
            .blocks
            .get(&chain)
            .and_then(|blocks| blocks.get(sequence_no))
            .cloned())
    }

    async fn blocks_range(&self, chain: ChainKind, offset: u64, limit: u64) -> Result<Vec<StoredBlock>> {
        let inner = self.inner.read().await;
        Ok(inner
            .blocks
            .get(&chain)
            .map(|blocks| {
                blocks
                    .values()
                    .skip(offset as usize)
                    .take(limit as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn blocks_between(
        &self,
        chain: ChainKind,
        from_seq: u64,
        to_seq: u64,
        limit: u64,
    ) -> Result<Vec<StoredBlock>> {
        if from_seq > to_seq {
            return Ok(Vec::new());
        }
        let inner = self.inner.read().await;
        Ok(inner
            .blocks
            .get(&chain)
            .map(|blocks| {
                blocks
                    .range(from_seq..=to_seq)
                    .take(limit as usize)
                    .map(|(_, block)| block.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn block_count(&self, chain: ChainKind) -> Result<u64> {
        let inner = self.inner.read().await;
        Ok(inner.blocks.get(&chain).map_or(0, |blocks| blocks.len() as u64))
    }

    async fn search_audit(
        &self,
        filter: &AuditFilter,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<StoredBlock>, u64)> {
        let inner = self.inner.read().await;
        let matching: Vec<&StoredBlock> = inner
            .blocks
            .get(&ChainKind::Audit)
            .map(|blocks| {
                blocks
                    .values()
                    .filter(|block| {
                        serde_json::from_str::<AuditPayload>(&block.payload)
                            .map_or(false, |payload| filter.matches(&payload))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let total = matching.len() as u64;
        let page = matching
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn blocks_created_between(
        &self,
        chain: ChainKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StoredBlock>> {
        let inner = self.inner.read().await;
        Ok(inner
            .blocks
            .get(&chain)
            .map(|blocks| {
                blocks
                    .values()
                    .filter(|block| block.created_at >= start && block.created_at < end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert_reference(&self, reference: &VoteReference) -> Result<Option<VoteReference>> {
        let mut inner = self.inner.write().await;

        if let Some(existing) = inner.references.get(&reference.subject_id) {
            return Ok(Some(existing.clone()));
        }
        if inner.reference_codes.contains_key(&reference.reference_code) {
            return Ok(None);
        }

        inner
            .reference_codes
            .insert(reference.reference_code.clone(), reference.subject_id.clone());
        inner
            .references
            .insert(reference.subject_id.clone(), reference.clone());
        Ok(Some(reference.clone()))
    }

    async fn reference_by_subject(&self, subject_id: &str) -> Result<Option<VoteReference>> {
        let inner = self.inner.read().await;
        Ok(inner.references.get(subject_id).cloned())
    }

    async fn reference_by_code(&self, reference_code: &str) -> Result<Option<VoteReference>> {
        let inner = self.inner.read().await;
        Ok(inner
            .reference_codes
            .get(reference_code)
            .and_then(|subject_id| inner.references.get(subject_id))
            .cloned())
    }

    async fn merkle_root_history(&self, chain: ChainKind, window_key: &str) -> Result<Vec<MerkleRootRecord>> {
        let inner = self.inner.read().await;
        let mut history: Vec<MerkleRootRecord> = inner
            .merkle_roots
            .iter()
            .filter(|record| record.chain == chain && record.window_key == window_key)
            .cloned()
            .collect();
        history.sort_by_key(|record| record.generation);
        Ok(history)
    }

    async fn insert_merkle_root(&self, record: &MerkleRootRecord) -> Result<InsertOutcome> {
        let mut inner = self.inner.write().await;
        let taken = inner.merkle_roots.iter().any(|existing| {
            existing.chain == record.chain
                && existing.window_key == record.window_key
                && existing.generation == record.generation
        });
        if taken {
            return Ok(InsertOutcome::Conflict);
        }
        inner.merkle_roots.push(record.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn list_merkle_roots(&self, offset: u64, limit: u64) -> Result<(Vec<MerkleRootRecord>, u64)> {
        let inner = self.inner.read().await;
        let mut roots = inner.merkle_roots.clone();
        roots.sort_by(|a, b| {
            b.window_key
                .cmp(&a.window_key)
                .then_with(|| a.chain.as_str().cmp(b.chain.as_str()))
                .then_with(|| b.generation.cmp(&a.generation))
        });
        let total = roots.len() as u64;
        let page = roots
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn checkpoint(&self, chain: ChainKind) -> Result<Option<Checkpoint>> {
        let inner = self.inner.read().await;
        Ok(inner.checkpoints.get(&chain).cloned())
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.checkpoints.insert(checkpoint.chain, checkpoint.clone());
        Ok(())
    }
}
