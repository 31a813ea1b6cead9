//! Hash Chain Ledger
//!
//! Owns one chain's tail. Appends are serialized through an async mutex held
//! for the whole read-tail/hash/insert cycle, and the store rejects any block
//! that does not extend its current tail, so a second process writing the same
//! chain loses the race and retries instead of forking it.

use chrono::{SubsecRound, Utc};
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::crypto::hashing::Canonical;
use crate::database::models::{page_bounds, ChainTail, InsertOutcome, Page};
use crate::database::LedgerStore;
use crate::error::{IntegrityError, Result};
use crate::ledger::block::{Block, ChainPayload, GENESIS_HASH};
use crate::ledger::vote::{VoteCast, VotePayload};

pub const DEFAULT_MAX_APPEND_RETRIES: u32 = 3;

/// Ordered slice of a chain plus the chain's block count.
#[derive(Debug, Clone)]
pub struct ChainRange<P> {
    pub items: Vec<Block<P>>,
    pub total: u64,
}

pub struct Ledger<P> {
    store: Arc<dyn LedgerStore>,
    write_lock: Mutex<()>,
    max_append_retries: u32,
    _payload: PhantomData<fn() -> P>,
}

/// The vote chain.
pub type VoteLedger = Ledger<VotePayload>;

impl<P: ChainPayload> Ledger<P> {
    pub fn new(store: Arc<dyn LedgerStore>, max_append_retries: u32) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
            max_append_retries,
            _payload: PhantomData,
        }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Append `payload` as the next block of this chain.
    pub async fn append(&self, payload: P) -> Result<Block<P>> {
        payload.validate()?;

        let _guard = self.write_lock.lock().await;
        let mut conflicts = 0;

        loop {
            let (sequence_no, previous_hash) = match self.store.tail(P::CHAIN).await? {
                Some(tail) => (tail.sequence_no + 1, tail.block_hash),
                None => (1, GENESIS_HASH.to_string()),
            };

            // Millisecond precision survives every storage round trip.
            let created_at = Utc::now().trunc_subsecs(3);
            let block = Block::seal(sequence_no, payload.clone(), previous_hash, created_at)?;

            match self.store.insert_block(&block.to_stored()?).await? {
                InsertOutcome::Inserted => {
                    info!("Appended block {}", block.summary());
                    return Ok(block);
                }
                InsertOutcome::DuplicateSubject => {
                    return Err(IntegrityError::ValidationError(format!(
                        "Subject {} already has a block in the {} chain",
                        block.subject_id,
                        P::CHAIN
                    )));
                }
                InsertOutcome::Conflict => {
                    conflicts += 1;
                    if conflicts > self.max_append_retries {
                        return Err(IntegrityError::ConcurrencyConflict(format!(
                            "{} chain tail kept moving; gave up after {} retries",
                            P::CHAIN,
                            self.max_append_retries
                        )));
                    }
                    warn!(
                        "Tail of {} chain moved during append (attempt {}), retrying",
                        P::CHAIN,
                        conflicts
                    );
                }
            }
        }
    }

    pub async fn get_by_subject_id(&self, subject_id: &str) -> Result<Block<P>> {
        let stored = self
            .store
            .block_by_subject(P::CHAIN, subject_id)
            .await?
            .ok_or_else(|| {
                IntegrityError::NotFound(format!("No {} block for subject {}", P::CHAIN, subject_id))
            })?;
        Block::from_stored(stored)
    }

    /// Blocks in `sequence_no` order. An empty chain yields an empty range.
    pub async fn get_range(&self, offset: u64, limit: u64) -> Result<ChainRange<P>> {
        let total = self.store.block_count(P::CHAIN).await?;
        let items = self
            .store
            .blocks_range(P::CHAIN, offset, limit)
            .await?
            .into_iter()
            .map(Block::from_stored)
            .collect::<Result<Vec<_>>>()?;

        debug!(
            "Read {} blocks of {} chain at offset {} (total {})",
            items.len(),
            P::CHAIN,
            offset,
            total
        );
        Ok(ChainRange { items, total })
    }

    /// 1-based pagination over [`Ledger::get_range`].
    pub async fn get_page(
        &self,
        page: Option<u64>,
        limit: Option<u64>,
        max_limit: u64,
    ) -> Result<Page<Block<P>>> {
        let (page, limit, offset) = page_bounds(page, limit, 100, max_limit);
        let range = self.get_range(offset, limit).await?;
        Ok(Page::new(range.items, page, limit, range.total))
    }

    pub async fn tail(&self) -> Result<Option<ChainTail>> {
        self.store.tail(P::CHAIN).await
    }
}

impl Ledger<VotePayload> {
    /// Entry point for the vote-casting subsystem.
    pub async fn record_vote(&self, cast: VoteCast) -> Result<Block<VotePayload>> {
        let payload = VotePayload::from_cast(cast)?;
        self.append(payload).await
    }
}
