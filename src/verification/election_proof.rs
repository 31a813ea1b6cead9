//! Election Proof
//!
//! Signed summary of one election's votes: how many, the Merkle root over
//! their block hashes, and whether every one of them still links correctly
//! into the global vote chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::crypto::hashing::canonical_json;
use crate::crypto::signatures::ProofSigner;
use crate::database::models::StoredBlock;
use crate::database::LedgerStore;
use crate::error::Result;
use crate::integrity::merkle::build_root;
use crate::integrity::verify::DEFAULT_VERIFY_BATCH_SIZE;
use crate::ledger::block::{ChainKind, GENESIS_HASH};
use crate::ledger::vote::VotePayload;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionProof {
    pub election_id: String,
    pub total_votes: u64,
    pub merkle_root: Option<String>,
    pub first_hash: Option<String>,
    pub last_hash: Option<String>,
    pub chain_valid: bool,
    pub generated_at: DateTime<Utc>,
    pub mac: String,
    pub signature: String,
    pub public_key: String,
}

#[derive(Serialize)]
struct ProofStatement<'a> {
    election_id: &'a str,
    total_votes: u64,
    merkle_root: Option<&'a str>,
    first_hash: Option<&'a str>,
    last_hash: Option<&'a str>,
    chain_valid: bool,
    generated_at: DateTime<Utc>,
}

impl ElectionProof {
    /// Bytes covered by `mac` and `signature`.
    pub fn statement(&self) -> Result<Vec<u8>> {
        canonical_json(&ProofStatement {
            election_id: &self.election_id,
            total_votes: self.total_votes,
            merkle_root: self.merkle_root.as_deref(),
            first_hash: self.first_hash.as_deref(),
            last_hash: self.last_hash.as_deref(),
            chain_valid: self.chain_valid,
            generated_at: self.generated_at,
        })
    }

    /// Check the ECDSA signature with the embedded public key only.
    pub fn verify_signature(&self) -> Result<bool> {
        ProofSigner::verify_public(&self.statement()?, &self.signature, &self.public_key)
    }
}

/// Blocks claimed by an election, by its hashed payload or by the
/// `election_id` column.
struct ElectionBlocks {
    blocks: Vec<StoredBlock>,
    /// Every block's column agrees with its payload about this election.
    consistent: bool,
}

pub struct ElectionProofService {
    store: Arc<dyn LedgerStore>,
    signer: Arc<ProofSigner>,
    batch_size: u64,
}

impl ElectionProofService {
    pub fn new(store: Arc<dyn LedgerStore>, signer: Arc<ProofSigner>) -> Self {
        Self {
            store,
            signer,
            batch_size: DEFAULT_VERIFY_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub async fn build_proof(&self, election_id: &str) -> Result<ElectionProof> {
        let ElectionBlocks { blocks, consistent } = self.election_blocks(election_id).await?;
        let leaves: Vec<String> = blocks.iter().map(|block| block.block_hash.clone()).collect();

        let chain_valid = consistent && self.replay_links(&blocks).await?;
        if !chain_valid {
            warn!("Election {} has votes that no longer link into the vote chain", election_id);
        }

        let mut proof = ElectionProof {
            election_id: election_id.to_string(),
            total_votes: blocks.len() as u64,
            merkle_root: build_root(&leaves),
            first_hash: blocks.first().map(|block| block.previous_hash.clone()),
            last_hash: blocks.last().map(|block| block.block_hash.clone()),
            chain_valid,
            generated_at: Utc::now(),
            mac: String::new(),
            signature: String::new(),
            public_key: String::new(),
        };

        let bundle = self.signer.sign(&proof.statement()?)?;
        proof.mac = bundle.mac;
        proof.signature = bundle.signature;
        proof.public_key = bundle.public_key;

        debug!("Built proof for election {}: {} votes", election_id, proof.total_votes);
        Ok(proof)
    }

    /// Walk the vote chain up to the tail seen at the start. Selection reads
    /// the hashed payload so an edited `election_id` column cannot move a
    /// vote out of (or into) an election unnoticed.
    async fn election_blocks(&self, election_id: &str) -> Result<ElectionBlocks> {
        let upper = self
            .store
            .tail(ChainKind::Votes)
            .await?
            .map_or(0, |tail| tail.sequence_no);

        let mut selected = ElectionBlocks {
            blocks: Vec::new(),
            consistent: true,
        };
        let mut next = 1;
        while next <= upper {
            let batch = self
                .store
                .blocks_between(ChainKind::Votes, next, upper, self.batch_size)
                .await?;
            let Some(last) = batch.last() else {
                break;
            };
            next = last.sequence_no + 1;

            for block in batch {
                let hashed = block
                    .parse_payload::<VotePayload>()
                    .ok()
                    .map(|payload| payload.election_id);
                let by_payload = hashed.as_deref() == Some(election_id);
                let by_column = block.election_id.as_deref() == Some(election_id);
                if !by_payload && !by_column {
                    continue;
                }
                if by_payload != by_column {
                    warn!(
                        "Vote block #{} election_id column disagrees with its payload",
                        block.sequence_no
                    );
                    selected.consistent = false;
                }
                selected.blocks.push(block);
            }
        }
        Ok(selected)
    }

    /// Each block must hash correctly, keep its columns in line with its
    /// payload and point at its global predecessor, which usually belongs to
    /// a different election.
    async fn replay_links(&self, blocks: &[StoredBlock]) -> Result<bool> {
        for block in blocks {
            let predecessor = if block.sequence_no == 1 {
                Some(GENESIS_HASH.to_string())
            } else {
                self.store
                    .block_at(ChainKind::Votes, block.sequence_no - 1)
                    .await?
                    .map(|previous| previous.block_hash)
            };

            let linked = predecessor.as_deref() == Some(block.previous_hash.as_str());
            let intact = matches!(block.recompute_hash(), Ok(hash) if hash == block.block_hash);
            let columns_match = matches!(block.column_mismatch(), Ok(None));
            if !linked || !intact || !columns_match {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
