//! Chain Verification
//!
//! Walks a chain by sequence number recomputing every link. The walk never
//! stops at the first problem: the report lists every violation found up to
//! the tail that existed when the scan started.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::database::models::{Checkpoint, StoredBlock};
use crate::database::LedgerStore;
use crate::error::Result;
use crate::ledger::block::{ChainKind, GENESIS_HASH};

pub const DEFAULT_VERIFY_BATCH_SIZE: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViolationKind {
    /// `previous_hash` does not match the preceding block's stored hash.
    ChainBreak,
    /// Recomputed hash differs from the stored `block_hash`.
    ContentMismatch,
    /// Stored payload no longer parses as its chain's payload type.
    MalformedPayload,
    SequenceGap,
    /// `subject_id` or `election_id` column disagrees with the hashed payload.
    ColumnMismatch,
    /// The block a checkpoint vouched for has changed since.
    CheckpointMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub sequence_no: u64,
    pub kind: ViolationKind,
    pub expected: String,
    pub actual: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub chain: ChainKind,
    pub valid: bool,
    pub total_blocks: u64,
    pub blocks_checked: u64,
    /// First sequence number examined by this run.
    pub started_at_sequence: u64,
    pub violations: Vec<Violation>,
    /// Position reached by the walk; persisted only when `valid`.
    pub checkpoint: Option<Checkpoint>,
    pub verified_at: DateTime<Utc>,
}

impl VerificationReport {
    pub fn violations_of(&self, kind: ViolationKind) -> impl Iterator<Item = &Violation> {
        self.violations.iter().filter(move |v| v.kind == kind)
    }
}

/// Running state of one walk.
struct ChainWalker {
    chain: ChainKind,
    expected_sequence: u64,
    expected_previous: String,
    blocks_checked: u64,
    last: Option<(u64, String)>,
    violations: Vec<Violation>,
}

impl ChainWalker {
    fn new(chain: ChainKind, expected_sequence: u64, expected_previous: String) -> Self {
        Self {
            chain,
            expected_sequence,
            expected_previous,
            blocks_checked: 0,
            last: None,
            violations: Vec::new(),
        }
    }

    fn record(&mut self, sequence_no: u64, kind: ViolationKind, expected: String, actual: String) {
        error!(
            "Integrity violation in {} chain at sequence {}: {:?} (expected {}, found {})",
            self.chain, sequence_no, kind, expected, actual
        );
        self.violations.push(Violation {
            sequence_no,
            kind,
            expected,
            actual,
        });
    }

    fn check(&mut self, block: &StoredBlock) {
        if block.sequence_no != self.expected_sequence {
            self.record(
                block.sequence_no,
                ViolationKind::SequenceGap,
                self.expected_sequence.to_string(),
                block.sequence_no.to_string(),
            );
        }

        if block.previous_hash != self.expected_previous {
            self.record(
                block.sequence_no,
                ViolationKind::ChainBreak,
                self.expected_previous.clone(),
                block.previous_hash.clone(),
            );
        }

        match block.recompute_hash() {
            Ok(recomputed) => {
                if recomputed != block.block_hash {
                    self.record(
                        block.sequence_no,
                        ViolationKind::ContentMismatch,
                        recomputed,
                        block.block_hash.clone(),
                    );
                }
                if let Ok(Some(mismatch)) = block.column_mismatch() {
                    self.record(
                        block.sequence_no,
                        ViolationKind::ColumnMismatch,
                        format!("{}={}", mismatch.column, mismatch.payload_value),
                        format!("{}={}", mismatch.column, mismatch.column_value),
                    );
                }
            }
            Err(e) => self.record(
                block.sequence_no,
                ViolationKind::MalformedPayload,
                format!("valid {} payload", self.chain),
                e.to_string(),
            ),
        }

        // Follow the stored hash so one altered block is reported once.
        self.expected_previous = block.block_hash.clone();
        self.expected_sequence = block.sequence_no + 1;
        self.blocks_checked += 1;
        self.last = Some((block.sequence_no, block.block_hash.clone()));
    }

    fn finish(
        self,
        total_blocks: u64,
        started_at_sequence: u64,
        prior: Option<Checkpoint>,
    ) -> VerificationReport {
        let verified_at = Utc::now();
        let checkpoint = match self.last {
            Some((sequence_no, block_hash)) => Some(Checkpoint {
                chain: self.chain,
                sequence_no,
                block_hash,
                verified_at,
            }),
            None => prior.map(|cp| Checkpoint { verified_at, ..cp }),
        };

        VerificationReport {
            chain: self.chain,
            valid: self.violations.is_empty(),
            total_blocks,
            blocks_checked: self.blocks_checked,
            started_at_sequence,
            violations: self.violations,
            checkpoint,
            verified_at,
        }
    }
}

/// Certifies chains against their stored hashes. Never repairs anything.
#[derive(Clone)]
pub struct IntegrityVerifier {
    store: Arc<dyn LedgerStore>,
    batch_size: u64,
}

impl IntegrityVerifier {
    pub fn new(store: Arc<dyn LedgerStore>, batch_size: u64) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// Full scan from genesis.
    pub async fn verify(&self, chain: ChainKind) -> Result<VerificationReport> {
        let walker = ChainWalker::new(chain, 1, GENESIS_HASH.to_string());
        self.walk(walker, None).await
    }

    /// Resume after `checkpoint`, first confirming the checkpoint block is
    /// still the block that was verified.
    pub async fn verify_from(
        &self,
        chain: ChainKind,
        checkpoint: &Checkpoint,
    ) -> Result<VerificationReport> {
        let mut walker = ChainWalker::new(
            chain,
            checkpoint.sequence_no + 1,
            checkpoint.block_hash.clone(),
        );

        match self.store.block_at(chain, checkpoint.sequence_no).await? {
            Some(block) => {
                let recomputed = block.recompute_hash().unwrap_or_default();
                if block.block_hash != checkpoint.block_hash || recomputed != checkpoint.block_hash {
                    let actual = if block.block_hash != checkpoint.block_hash {
                        block.block_hash.clone()
                    } else {
                        recomputed
                    };
                    walker.record(
                        checkpoint.sequence_no,
                        ViolationKind::CheckpointMismatch,
                        checkpoint.block_hash.clone(),
                        actual,
                    );
                }
                walker.expected_previous = block.block_hash;
            }
            None => walker.record(
                checkpoint.sequence_no,
                ViolationKind::CheckpointMismatch,
                checkpoint.block_hash.clone(),
                "missing block".to_string(),
            ),
        }

        self.walk(walker, Some(checkpoint.clone())).await
    }

    /// Resume from the persisted checkpoint (or genesis) and advance the
    /// checkpoint when the run is clean.
    pub async fn verify_incremental(&self, chain: ChainKind) -> Result<VerificationReport> {
        let report = match self.store.checkpoint(chain).await? {
            Some(checkpoint) => self.verify_from(chain, &checkpoint).await?,
            None => self.verify(chain).await?,
        };

        if report.valid {
            if let Some(checkpoint) = &report.checkpoint {
                self.store.save_checkpoint(checkpoint).await?;
                debug!(
                    "Checkpoint for {} chain advanced to sequence {}",
                    chain, checkpoint.sequence_no
                );
            }
        }
        Ok(report)
    }

    async fn walk(
        &self,
        mut walker: ChainWalker,
        prior: Option<Checkpoint>,
    ) -> Result<VerificationReport> {
        let chain = walker.chain;
        let started_at_sequence = walker.expected_sequence;
        let total_blocks = self.store.block_count(chain).await?;
        // Blocks appended after this point belong to the next run.
        let upper = self.store.tail(chain).await?.map_or(0, |tail| tail.sequence_no);

        let mut next = started_at_sequence;
        while next <= upper {
            let batch = self
                .store
                .blocks_between(chain, next, upper, self.batch_size)
                .await?;
            let Some(last) = batch.last() else {
                break;
            };
            next = last.sequence_no + 1;

            for block in &batch {
                walker.check(block);
            }
        }

        let report = walker.finish(total_blocks, started_at_sequence, prior);
        if report.valid {
            info!(
                "{} chain verified: {} blocks checked from sequence {}",
                chain, report.blocks_checked, started_at_sequence
            );
        } else {
            error!(
                "{} chain verification failed with {} violation(s)",
                chain,
                report.violations.len()
            );
        }
        Ok(report)
    }
}
