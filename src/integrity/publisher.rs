//! Merkle Root Publication
//!
//! Aggregates one chain's blocks for a closed UTC day into a signed root.
//! Root history is append-only: a changed root for a window is only accepted
//! as a new generation through an explicit, audited override.

use chrono::{DateTime, Duration, NaiveDate, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::audit::entry::AuditEvent;
use crate::audit::logger::AuditLogChain;
use crate::crypto::hashing::canonical_json;
use crate::crypto::signatures::ProofSigner;
use crate::database::models::{page_bounds, InsertOutcome, MerkleRootRecord, Page};
use crate::database::LedgerStore;
use crate::error::{IntegrityError, Result};
use crate::integrity::merkle::build_root;
use crate::ledger::block::ChainKind;

pub const WINDOW_FORMAT: &str = "%Y-%m-%d";

/// Time past a window's end before it is treated as settled. An append
/// stamped just before midnight may commit a little after it.
pub const DEFAULT_SETTLE_SECS: i64 = 120;

/// `[start, end)` of a daily window.
pub fn window_bounds(window_key: &str) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let date = NaiveDate::parse_from_str(window_key, WINDOW_FORMAT).map_err(|_| {
        IntegrityError::ValidationError(format!(
            "Window key must be a UTC date (YYYY-MM-DD), got {}",
            window_key
        ))
    })?;
    let start = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| IntegrityError::ValidationError(format!("Invalid window {}", window_key)))?
        .and_utc();
    Ok((start, start + Duration::days(1)))
}

/// Leaf hashes for a window that closed at least `settle` before `now`, in
/// sequence order.
pub async fn window_leaves(
    store: &dyn LedgerStore,
    chain: ChainKind,
    window_key: &str,
    now: DateTime<Utc>,
    settle: Duration,
) -> Result<Vec<String>> {
    let (start, end) = window_bounds(window_key)?;
    if now < end {
        return Err(IntegrityError::ValidationError(format!(
            "Window {} has not closed yet",
            window_key
        )));
    }
    if now < end + settle {
        return Err(IntegrityError::ValidationError(format!(
            "Window {} closed less than {}s ago; late appends may still commit",
            window_key,
            settle.num_seconds()
        )));
    }

    Ok(store
        .blocks_created_between(chain, start, end)
        .await?
        .into_iter()
        .map(|block| block.block_hash)
        .collect())
}

/// Bytes covered by a root's MAC and signature.
pub fn root_statement(
    chain: ChainKind,
    window_key: &str,
    generation: u32,
    root_hash: &str,
    leaf_count: u64,
) -> Result<Vec<u8>> {
    #[derive(Serialize)]
    struct RootStatement<'a> {
        chain: ChainKind,
        window_key: &'a str,
        generation: u32,
        root_hash: &'a str,
        leaf_count: u64,
    }

    canonical_json(&RootStatement {
        chain,
        window_key,
        generation,
        root_hash,
        leaf_count,
    })
}

/// Check a published root against its embedded public key.
pub fn verify_root_signature(record: &MerkleRootRecord) -> Result<bool> {
    let statement = root_statement(
        record.chain,
        &record.window_key,
        record.generation,
        &record.root_hash,
        record.leaf_count,
    )?;
    ProofSigner::verify_public(&statement, &record.signature, &record.public_key)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "root", rename_all = "snake_case")]
pub enum Publication {
    Published(MerkleRootRecord),
    /// The window already carries this exact root.
    Unchanged(MerkleRootRecord),
    NoRecords,
}

/// Operator authorization to supersede a published root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootOverride {
    pub actor_id: String,
    pub reason: String,
}

pub struct MerklePublisher {
    store: Arc<dyn LedgerStore>,
    signer: Arc<ProofSigner>,
    audit: Arc<AuditLogChain>,
    settle_margin: Duration,
}

impl MerklePublisher {
    pub fn new(store: Arc<dyn LedgerStore>, signer: Arc<ProofSigner>, audit: Arc<AuditLogChain>) -> Self {
        Self {
            store,
            signer,
            audit,
            settle_margin: Duration::seconds(DEFAULT_SETTLE_SECS),
        }
    }

    pub fn with_settle_margin(mut self, settle_margin: Duration) -> Self {
        self.settle_margin = settle_margin.max(Duration::zero());
        self
    }

    pub fn settle_margin(&self) -> Duration {
        self.settle_margin
    }

    async fn settled_leaves(&self, chain: ChainKind, window_key: &str) -> Result<Vec<String>> {
        window_leaves(self.store.as_ref(), chain, window_key, Utc::now(), self.settle_margin).await
    }

    /// Publish generation 1 for a settled window. Re-running with the same
    /// blocks is a no-op.
    pub async fn publish(&self, chain: ChainKind, window_key: &str) -> Result<Publication> {
        let leaves = self.settled_leaves(chain, window_key).await?;
        self.publish_leaves(chain, window_key, &leaves).await
    }

    async fn publish_leaves(
        &self,
        chain: ChainKind,
        window_key: &str,
        leaves: &[String],
    ) -> Result<Publication> {
        let Some(root_hash) = build_root(leaves) else {
            info!("No {} records in window {}; nothing to publish", chain, window_key);
            return Ok(Publication::NoRecords);
        };

        if let Some(existing) = self.compare_latest(chain, window_key, &root_hash).await? {
            return Ok(existing);
        }

        let record = self.sign_record(chain, window_key, 1, root_hash, leaves.len() as u64, None, None)?;
        match self.store.insert_merkle_root(&record).await? {
            InsertOutcome::Inserted => {
                info!(
                    "Published {} Merkle root for {}: {} ({} leaves)",
                    chain, window_key, record.root_hash, record.leaf_count
                );
                Ok(Publication::Published(record))
            }
            _ => {
                // Lost a race with another publisher; the winner must agree.
                self.compare_latest(chain, window_key, &record.root_hash)
                    .await?
                    .ok_or_else(|| {
                        IntegrityError::ConcurrencyConflict(format!(
                            "Merkle root for {} {} was published concurrently",
                            chain, window_key
                        ))
                    })
            }
        }
    }

    /// `Unchanged` if the latest generation matches, a violation if it
    /// differs, `None` if nothing is published yet.
    async fn compare_latest(
        &self,
        chain: ChainKind,
        window_key: &str,
        root_hash: &str,
    ) -> Result<Option<Publication>> {
        let history = self.store.merkle_root_history(chain, window_key).await?;
        match history.into_iter().last() {
            Some(latest) if latest.root_hash == root_hash => Ok(Some(Publication::Unchanged(latest))),
            Some(latest) => {
                warn!(
                    "Recomputed {} root for {} ({}) differs from generation {} ({})",
                    chain, window_key, root_hash, latest.generation, latest.root_hash
                );
                Err(IntegrityError::violation(
                    None,
                    format!(
                        "Merkle root for {} {} differs from published generation {}; an override is required",
                        chain, window_key, latest.generation
                    ),
                ))
            }
            None => Ok(None),
        }
    }

    /// Append a superseding generation for an already published window.
    pub async fn republish(
        &self,
        chain: ChainKind,
        window_key: &str,
        authorization: RootOverride,
    ) -> Result<Publication> {
        if authorization.actor_id.trim().is_empty() {
            return Err(IntegrityError::missing_field("actor_id"));
        }
        if authorization.reason.trim().is_empty() {
            return Err(IntegrityError::missing_field("reason"));
        }

        let history = self.store.merkle_root_history(chain, window_key).await?;
        let Some(latest) = history.into_iter().last() else {
            return Err(IntegrityError::NotFound(format!(
                "No published {} root for {} to supersede",
                chain, window_key
            )));
        };

        let leaves = self.settled_leaves(chain, window_key).await?;
        let Some(root_hash) = build_root(&leaves) else {
            return Err(IntegrityError::ValidationError(format!(
                "Window {} no longer has {} records",
                window_key, chain
            )));
        };
        if root_hash == latest.root_hash {
            return Ok(Publication::Unchanged(latest));
        }

        let generation = latest.generation + 1;
        self.audit
            .record(
                AuditEvent::new("merkle_root_superseded", "merkle_root")
                    .entity(format!("{}:{}", chain, window_key))
                    .actor(authorization.actor_id.clone())
                    .details(json!({
                        "chain": chain,
                        "window_key": window_key,
                        "superseded_generation": latest.generation,
                        "superseded_root": latest.root_hash,
                        "generation": generation,
                        "root_hash": root_hash,
                        "reason": authorization.reason,
                    })),
            )
            .await?;

        let record = self.sign_record(
            chain,
            window_key,
            generation,
            root_hash,
            leaves.len() as u64,
            Some(latest.generation),
            Some(authorization.reason),
        )?;
        match self.store.insert_merkle_root(&record).await? {
            InsertOutcome::Inserted => {
                warn!(
                    "{} root for {} superseded by generation {} ({}) on behalf of {}",
                    chain, window_key, generation, record.root_hash, authorization.actor_id
                );
                Ok(Publication::Published(record))
            }
            _ => Err(IntegrityError::ConcurrencyConflict(format!(
                "Generation {} of {} {} was taken concurrently",
                generation, chain, window_key
            ))),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn sign_record(
        &self,
        chain: ChainKind,
        window_key: &str,
        generation: u32,
        root_hash: String,
        leaf_count: u64,
        supersedes: Option<u32>,
        override_reason: Option<String>,
    ) -> Result<MerkleRootRecord> {
        let statement = root_statement(chain, window_key, generation, &root_hash, leaf_count)?;
        let bundle = self.signer.sign(&statement)?;
        Ok(MerkleRootRecord {
            chain,
            window_key: window_key.to_string(),
            generation,
            root_hash,
            leaf_count,
            mac: bundle.mac,
            signature: bundle.signature,
            public_key: bundle.public_key,
            published_at: Utc::now().trunc_subsecs(3),
            supersedes,
            override_reason,
        })
    }

    pub async fn latest(&self, chain: ChainKind, window_key: &str) -> Result<MerkleRootRecord> {
        window_bounds(window_key)?;
        self.store
            .merkle_root_history(chain, window_key)
            .await?
            .into_iter()
            .last()
            .ok_or_else(|| {
                IntegrityError::NotFound(format!("No {} Merkle root published for {}", chain, window_key))
            })
    }

    /// All generations, oldest first.
    pub async fn history(&self, chain: ChainKind, window_key: &str) -> Result<Vec<MerkleRootRecord>> {
        window_bounds(window_key)?;
        let history = self.store.merkle_root_history(chain, window_key).await?;
        if history.is_empty() {
            return Err(IntegrityError::NotFound(format!(
                "No {} Merkle root published for {}",
                chain, window_key
            )));
        }
        Ok(history)
    }

    pub async fn list(
        &self,
        page: Option<u64>,
        limit: Option<u64>,
        max_limit: u64,
    ) -> Result<Page<MerkleRootRecord>> {
        let (page, limit, offset) = page_bounds(page, limit, 50, max_limit);
        let (items, total) = self.store.list_merkle_roots(offset, limit).await?;
        Ok(Page::new(items, page, limit, total))
    }

    pub fn verify_mac(&self, record: &MerkleRootRecord) -> Result<bool> {
        let statement = root_statement(
            record.chain,
            &record.window_key,
            record.generation,
            &record.root_hash,
            record.leaf_count,
        )?;
        Ok(self.signer.verify_mac(&statement, &record.mac))
    }
}
