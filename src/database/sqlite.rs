//! SQLite implementation of the LedgerStore trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::debug;

use crate::database::models::{
    AuditFilter, ChainTail, Checkpoint, InsertOutcome, MerkleRootRecord, StoredBlock, VoteReference,
};
use crate::database::schema::INTEGRITY_LEDGER_SCHEMA;
use crate::database::LedgerStore;
use crate::error::{IntegrityError, Result};
use crate::ledger::block::{ChainKind, GENESIS_HASH};

const BLOCK_COLUMNS: &str =
    "chain, sequence_no, subject_id, election_id, block_hash, previous_hash, payload, created_at_ms";

const ROOT_COLUMNS: &str = "chain, window_key, generation, root_hash, leaf_count, mac, signature, \
     public_key, published_at, supersedes, override_reason";

/// Audit search over the hashed payload text. `?1`..`?4` are entity type,
/// action type and the inclusive start/end in epoch milliseconds; NULL skips
/// a criterion. Rows that are not valid JSON never match.
const AUDIT_SEARCH_WHERE: &str = "chain = 'audit' \
     AND (?1 IS NULL OR json_extract(CASE WHEN json_valid(payload) THEN payload END, '$.entity_type') = ?1) \
     AND (?2 IS NULL OR json_extract(CASE WHEN json_valid(payload) THEN payload END, '$.action_type') = ?2) \
     AND (?3 IS NULL OR CAST(ROUND(unixepoch(json_extract(CASE WHEN json_valid(payload) THEN payload END, '$.timestamp'), 'subsec') * 1000) AS INTEGER) >= ?3) \
     AND (?4 IS NULL OR CAST(ROUND(unixepoch(json_extract(CASE WHEN json_valid(payload) THEN payload END, '$.timestamp'), 'subsec') * 1000) AS INTEGER) <= ?4)";

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Private in-memory database with the schema applied. Pinned to one
    /// connection so every query sees the same database.
    pub async fn new_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::raw_sql(INTEGRITY_LEDGER_SCHEMA)
            .execute(&self.pool)
            .await?;
        debug!("Integrity ledger schema applied");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Unique-key collisions and lock contention both mean another writer won.
fn is_write_conflict(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.is_unique_violation()
                || matches!(db_err.code().as_deref(), Some("5") | Some("261") | Some("517"))
        }
        _ => false,
    }
}

fn parse_chain(value: &str) -> Result<ChainKind> {
    value
        .parse()
        .map_err(|_| IntegrityError::DatabaseError(format!("Unknown chain in storage: {}", value)))
}

fn block_from_row(row: &SqliteRow) -> Result<StoredBlock> {
    let chain: String = row.try_get("chain")?;
    let created_at_ms: i64 = row.try_get("created_at_ms")?;

    Ok(StoredBlock {
        chain: parse_chain(&chain)?,
        sequence_no: row.try_get::<i64, _>("sequence_no")? as u64,
        subject_id: row.try_get("subject_id")?,
        election_id: row.try_get("election_id")?,
        block_hash: row.try_get("block_hash")?,
        previous_hash: row.try_get("previous_hash")?,
        payload: row.try_get("payload")?,
        created_at: DateTime::from_timestamp_millis(created_at_ms).ok_or_else(|| {
            IntegrityError::DatabaseError(format!("Invalid created_at_ms: {}", created_at_ms))
        })?,
    })
}

fn reference_from_row(row: &SqliteRow) -> Result<VoteReference> {
    let snapshot: String = row.try_get("proof_snapshot")?;
    Ok(VoteReference {
        subject_id: row.try_get("subject_id")?,
        reference_code: row.try_get("reference_code")?,
        proof_snapshot: serde_json::from_str(&snapshot)
            .map_err(|e| IntegrityError::DatabaseError(format!("Invalid proof snapshot: {}", e)))?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

fn root_from_row(row: &SqliteRow) -> Result<MerkleRootRecord> {
    let chain: String = row.try_get("chain")?;
    Ok(MerkleRootRecord {
        chain: parse_chain(&chain)?,
        window_key: row.try_get("window_key")?,
        generation: row.try_get::<i64, _>("generation")? as u32,
        root_hash: row.try_get("root_hash")?,
        leaf_count: row.try_get::<i64, _>("leaf_count")? as u64,
        mac: row.try_get("mac")?,
        signature: row.try_get("signature")?,
        public_key: row.try_get("public_key")?,
        published_at: row.try_get::<DateTime<Utc>, _>("published_at")?,
        supersedes: row
            .try_get::<Option<i64>, _>("supersedes")?
            .map(|generation| generation as u32),
        override_reason: row.try_get("override_reason")?,
    })
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn tail(&self, chain: ChainKind) -> Result<Option<ChainTail>> {
        let row = sqlx::query(
            "SELECT sequence_no, block_hash FROM ledger_blocks WHERE chain = ? ORDER BY sequence_no DESC LIMIT 1",
        )
        .bind(chain.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(ChainTail {
                sequence_no: row.try_get::<i64, _>("sequence_no")? as u64,
                block_hash: row.try_get("block_hash")?,
            })
        })
        .transpose()
    }

    async fn insert_block(&self, block: &StoredBlock) -> Result<InsertOutcome> {
        let mut tx = self.pool.begin().await?;

        let tail = sqlx::query(
            "SELECT sequence_no, block_hash FROM ledger_blocks WHERE chain = ? ORDER BY sequence_no DESC LIMIT 1",
        )
        .bind(block.chain.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let (expected_sequence, expected_previous) = match tail {
            Some(row) => (
                row.try_get::<i64, _>("sequence_no")? as u64 + 1,
                row.try_get::<String, _>("block_hash")?,
            ),
            None => (1, GENESIS_HASH.to_string()),
        };

        if block.sequence_no != expected_sequence || block.previous_hash != expected_previous {
            return Ok(InsertOutcome::Conflict);
        }

        let duplicate = sqlx::query("SELECT 1 FROM ledger_blocks WHERE chain = ? AND subject_id = ?")
            .bind(block.chain.as_str())
            .bind(&block.subject_id)
            .fetch_optional(&mut *tx)
            .await?;
        if duplicate.is_some() {
            return Ok(InsertOutcome::DuplicateSubject);
        }

        let inserted = sqlx::query(&format!(
            "INSERT INTO ledger_blocks ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            BLOCK_COLUMNS
        ))
        .bind(block.chain.as_str())
        .bind(block.sequence_no as i64)
        .bind(&block.subject_id)
        .bind(&block.election_id)
        .bind(&block.block_hash)
        .bind(&block.previous_hash)
        .bind(&block.payload)
        .bind(block.created_at.timestamp_millis())
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(e) if is_write_conflict(&e) => return Ok(InsertOutcome::Conflict),
            Err(e) => return Err(e.into()),
        }

        match tx.commit().await {
            Ok(()) => Ok(InsertOutcome::Inserted),
            Err(e) if is_write_conflict(&e) => Ok(InsertOutcome::Conflict),
            Err(e) => Err(e.into()),
        }
    }

    async fn block_at(&self, chain: ChainKind, sequence_no: u64) -> Result<Option<StoredBlock>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM ledger_blocks WHERE chain = ? AND sequence_no = ?",
            BLOCK_COLUMNS
        ))
        .bind(chain.as_str())
        .bind(sequence_no as i64)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(block_from_row).transpose()
    }

    async fn block_by_subject(&self, chain: ChainKind, subject_id: &str) -> Result<Option<StoredBlock>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM ledger_blocks WHERE chain = ? AND subject_id = ?",
            BLOCK_COLUMNS
        ))
        .bind(chain.as_str())
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(block_from_row).transpose()
    }

    async fn blocks_range(&self, chain: ChainKind, offset: u64, limit: u64) -> Result<Vec<StoredBlock>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM ledger_blocks WHERE chain = ? ORDER BY sequence_no ASC LIMIT ? OFFSET ?",
            BLOCK_COLUMNS
        ))
        .bind(chain.as_str())
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(block_from_row).collect()
    }

    async fn blocks_between(
        &self,
        chain: ChainKind,
        from_seq: u64,
        to_seq: u64,
        limit: u64,
    ) -> Result<Vec<StoredBlock>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM ledger_blocks \
             WHERE chain = ? AND sequence_no >= ? AND sequence_no <= ? \
             ORDER BY sequence_no ASC LIMIT ?",
            BLOCK_COLUMNS
        ))
        .bind(chain.as_str())
        .bind(from_seq as i64)
        .bind(to_seq as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(block_from_row).collect()
    }

    async fn block_count(&self, chain: ChainKind) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ledger_blocks WHERE chain = ?")
            .bind(chain.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn search_audit(
        &self,
        filter: &AuditFilter,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<StoredBlock>, u64)> {
        let start_ms = filter.start_date.map(|start| start.timestamp_millis());
        let end_ms = filter.end_date.map(|end| end.timestamp_millis());

        let rows = sqlx::query(&format!(
            "SELECT {} FROM ledger_blocks WHERE {} ORDER BY sequence_no ASC LIMIT ?5 OFFSET ?6",
            BLOCK_COLUMNS, AUDIT_SEARCH_WHERE
        ))
        .bind(&filter.entity_type)
        .bind(&filter.action_type)
        .bind(start_ms)
        .bind(end_ms)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM ledger_blocks WHERE {}",
            AUDIT_SEARCH_WHERE
        ))
        .bind(&filter.entity_type)
        .bind(&filter.action_type)
        .bind(start_ms)
        .bind(end_ms)
        .fetch_one(&self.pool)
        .await?;

        let blocks = rows.iter().map(block_from_row).collect::<Result<Vec<_>>>()?;
        Ok((blocks, total as u64))
    }

    async fn blocks_created_between(
        &self,
        chain: ChainKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StoredBlock>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM ledger_blocks \
             WHERE chain = ? AND created_at_ms >= ? AND created_at_ms < ? \
             ORDER BY sequence_no ASC",
            BLOCK_COLUMNS
        ))
        .bind(chain.as_str())
        .bind(start.timestamp_millis())
        .bind(end.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(block_from_row).collect()
    }

    async fn insert_reference(&self, reference: &VoteReference) -> Result<Option<VoteReference>> {
        let snapshot = serde_json::to_string(&reference.proof_snapshot)?;

        sqlx::query(
            "INSERT OR IGNORE INTO vote_references (subject_id, reference_code, proof_snapshot, created_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(&reference.subject_id)
        .bind(&reference.reference_code)
        .bind(snapshot)
        .bind(reference.created_at)
        .execute(&self.pool)
        .await?;

        self.reference_by_subject(&reference.subject_id).await
    }

    async fn reference_by_subject(&self, subject_id: &str) -> Result<Option<VoteReference>> {
        let row = sqlx::query(
            "SELECT subject_id, reference_code, proof_snapshot, created_at FROM vote_references WHERE subject_id = ?",
        )
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(reference_from_row).transpose()
    }

    async fn reference_by_code(&self, reference_code: &str) -> Result<Option<VoteReference>> {
        let row = sqlx::query(
            "SELECT subject_id, reference_code, proof_snapshot, created_at FROM vote_references WHERE reference_code = ?",
        )
        .bind(reference_code)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(reference_from_row).transpose()
    }

    async fn merkle_root_history(&self, chain: ChainKind, window_key: &str) -> Result<Vec<MerkleRootRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM merkle_roots WHERE chain = ? AND window_key = ? ORDER BY generation ASC",
            ROOT_COLUMNS
        ))
        .bind(chain.as_str())
        .bind(window_key)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(root_from_row).collect()
    }

    async fn insert_merkle_root(&self, record: &MerkleRootRecord) -> Result<InsertOutcome> {
        let inserted = sqlx::query(&format!(
            "INSERT INTO merkle_roots ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            ROOT_COLUMNS
        ))
        .bind(record.chain.as_str())
        .bind(&record.window_key)
        .bind(record.generation as i64)
        .bind(&record.root_hash)
        .bind(record.leaf_count as i64)
        .bind(&record.mac)
        .bind(&record.signature)
        .bind(&record.public_key)
        .bind(record.published_at)
        .bind(record.supersedes.map(|generation| generation as i64))
        .bind(&record.override_reason)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(e) if is_write_conflict(&e) => Ok(InsertOutcome::Conflict),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_merkle_roots(&self, offset: u64, limit: u64) -> Result<(Vec<MerkleRootRecord>, u64)> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM merkle_roots \
             ORDER BY window_key DESC, chain ASC, generation DESC LIMIT ? OFFSET ?",
            ROOT_COLUMNS
        ))
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM merkle_roots")
            .fetch_one(&self.pool)
            .await?;

        let roots = rows.iter().map(root_from_row).collect::<Result<Vec<_>>>()?;
        Ok((roots, total as u64))
    }

    async fn checkpoint(&self, chain: ChainKind) -> Result<Option<Checkpoint>> {
        let row = sqlx::query(
            "SELECT chain, sequence_no, block_hash, verified_at FROM integrity_checkpoints WHERE chain = ?",
        )
        .bind(chain.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(Checkpoint {
                chain,
                sequence_no: row.try_get::<i64, _>("sequence_no")? as u64,
                block_hash: row.try_get("block_hash")?,
                verified_at: row.try_get::<DateTime<Utc>, _>("verified_at")?,
            })
        })
        .transpose()
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO integrity_checkpoints (chain, sequence_no, block_hash, verified_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (chain) DO UPDATE SET
                sequence_no = excluded.sequence_no,
                block_hash = excluded.block_hash,
                verified_at = excluded.verified_at
            "#,
        )
        .bind(checkpoint.chain.as_str())
        .bind(checkpoint.sequence_no as i64)
        .bind(&checkpoint.block_hash)
        .bind(checkpoint.verified_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
