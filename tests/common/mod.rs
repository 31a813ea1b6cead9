#![allow(dead_code)]

use chrono::{DateTime, Duration, SubsecRound, TimeZone, Utc};
use std::sync::Arc;

use election_integrity::config::AppConfig;
use election_integrity::crypto::ProofSigner;
use election_integrity::database::models::StoredBlock;
use election_integrity::database::{LedgerStore, SqliteStore};
use election_integrity::ledger::{Block, ChainKind, VoteCast, VoteLedger, VotePayload, GENESIS_HASH};

pub const TEST_MAC_KEY: &[u8] = b"test-integrity-mac-key";
pub const TEST_SECRET_KEY: &str = "0101010101010101010101010101010101010101010101010101010101010101";

/// Setup an in-memory SQLite store with the schema applied
pub async fn setup_test_store() -> Arc<SqliteStore> {
    Arc::new(
        SqliteStore::new_in_memory()
            .await
            .expect("Failed to create test database"),
    )
}

pub fn test_signer() -> ProofSigner {
    ProofSigner::from_hex(TEST_MAC_KEY.to_vec(), TEST_SECRET_KEY).expect("valid test key")
}

pub fn test_config() -> AppConfig {
    AppConfig {
        integrity_mac_key: String::from_utf8_lossy(TEST_MAC_KEY).to_string(),
        signing_secret_key: Some(TEST_SECRET_KEY.to_string()),
        scheduler_enabled: false,
        merkle_settle_secs: 0,
        ..AppConfig::default()
    }
}

pub fn vote_cast(subject_id: &str, election_id: &str, candidate_id: &str) -> VoteCast {
    VoteCast {
        subject_id: subject_id.to_string(),
        election_id: election_id.to_string(),
        candidate_id: candidate_id.to_string(),
        timestamp: Utc.with_ymd_and_hms(2024, 11, 5, 14, 30, 0).unwrap(),
        voter_id: format!("voter-{}", subject_id),
    }
}

/// Record `count` votes for `election_id`, all for `cand-alpha`.
pub async fn seed_votes(ledger: &VoteLedger, election_id: &str, count: usize) -> Vec<Block<VotePayload>> {
    let mut blocks = Vec::with_capacity(count);
    for i in 0..count {
        let subject = format!("{}-vote-{}", election_id, i);
        blocks.push(
            ledger
                .record_vote(vote_cast(&subject, election_id, "cand-alpha"))
                .await
                .expect("append vote"),
        );
    }
    blocks
}

/// Append a vote block directly with a chosen `created_at`, bypassing the
/// ledger's clock.
pub async fn insert_vote_at(
    store: &dyn LedgerStore,
    subject_id: &str,
    election_id: &str,
    created_at: DateTime<Utc>,
) -> StoredBlock {
    let (sequence_no, previous_hash) = match store.tail(ChainKind::Votes).await.unwrap() {
        Some(tail) => (tail.sequence_no + 1, tail.block_hash),
        None => (1, GENESIS_HASH.to_string()),
    };
    let payload = VotePayload::from_cast(vote_cast(subject_id, election_id, "cand-alpha")).unwrap();
    let stored = Block::seal(sequence_no, payload, previous_hash, created_at.trunc_subsecs(3))
        .unwrap()
        .to_stored()
        .unwrap();
    store.insert_block(&stored).await.unwrap();
    stored
}

/// Noon of the previous UTC day and its window key.
pub fn yesterday() -> (DateTime<Utc>, String) {
    let noon = (Utc::now() - Duration::days(1))
        .date_naive()
        .and_hms_opt(12, 0, 0)
        .unwrap()
        .and_utc();
    (noon, noon.format("%Y-%m-%d").to_string())
}

/// Rewrite part of a stored payload behind the ledger's back.
pub async fn tamper_payload(store: &SqliteStore, chain: ChainKind, sequence_no: u64, from: &str, to: &str) {
    sqlx::query("DROP TRIGGER IF EXISTS ledger_blocks_no_update")
        .execute(store.pool())
        .await
        .unwrap();
    let result = sqlx::query(
        "UPDATE ledger_blocks SET payload = replace(payload, ?, ?) WHERE chain = ? AND sequence_no = ?",
    )
    .bind(from)
    .bind(to)
    .bind(chain.as_str())
    .bind(sequence_no as i64)
    .execute(store.pool())
    .await
    .unwrap();
    assert_eq!(result.rows_affected(), 1, "tampered block must exist");
}

pub async fn tamper_column(store: &SqliteStore, chain: ChainKind, sequence_no: u64, column: &str, value: &str) {
    sqlx::query("DROP TRIGGER IF EXISTS ledger_blocks_no_update")
        .execute(store.pool())
        .await
        .unwrap();
    sqlx::query(&format!(
        "UPDATE ledger_blocks SET {} = ? WHERE chain = ? AND sequence_no = ?",
        column
    ))
    .bind(value)
    .bind(chain.as_str())
    .bind(sequence_no as i64)
    .execute(store.pool())
    .await
    .unwrap();
}
