//! Hash chain ledger tests
//!
//! Appends, ordering, pagination and persistence against SQLite.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use common::*;
use election_integrity::audit::{AuditEvent, AuditLogChain};
use election_integrity::database::{LedgerStore, MemoryStore, SqliteStore};
use election_integrity::integrity::IntegrityVerifier;
use election_integrity::ledger::{ChainKind, VoteLedger, GENESIS_HASH};
use election_integrity::IntegrityError;

#[tokio::test]
async fn test_sequential_appends_form_valid_chain() {
    let store = setup_test_store().await;
    let ledger = VoteLedger::new(store.clone(), 3);

    let blocks = seed_votes(&ledger, "E-2024", 10).await;

    assert_eq!(blocks[0].previous_hash, GENESIS_HASH);
    for (i, pair) in blocks.windows(2).enumerate() {
        assert_eq!(pair[0].sequence_no, i as u64 + 1);
        assert_eq!(pair[1].previous_hash, pair[0].block_hash);
    }

    let report = IntegrityVerifier::new(store, 4).verify(ChainKind::Votes).await.unwrap();
    assert!(report.valid);
    assert_eq!(report.total_blocks, 10);
    assert_eq!(report.blocks_checked, 10);
}

#[tokio::test]
async fn test_block_reads_back_identically() {
    let store = setup_test_store().await;
    let ledger = VoteLedger::new(store, 3);

    let appended = ledger
        .record_vote(vote_cast("ballot-17", "E-2024", "cand-alpha"))
        .await
        .unwrap();
    let loaded = ledger.get_by_subject_id("ballot-17").await.unwrap();

    assert_eq!(loaded, appended);
    assert!(loaded.verify_hash());
    assert_ne!(loaded.payload.voter_hash, "voter-ballot-17");
}

#[tokio::test]
async fn test_range_and_pagination() {
    let store = setup_test_store().await;
    let ledger = VoteLedger::new(store.clone(), 3);
    seed_votes(&ledger, "E-2024", 25).await;

    let range = ledger.get_range(20, 10).await.unwrap();
    assert_eq!(range.total, 25);
    assert_eq!(range.items.len(), 5);
    assert_eq!(range.items[0].sequence_no, 21);

    let page = ledger.get_page(Some(3), Some(10), 500).await.unwrap();
    assert_eq!(page.items.len(), 5);
    assert_eq!(page.total_pages, 3);

    let audit = AuditLogChain::new(store, 3);
    let empty = audit.get_range(0, 10).await.unwrap();
    assert!(empty.items.is_empty());
    assert_eq!(empty.total, 0);
}

#[tokio::test]
async fn test_chains_are_independent() {
    let store = setup_test_store().await;
    let votes = VoteLedger::new(store.clone(), 3);
    let audit = AuditLogChain::new(store.clone(), 3);

    seed_votes(&votes, "E-2024", 3).await;
    let entry = audit
        .record(AuditEvent::new("election_closed", "election").entity("E-2024"))
        .await
        .unwrap();

    assert_eq!(entry.sequence_no, 1);
    assert_eq!(entry.previous_hash, GENESIS_HASH);
    assert_eq!(store.block_count(ChainKind::Votes).await.unwrap(), 3);
    assert_eq!(store.block_count(ChainKind::Audit).await.unwrap(), 1);
}

#[tokio::test]
async fn test_duplicate_subject_rejected() {
    let store = setup_test_store().await;
    let ledger = VoteLedger::new(store, 3);

    ledger.record_vote(vote_cast("ballot-1", "E-2024", "cand-alpha")).await.unwrap();
    let err = ledger
        .record_vote(vote_cast("ballot-1", "E-2024", "cand-beta"))
        .await
        .unwrap_err();

    assert!(matches!(err, IntegrityError::ValidationError(_)));
    assert_eq!(ledger.tail().await.unwrap().unwrap().sequence_no, 1);
}

#[tokio::test]
async fn test_missing_voter_rejected_before_append() {
    let store = setup_test_store().await;
    let ledger = VoteLedger::new(store, 3);

    let mut cast = vote_cast("ballot-1", "E-2024", "cand-alpha");
    cast.voter_id = "  ".to_string();

    let err = ledger.record_vote(cast).await.unwrap_err();
    assert!(matches!(err, IntegrityError::ValidationError(_)));
    assert!(ledger.tail().await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_appends_never_fork() {
    let store = setup_test_store().await;
    let ledger = Arc::new(VoteLedger::new(store.clone(), 3));

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                ledger
                    .record_vote(vote_cast(&format!("ballot-{}", i), "E-2024", "cand-alpha"))
                    .await
            })
        })
        .collect();

    let mut sequences = BTreeSet::new();
    for handle in handles {
        sequences.insert(handle.await.unwrap().unwrap().sequence_no);
    }

    assert_eq!(sequences, (1..=20).collect::<BTreeSet<u64>>());
    let report = IntegrityVerifier::new(store, 100).verify(ChainKind::Votes).await.unwrap();
    assert!(report.valid);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_independent_writers_on_shared_store_retry() {
    // Two ledgers over one store behave like two processes: they share no
    // lock and must rely on the store's compare-and-insert.
    let store = Arc::new(MemoryStore::new());
    let first = Arc::new(VoteLedger::new(store.clone(), 50));
    let second = Arc::new(VoteLedger::new(store.clone(), 50));

    let mut handles = Vec::new();
    for i in 0..10 {
        for (name, ledger) in [("a", first.clone()), ("b", second.clone())] {
            handles.push(tokio::spawn(async move {
                ledger
                    .record_vote(vote_cast(&format!("{}-{}", name, i), "E-2024", "cand-alpha"))
                    .await
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(store.block_count(ChainKind::Votes).await.unwrap(), 20);
    let report = IntegrityVerifier::new(store, 7).verify(ChainKind::Votes).await.unwrap();
    assert!(report.valid);
}

#[tokio::test]
async fn test_persisted_chain_reloads_with_same_tail() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("ledger.db").display());

    let tail = {
        let store = Arc::new(SqliteStore::new(&url).await.unwrap());
        store.run_migrations().await.unwrap();
        let ledger = VoteLedger::new(store.clone(), 3);
        seed_votes(&ledger, "E-2024", 5).await;
        let tail = ledger.tail().await.unwrap().unwrap();
        store.pool().close().await;
        tail
    };

    let store = Arc::new(SqliteStore::new(&url).await.unwrap());
    store.run_migrations().await.unwrap();
    let ledger = VoteLedger::new(store.clone(), 3);
    assert_eq!(ledger.tail().await.unwrap().unwrap(), tail);

    let next = ledger
        .record_vote(vote_cast("after-restart", "E-2024", "cand-alpha"))
        .await
        .unwrap();
    assert_eq!(next.sequence_no, 6);
    assert_eq!(next.previous_hash, tail.block_hash);

    let report = IntegrityVerifier::new(store, 100).verify(ChainKind::Votes).await.unwrap();
    assert!(report.valid);
}

#[tokio::test]
async fn test_storage_refuses_updates_and_deletes() {
    let store = setup_test_store().await;
    let ledger = VoteLedger::new(store.clone(), 3);
    seed_votes(&ledger, "E-2024", 2).await;

    let update = sqlx::query("UPDATE ledger_blocks SET payload = '{}' WHERE sequence_no = 1")
        .execute(store.pool())
        .await;
    assert!(update.is_err());

    let delete = sqlx::query("DELETE FROM ledger_blocks WHERE sequence_no = 2")
        .execute(store.pool())
        .await;
    assert!(delete.is_err());
    assert_eq!(store.block_count(ChainKind::Votes).await.unwrap(), 2);
}

#[tokio::test]
async fn test_listing_reports_corrupt_block_as_violation() {
    let store = setup_test_store().await;
    let ledger = VoteLedger::new(store.clone(), 3);
    seed_votes(&ledger, "E-2024", 3).await;

    tamper_column(&store, ChainKind::Votes, 2, "payload", r#"{"subject_id":"x"}"#).await;

    for err in [
        ledger.get_range(0, 10).await.unwrap_err(),
        ledger.get_page(Some(1), Some(10), 500).await.unwrap_err(),
        ledger.get_by_subject_id("E-2024-vote-1").await.unwrap_err(),
    ] {
        assert!(
            matches!(err, IntegrityError::IntegrityViolation { sequence_no: Some(2), .. }),
            "unexpected error: {}",
            err
        );
    }

    // Pages that do not include the block still load.
    assert_eq!(ledger.get_range(2, 10).await.unwrap().items.len(), 1);
}
