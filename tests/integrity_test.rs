//! Tamper detection tests
//!
//! Blocks are altered directly in SQLite, the way an attacker with database
//! access would, and the verifier has to find exactly what changed.

mod common;

use std::sync::Arc;

use common::*;
use election_integrity::audit::{AuditEvent, AuditLogChain};
use election_integrity::integrity::{IntegrityVerifier, ViolationKind};
use election_integrity::ledger::{ChainKind, VoteLedger};
use election_integrity::verification::ElectionProofService;
use election_integrity::IntegrityError;
use serde_json::json;

#[tokio::test]
async fn test_single_altered_vote_reported_exactly_once() {
    let store = setup_test_store().await;
    let ledger = VoteLedger::new(store.clone(), 3);
    seed_votes(&ledger, "E-2024", 5).await;

    tamper_payload(&store, ChainKind::Votes, 2, "cand-alpha", "cand-omega").await;

    let report = IntegrityVerifier::new(store, 2).verify(ChainKind::Votes).await.unwrap();
    assert!(!report.valid);
    assert_eq!(report.blocks_checked, 5);
    assert_eq!(report.violations.len(), 1);
    assert_eq!(report.violations[0].sequence_no, 2);
    assert_eq!(report.violations[0].kind, ViolationKind::ContentMismatch);
}

#[tokio::test]
async fn test_every_violation_reported_without_early_exit() {
    let store = setup_test_store().await;
    let ledger = VoteLedger::new(store.clone(), 3);
    seed_votes(&ledger, "E-2024", 6).await;

    tamper_payload(&store, ChainKind::Votes, 1, "cand-alpha", "cand-omega").await;
    tamper_payload(&store, ChainKind::Votes, 5, "cand-alpha", "cand-omega").await;

    let report = IntegrityVerifier::new(store, 100).verify(ChainKind::Votes).await.unwrap();
    let sequences: Vec<u64> = report.violations.iter().map(|v| v.sequence_no).collect();
    assert_eq!(sequences, vec![1, 5]);
}

#[tokio::test]
async fn test_rewritten_link_is_a_chain_break() {
    let store = setup_test_store().await;
    let ledger = VoteLedger::new(store.clone(), 3);
    seed_votes(&ledger, "E-2024", 4).await;

    tamper_column(&store, ChainKind::Votes, 3, "previous_hash", &"f".repeat(64)).await;

    let report = IntegrityVerifier::new(store, 100).verify(ChainKind::Votes).await.unwrap();
    assert!(report
        .violations_of(ViolationKind::ChainBreak)
        .all(|v| v.sequence_no == 3));
    assert_eq!(report.violations_of(ViolationKind::ChainBreak).count(), 1);
    assert!(report.violations.iter().all(|v| v.sequence_no == 3));
}

#[tokio::test]
async fn test_unparseable_payload_reported_as_malformed() {
    let store = setup_test_store().await;
    let ledger = VoteLedger::new(store.clone(), 3);
    seed_votes(&ledger, "E-2024", 3).await;

    tamper_column(&store, ChainKind::Votes, 2, "payload", r#"{"subject_id":"x"}"#).await;

    let report = IntegrityVerifier::new(store, 100).verify(ChainKind::Votes).await.unwrap();
    assert_eq!(report.violations.len(), 1);
    assert_eq!(report.violations[0].kind, ViolationKind::MalformedPayload);
    assert_eq!(report.violations[0].sequence_no, 2);
}

#[tokio::test]
async fn test_audit_chain_tampering_detected() {
    let store = setup_test_store().await;
    let audit = AuditLogChain::new(store.clone(), 3);
    for i in 0..3 {
        audit
            .record(
                AuditEvent::new("ballot_box_sealed", "ballot_box")
                    .entity(format!("box-{}", i))
                    .actor("clerk-7")
                    .details(json!({"seal": format!("seal-{}", i)})),
            )
            .await
            .unwrap();
    }

    tamper_payload(&store, ChainKind::Audit, 3, "clerk-7", "clerk-9").await;

    let verifier = IntegrityVerifier::new(store, 100);
    let audit_report = verifier.verify(ChainKind::Audit).await.unwrap();
    assert_eq!(audit_report.violations.len(), 1);
    assert_eq!(audit_report.violations[0].sequence_no, 3);

    let vote_report = verifier.verify(ChainKind::Votes).await.unwrap();
    assert!(vote_report.valid);
}

#[tokio::test]
async fn test_verification_never_repairs() {
    let store = setup_test_store().await;
    let ledger = VoteLedger::new(store.clone(), 3);
    seed_votes(&ledger, "E-2024", 3).await;
    tamper_payload(&store, ChainKind::Votes, 3, "cand-alpha", "cand-omega").await;

    let verifier = IntegrityVerifier::new(store, 100);
    let first = verifier.verify(ChainKind::Votes).await.unwrap();
    let second = verifier.verify(ChainKind::Votes).await.unwrap();
    assert_eq!(first.violations, second.violations);
    assert_eq!(second.violations.len(), 1);
}

#[tokio::test]
async fn test_incremental_verification_checkpoints() {
    let store = setup_test_store().await;
    let ledger = VoteLedger::new(store.clone(), 3);
    let verifier = IntegrityVerifier::new(store.clone(), 100);

    seed_votes(&ledger, "E-A", 4).await;
    let first = verifier.verify_incremental(ChainKind::Votes).await.unwrap();
    assert!(first.valid);
    assert_eq!(first.checkpoint.as_ref().unwrap().sequence_no, 4);

    seed_votes(&ledger, "E-B", 2).await;
    // Blocks behind the checkpoint are not rescanned incrementally.
    tamper_payload(&store, ChainKind::Votes, 2, "cand-alpha", "cand-omega").await;

    let second = verifier.verify_incremental(ChainKind::Votes).await.unwrap();
    assert!(second.valid);
    assert_eq!(second.started_at_sequence, 5);
    assert_eq!(second.blocks_checked, 2);

    let full = verifier.verify(ChainKind::Votes).await.unwrap();
    assert_eq!(full.violations.len(), 1);
    assert_eq!(full.violations[0].sequence_no, 2);

    // Changing the checkpoint block itself is caught.
    tamper_payload(&store, ChainKind::Votes, 6, "cand-alpha", "cand-omega").await;
    let third = verifier.verify_incremental(ChainKind::Votes).await.unwrap();
    assert!(!third.valid);
    assert_eq!(third.violations.len(), 1);
    assert_eq!(third.violations[0].kind, ViolationKind::CheckpointMismatch);
    assert_eq!(third.violations[0].sequence_no, 6);
}

#[tokio::test]
async fn test_vote_moved_to_another_election_is_detected() {
    let store = setup_test_store().await;
    let ledger = VoteLedger::new(store.clone(), 3);
    seed_votes(&ledger, "E-1", 3).await;

    // The hash covers the payload only; the election column is rewritten.
    tamper_column(&store, ChainKind::Votes, 2, "election_id", "E-OTHER").await;

    let report = IntegrityVerifier::new(store.clone(), 100)
        .verify(ChainKind::Votes)
        .await
        .unwrap();
    assert!(!report.valid);
    assert_eq!(report.violations.len(), 1);
    assert_eq!(report.violations[0].kind, ViolationKind::ColumnMismatch);
    assert_eq!(report.violations[0].sequence_no, 2);
    assert_eq!(report.violations[0].expected, "election_id=E-1");
    assert_eq!(report.violations[0].actual, "election_id=E-OTHER");

    let proofs = ElectionProofService::new(store, Arc::new(test_signer())).with_batch_size(2);
    let original = proofs.build_proof("E-1").await.unwrap();
    assert_eq!(original.total_votes, 3);
    assert!(!original.chain_valid);

    let target = proofs.build_proof("E-OTHER").await.unwrap();
    assert_eq!(target.total_votes, 1);
    assert!(!target.chain_valid);
}

#[tokio::test]
async fn test_rekeyed_vote_is_detected() {
    let store = setup_test_store().await;
    let ledger = VoteLedger::new(store.clone(), 3);
    seed_votes(&ledger, "E-1", 3).await;

    tamper_column(&store, ChainKind::Votes, 2, "subject_id", "forged-subject").await;

    let report = IntegrityVerifier::new(store.clone(), 100)
        .verify(ChainKind::Votes)
        .await
        .unwrap();
    assert_eq!(report.violations.len(), 1);
    assert_eq!(report.violations[0].kind, ViolationKind::ColumnMismatch);
    assert_eq!(report.violations[0].expected, "subject_id=E-1-vote-1");

    let err = ledger.get_by_subject_id("forged-subject").await.unwrap_err();
    assert!(matches!(
        err,
        IntegrityError::IntegrityViolation { sequence_no: Some(2), .. }
    ));
    assert!(matches!(
        ledger.get_by_subject_id("E-1-vote-1").await,
        Err(IntegrityError::NotFound(_))
    ));

    let proof = ElectionProofService::new(store, Arc::new(test_signer()))
        .build_proof("E-1")
        .await
        .unwrap();
    assert_eq!(proof.total_votes, 3);
    assert!(!proof.chain_valid);
}
