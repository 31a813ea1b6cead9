//! Background jobs: daily Merkle publication and incremental verification.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::IntegrityError;
use crate::integrity::publisher::{MerklePublisher, Publication, WINDOW_FORMAT};
use crate::integrity::verify::IntegrityVerifier;
use crate::ledger::block::ChainKind;

/// Key of the most recently closed daily window.
pub fn previous_window_key(now: DateTime<Utc>) -> String {
    (now - Duration::days(1)).format(WINDOW_FORMAT).to_string()
}

/// Key of the most recent window that has also passed `settle`.
pub fn settled_window_key(now: DateTime<Utc>, settle: Duration) -> String {
    previous_window_key(now - settle)
}

/// Publish the latest settled window's root for every chain. Returns how many
/// new roots were published.
pub async fn run_merkle_cycle(publisher: &MerklePublisher, now: DateTime<Utc>) -> usize {
    let window_key = settled_window_key(now, publisher.settle_margin());
    let mut published = 0;

    for chain in ChainKind::ALL {
        match publisher.publish(chain, &window_key).await {
            Ok(Publication::Published(record)) => {
                published += 1;
                info!("Scheduled publication of {} root for {}: {}", chain, window_key, record.root_hash);
            }
            Ok(_) => {}
            Err(e @ IntegrityError::IntegrityViolation { .. }) => {
                error!("{} root for {} no longer matches its blocks: {}", chain, window_key, e);
            }
            Err(e) => warn!("Merkle publication for {} {} failed: {}", chain, window_key, e),
        }
    }
    published
}

/// Incrementally verify every chain. Returns the chains that failed.
pub async fn run_verification_cycle(verifier: &IntegrityVerifier) -> Vec<ChainKind> {
    let mut failed = Vec::new();
    for chain in ChainKind::ALL {
        match verifier.verify_incremental(chain).await {
            Ok(report) if report.valid => {}
            Ok(report) => {
                error!(
                    "Scheduled verification of {} chain found {} violation(s)",
                    chain,
                    report.violations.len()
                );
                failed.push(chain);
            }
            Err(e) => {
                error!("Scheduled verification of {} chain could not run: {}", chain, e);
                failed.push(chain);
            }
        }
    }
    failed
}

pub fn spawn_merkle_task(publisher: Arc<MerklePublisher>, interval_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
        loop {
            interval.tick().await;
            run_merkle_cycle(&publisher, Utc::now()).await;
        }
    })
}

pub fn spawn_verification_task(verifier: IntegrityVerifier, interval_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
        loop {
            interval.tick().await;
            run_verification_cycle(&verifier).await;
        }
    })
}
