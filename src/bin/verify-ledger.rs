use anyhow::{anyhow, Result};
use chrono::{Duration, Utc};
use clap::{Arg, ArgAction, Command};
use tracing::{error, info};

use election_integrity::database::{LedgerStore, SqliteStore};
use election_integrity::integrity::merkle::build_root;
use election_integrity::integrity::publisher::{verify_root_signature, window_leaves};
use election_integrity::integrity::verify::{IntegrityVerifier, VerificationReport};
use election_integrity::ledger::block::ChainKind;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("verify-ledger")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Verify the hash chains of an election integrity database")
        .arg(
            Arg::new("database-url")
                .short('d')
                .long("database-url")
                .value_name("URL")
                .help("SQLite database URL")
                .default_value("sqlite://integrity.db"),
        )
        .arg(
            Arg::new("chain")
                .short('c')
                .long("chain")
                .value_name("CHAIN")
                .help("Chain to verify: votes, audit or all")
                .default_value("all"),
        )
        .arg(
            Arg::new("window")
                .short('w')
                .long("window")
                .value_name("YYYY-MM-DD")
                .help("Day window whose Merkle root should be recomputed"),
        )
        .arg(
            Arg::new("merkle-root")
                .short('m')
                .long("merkle-root")
                .value_name("HASH")
                .requires("window")
                .help("Expected Merkle root for the window (use with a single --chain)"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable verbose output"),
        )
        .get_matches();

    let verbose = matches.get_flag("verbose");
    tracing_subscriber::fmt()
        .with_max_level(if verbose { tracing::Level::DEBUG } else { tracing::Level::WARN })
        .init();

    let database_url = matches
        .get_one::<String>("database-url")
        .ok_or_else(|| anyhow!("--database-url is required"))?;
    let chains = match matches.get_one::<String>("chain").map(String::as_str) {
        None | Some("all") => ChainKind::ALL.to_vec(),
        Some(chain) => vec![chain.parse::<ChainKind>()?],
    };
    let window = matches.get_one::<String>("window");
    let expected_root = matches.get_one::<String>("merkle-root");

    if let Err(e) = run(database_url, &chains, window, expected_root, verbose).await {
        error!("Ledger verification failed: {}", e);
        eprintln!("✗ {}", e);
        std::process::exit(1);
    }

    println!("✓ Ledger verification completed successfully");
    Ok(())
}

async fn run(
    database_url: &str,
    chains: &[ChainKind],
    window: Option<&String>,
    expected_root: Option<&String>,
    verbose: bool,
) -> Result<()> {
    info!("Opening {}", database_url);
    let store = SqliteStore::new(database_url).await?;
    let verifier = IntegrityVerifier::new(std::sync::Arc::new(store.clone()), 1000);

    let mut failed = Vec::new();
    for &chain in chains {
        let report = verifier.verify(chain).await?;
        print_report(&report, verbose);
        if !report.valid {
            failed.push(chain);
        }
    }

    if let Some(window) = window {
        for &chain in chains {
            check_window(&store, chain, window, expected_root, verbose).await?;
        }
    }

    if !failed.is_empty() {
        return Err(anyhow!(
            "{} chain(s) failed verification",
            failed.iter().map(ChainKind::as_str).collect::<Vec<_>>().join(", ")
        ));
    }
    Ok(())
}

fn print_report(report: &VerificationReport, verbose: bool) {
    let mark = if report.valid { "✓" } else { "✗" };
    println!(
        "{} {} chain: {} blocks, {} violation(s)",
        mark,
        report.chain,
        report.total_blocks,
        report.violations.len()
    );

    for violation in &report.violations {
        println!(
            "  #{} {:?}: expected {}, found {}",
            violation.sequence_no, violation.kind, violation.expected, violation.actual
        );
    }

    if verbose {
        if let Some(checkpoint) = &report.checkpoint {
            println!("  Head: #{} {}", checkpoint.sequence_no, checkpoint.block_hash);
        }
    }
}

async fn check_window(
    store: &SqliteStore,
    chain: ChainKind,
    window: &str,
    expected_root: Option<&String>,
    verbose: bool,
) -> Result<()> {
    let leaves = window_leaves(store, chain, window, Utc::now(), Duration::zero()).await?;
    let computed = build_root(&leaves);
    println!(
        "  {} {}: {} leaves, root {}",
        chain,
        window,
        leaves.len(),
        computed.as_deref().unwrap_or("(none)")
    );

    if let Some(published) = store.merkle_root_history(chain, window).await?.last() {
        let signed = verify_root_signature(published)?;
        if verbose {
            println!(
                "  Published generation {}: {} (signature {})",
                published.generation,
                published.root_hash,
                if signed { "valid" } else { "INVALID" }
            );
        }
        if !signed {
            return Err(anyhow!("Signature on published {} root for {} is invalid", chain, window));
        }
        if computed.as_deref() != Some(published.root_hash.as_str()) {
            return Err(anyhow!(
                "Published {} root for {} ({}) does not match the blocks",
                chain,
                window,
                published.root_hash
            ));
        }
    }

    if let Some(expected) = expected_root {
        if computed.as_deref() != Some(expected.as_str()) {
            return Err(anyhow!(
                "Merkle root mismatch for {} {}. Expected: {}, Got: {}",
                chain,
                window,
                expected,
                computed.as_deref().unwrap_or("(none)")
            ));
        }
    }
    Ok(())
}
