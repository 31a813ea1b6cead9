use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use election_integrity::api::{self, AppState};
use election_integrity::config::AppConfig;
use election_integrity::database::{LedgerStore, SqliteStore};
use election_integrity::integrity::scheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "election_integrity=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting election integrity service");

    let config = AppConfig::load()?;
    info!("Configuration loaded");

    let database = SqliteStore::new(&config.database_url).await?;
    info!("Database connected");

    database.run_migrations().await?;
    info!("Database migrations completed");

    let signer = config.signer()?;
    info!("Signing with public key {}", signer.public_key_hex());

    let store: Arc<dyn LedgerStore> = Arc::new(database);
    let state = AppState::new(config.clone(), store, signer);

    if config.scheduler_enabled {
        scheduler::spawn_merkle_task(state.publisher.clone(), config.merkle_interval_secs);
        scheduler::spawn_verification_task(state.verifier.clone(), config.verify_interval_secs);
        info!(
            "Scheduler started (merkle every {}s, verification every {}s)",
            config.merkle_interval_secs, config.verify_interval_secs
        );
    }

    let app = api::router(state);

    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
