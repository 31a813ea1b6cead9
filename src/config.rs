use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use tracing::warn;

use crate::crypto::signatures::ProofSigner;
use crate::error::{IntegrityError, Result};

const DEVELOPMENT_MAC_KEY: &str = "development-integrity-mac-key";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    #[serde(skip_serializing)]
    pub integrity_mac_key: String,
    #[serde(skip_serializing)]
    pub signing_secret_key: Option<String>,
    #[serde(skip_serializing)]
    pub operator_token: Option<String>,
    pub max_append_retries: u32,
    pub verify_batch_size: u64,
    pub max_page_size: u64,
    pub verification_base_path: String,
    pub scheduler_enabled: bool,
    pub merkle_interval_secs: u64,
    /// Seconds after midnight UTC before a day's window may be published.
    pub merkle_settle_secs: u64,
    pub verify_interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://integrity.db?mode=rwc".to_string(),
            server_host: "0.0.0.0".to_string(),
            server_port: 3000,
            integrity_mac_key: DEVELOPMENT_MAC_KEY.to_string(),
            signing_secret_key: None,
            operator_token: None,
            max_append_retries: 3,
            verify_batch_size: 1000,
            max_page_size: 500,
            verification_base_path: "/api".to_string(),
            scheduler_enabled: true,
            merkle_interval_secs: 3600,
            merkle_settle_secs: 120,
            verify_interval_secs: 900,
        }
    }
}

fn parsed<T: FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|e| IntegrityError::ConfigError(format!("{} is invalid: {}", name, e))),
        Err(_) => Ok(default),
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let defaults = Self::default();

        let integrity_mac_key = optional("INTEGRITY_MAC_KEY").unwrap_or_else(|| {
            warn!("INTEGRITY_MAC_KEY not set; using the development key");
            defaults.integrity_mac_key.clone()
        });

        Ok(AppConfig {
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            server_host: env::var("SERVER_HOST").unwrap_or(defaults.server_host),
            server_port: parsed("SERVER_PORT", defaults.server_port)?,
            integrity_mac_key,
            signing_secret_key: optional("SIGNING_SECRET_KEY"),
            operator_token: optional("OPERATOR_TOKEN"),
            max_append_retries: parsed("MAX_APPEND_RETRIES", defaults.max_append_retries)?,
            verify_batch_size: parsed("VERIFY_BATCH_SIZE", defaults.verify_batch_size)?,
            max_page_size: parsed("MAX_PAGE_SIZE", defaults.max_page_size)?,
            verification_base_path: env::var("VERIFICATION_BASE_PATH")
                .unwrap_or(defaults.verification_base_path),
            scheduler_enabled: parsed("SCHEDULER_ENABLED", defaults.scheduler_enabled)?,
            merkle_interval_secs: parsed("MERKLE_INTERVAL_SECS", defaults.merkle_interval_secs)?,
            merkle_settle_secs: parsed("MERKLE_SETTLE_SECS", defaults.merkle_settle_secs)?,
            verify_interval_secs: parsed("VERIFY_INTERVAL_SECS", defaults.verify_interval_secs)?,
        })
    }

    /// Signer for roots and proofs. Without a configured key an ephemeral one
    /// is generated, so earlier signatures stop verifying after a restart.
    pub fn signer(&self) -> Result<ProofSigner> {
        let mac_key = self.integrity_mac_key.as_bytes().to_vec();
        match &self.signing_secret_key {
            Some(secret_hex) => ProofSigner::from_hex(mac_key, secret_hex),
            None => {
                warn!("SIGNING_SECRET_KEY not set; generated an ephemeral signing key");
                Ok(ProofSigner::generate(mac_key))
            }
        }
    }
}
