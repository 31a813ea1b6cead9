pub mod api;
pub mod audit;
pub mod config;
pub mod crypto;
pub mod database;
pub mod error;
pub mod integrity;
pub mod ledger;
pub mod verification;

pub use error::IntegrityError;
