// Database schema for the integrity ledger.

pub const INTEGRITY_LEDGER_SCHEMA: &str = include_str!("../../migrations/001_integrity_ledger.sql");
