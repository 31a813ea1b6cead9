//! Audit Log Chain
//!
//! Tamper-evident record of administrative and integrity-relevant actions,
//! kept as its own hash chain alongside the vote chain.

pub mod entry;
pub mod logger;

pub use entry::{AuditEvent, AuditPayload};
pub use logger::AuditLogChain;
