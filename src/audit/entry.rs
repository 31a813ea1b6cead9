//! Audit Log Entry
//!
//! Payload of one audit block. `entry_id` doubles as the block's subject so
//! every recorded event gets its own block.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto::hashing::Canonical;
use crate::error::{IntegrityError, Result};
use crate::ledger::block::{ChainKind, ChainPayload};

/// An action to be recorded, as supplied by callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub action_type: String,
    pub entity_type: String,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub actor_id: Option<String>,
    #[serde(default)]
    pub details: Value,
    /// Defaults to the time of recording.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl AuditEvent {
    pub fn new(action_type: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            entity_type: entity_type.into(),
            entity_id: None,
            actor_id: None,
            details: Value::Null,
            timestamp: None,
        }
    }

    pub fn entity(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditPayload {
    pub entry_id: String,
    pub action_type: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub actor_id: Option<String>,
    pub details: Value,
    pub timestamp: DateTime<Utc>,
}

impl AuditPayload {
    pub fn from_event(entry_id: String, event: AuditEvent) -> Self {
        Self {
            entry_id,
            action_type: event.action_type,
            entity_type: event.entity_type,
            entity_id: event.entity_id,
            actor_id: event.actor_id,
            details: event.details,
            timestamp: event.timestamp.unwrap_or_else(Utc::now),
        }
    }
}

impl Canonical for AuditPayload {
    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("entry_id", &self.entry_id),
            ("action_type", &self.action_type),
            ("entity_type", &self.entity_type),
        ] {
            if value.trim().is_empty() {
                return Err(IntegrityError::missing_field(name));
            }
        }
        Ok(())
    }
}

impl ChainPayload for AuditPayload {
    const CHAIN: ChainKind = ChainKind::Audit;

    fn subject_id(&self) -> &str {
        &self.entry_id
    }
}
