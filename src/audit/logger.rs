//! Audit Logger
//!
//! Appends audit events to the audit chain. Shares the ledger's append
//! discipline, so audit entries are ordered and linked exactly like votes.

use tracing::debug;
use uuid::Uuid;

use crate::audit::entry::{AuditEvent, AuditPayload};
use crate::database::models::{page_bounds, AuditFilter, Page};
use crate::error::{IntegrityError, Result};
use crate::ledger::block::Block;
use crate::ledger::chain::Ledger;

pub type AuditLogChain = Ledger<AuditPayload>;

impl Ledger<AuditPayload> {
    /// Record `event` as a new audit block with a fresh entry id.
    pub async fn record(&self, event: AuditEvent) -> Result<Block<AuditPayload>> {
        let entry_id = Uuid::new_v4().to_string();
        debug!("Recording audit event {} as {}", event.action_type, entry_id);
        self.append(AuditPayload::from_event(entry_id, event)).await
    }

    /// Filtered, 1-based pagination over the audit chain in sequence order.
    pub async fn search(
        &self,
        filter: &AuditFilter,
        page: Option<u64>,
        limit: Option<u64>,
        max_limit: u64,
    ) -> Result<Page<Block<AuditPayload>>> {
        if let (Some(start), Some(end)) = (filter.start_date, filter.end_date) {
            if start > end {
                return Err(IntegrityError::ValidationError(format!(
                    "start_date {} is after end_date {}",
                    start, end
                )));
            }
        }

        let (page, limit, offset) = page_bounds(page, limit, 100, max_limit);
        let (stored, total) = self.store().search_audit(filter, offset, limit).await?;
        let items = stored
            .into_iter()
            .map(Block::from_stored)
            .collect::<Result<Vec<_>>>()?;

        debug!("Audit search matched {} entries ({:?})", total, filter);
        Ok(Page::new(items, page, limit, total))
    }
}
