//! Ledger contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use gatewarden_core::EventId;

use crate::event::{AccessEvent, EventRecord};

/// Ledger operation error.
///
/// Infrastructure errors only; the decision itself is domain-level and made
/// before the ledger is involved.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Durable persistence failed. Escalated, not swallowed: the caller must
    /// fail the whole evaluation rather than report a decision it cannot
    /// prove it made.
    #[error("ledger persistence failed: {0}")]
    Persistence(String),

    /// A mark referenced an event id the ledger has never appended.
    #[error("unknown event: {0}")]
    UnknownEvent(EventId),

    /// A stored row could not be mapped back to an event.
    #[error("corrupt ledger row: {0}")]
    Corrupt(String),
}

/// Append-only ledger of access events, exclusive to one device process.
///
/// Implementations must persist durably before `append` returns (the write
/// survives a crash immediately after return) and must preserve
/// creation-time ordering for `list_unsynced`. Concurrent appends are
/// serialized by the caller (single-writer-per-device).
#[async_trait]
pub trait EventLedger: Send + Sync {
    /// Append one immutable record; assigns the event id and signature.
    async fn append(&self, record: EventRecord) -> Result<AccessEvent, LedgerError>;

    /// Unsynced events ordered by creation time ascending, at most `limit`.
    async fn list_unsynced(&self, limit: usize) -> Result<Vec<AccessEvent>, LedgerError>;

    /// Mark events as synced. The only mutation allowed post-append, besides
    /// terminal rejection.
    async fn mark_synced(&self, ids: &[EventId]) -> Result<(), LedgerError>;

    /// Record a terminal per-event rejection from the authority; the event
    /// leaves the sync backlog and is never retried.
    async fn mark_rejected(&self, id: EventId, error: &str) -> Result<(), LedgerError>;

    /// Record one failed sync attempt against the given events.
    async fn record_sync_attempt(&self, ids: &[EventId]) -> Result<(), LedgerError>;

    /// Delete synced events older than the cutoff; returns how many were
    /// removed. Retention policy itself lives elsewhere.
    async fn clear_synced(&self, older_than: DateTime<Utc>) -> Result<u64, LedgerError>;

    /// Current unsynced backlog, from the maintained counter. Never blocks
    /// the write path.
    fn unsynced_count(&self) -> u64;
}
