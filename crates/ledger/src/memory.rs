//! In-memory ledger.
//!
//! Intended for tests/dev; it honors the contract except crash durability.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use gatewarden_core::EventId;

use crate::backlog::BacklogCounter;
use crate::event::{AccessEvent, EventRecord, SyncState};
use crate::signer::EventSigner;
use crate::store::{EventLedger, LedgerError};

#[derive(Debug, Default)]
pub struct InMemoryLedger {
    events: RwLock<Vec<AccessEvent>>,
    signer: Option<EventSigner>,
    backlog: BacklogCounter,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_signer(signer: EventSigner) -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            signer: Some(signer),
            backlog: BacklogCounter::new(),
        }
    }

    /// All events, append order. Test helper.
    pub fn all(&self) -> Vec<AccessEvent> {
        self.events
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl EventLedger for InMemoryLedger {
    async fn append(&self, record: EventRecord) -> Result<AccessEvent, LedgerError> {
        let event = AccessEvent::from_record(record, self.signer.as_ref());
        let mut events = self.events.write().unwrap_or_else(|e| e.into_inner());
        events.push(event.clone());
        self.backlog.incremented();
        Ok(event)
    }

    async fn list_unsynced(&self, limit: usize) -> Result<Vec<AccessEvent>, LedgerError> {
        let events = self.events.read().unwrap_or_else(|e| e.into_inner());
        Ok(events
            .iter()
            .filter(|e| e.sync_state == SyncState::Unsynced)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_synced(&self, ids: &[EventId]) -> Result<(), LedgerError> {
        let mut events = self.events.write().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        let mut marked = 0u64;
        for id in ids {
            let event = events
                .iter_mut()
                .find(|e| e.id == *id)
                .ok_or(LedgerError::UnknownEvent(*id))?;
            if event.sync_state == SyncState::Unsynced {
                event.sync_state = SyncState::Synced;
                event.synced_at = Some(now);
                marked += 1;
            }
        }
        self.backlog.decremented_by(marked);
        Ok(())
    }

    async fn mark_rejected(&self, id: EventId, error: &str) -> Result<(), LedgerError> {
        let mut events = self.events.write().unwrap_or_else(|e| e.into_inner());
        let event = events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(LedgerError::UnknownEvent(id))?;
        if event.sync_state == SyncState::Unsynced {
            event.sync_state = SyncState::Rejected(error.to_string());
            self.backlog.decremented_by(1);
        }
        Ok(())
    }

    async fn record_sync_attempt(&self, ids: &[EventId]) -> Result<(), LedgerError> {
        let mut events = self.events.write().unwrap_or_else(|e| e.into_inner());
        for event in events.iter_mut().filter(|e| ids.contains(&e.id)) {
            event.sync_attempts += 1;
        }
        Ok(())
    }

    async fn clear_synced(&self, older_than: DateTime<Utc>) -> Result<u64, LedgerError> {
        let mut events = self.events.write().unwrap_or_else(|e| e.into_inner());
        let before = events.len();
        events.retain(|e| {
            !(e.sync_state == SyncState::Synced
                && e.synced_at.is_some_and(|at| at < older_than))
        });
        Ok((before - events.len()) as u64)
    }

    fn unsynced_count(&self) -> u64 {
        self.backlog.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EvaluationMode, EventOutcome};
    use gatewarden_core::{CredentialId, SpaceId};

    fn test_record() -> EventRecord {
        EventRecord {
            credential_id: CredentialId::new(),
            space_id: SpaceId::new(),
            occurred_at: Utc::now(),
            outcome: EventOutcome::Deny,
            reason_code: "rule_matched".to_string(),
            reason: "denied".to_string(),
            mode: EvaluationMode::Online,
        }
    }

    #[tokio::test]
    async fn list_unsynced_preserves_append_order_and_limit() {
        let ledger = InMemoryLedger::new();
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(ledger.append(test_record()).await.unwrap().id);
        }

        let unsynced = ledger.list_unsynced(3).await.unwrap();
        let got: Vec<_> = unsynced.iter().map(|e| e.id).collect();
        assert_eq!(got, ids[..3].to_vec());
    }

    #[tokio::test]
    async fn mark_synced_updates_state_and_backlog() {
        let ledger = InMemoryLedger::new();
        let a = ledger.append(test_record()).await.unwrap();
        let b = ledger.append(test_record()).await.unwrap();
        assert_eq!(ledger.unsynced_count(), 2);

        ledger.mark_synced(&[a.id]).await.unwrap();
        assert_eq!(ledger.unsynced_count(), 1);

        let unsynced = ledger.list_unsynced(10).await.unwrap();
        assert_eq!(unsynced.len(), 1);
        assert_eq!(unsynced[0].id, b.id);

        // Marking twice is idempotent for the backlog.
        ledger.mark_synced(&[a.id]).await.unwrap();
        assert_eq!(ledger.unsynced_count(), 1);
    }

    #[tokio::test]
    async fn rejected_events_leave_the_backlog_permanently() {
        let ledger = InMemoryLedger::new();
        let event = ledger.append(test_record()).await.unwrap();

        ledger.mark_rejected(event.id, "unknown space").await.unwrap();
        assert_eq!(ledger.unsynced_count(), 0);
        assert!(ledger.list_unsynced(10).await.unwrap().is_empty());

        let stored = &ledger.all()[0];
        assert_eq!(
            stored.sync_state,
            SyncState::Rejected("unknown space".to_string())
        );
    }

    #[tokio::test]
    async fn unknown_event_marks_are_errors() {
        let ledger = InMemoryLedger::new();
        let err = ledger.mark_synced(&[EventId::new()]).await.unwrap_err();
        assert!(matches!(err, LedgerError::UnknownEvent(_)));
    }
}
