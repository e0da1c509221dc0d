//! Batch reconciliation against the authoritative model.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use thiserror::Error;

use gatewarden_core::{CredentialId, EventId, SpaceId};
use gatewarden_ledger::{EvaluationMode, EventOutcome, EventSigner};
use gatewarden_sync::{batch_checksum, AckStatus, BatchAck, BatchEnvelope, EventAck, WireEvent};

/// Whole-batch reconciliation failure. Per-event problems are never errors;
/// they come back as `Rejected` acks so the rest of the batch still lands.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The checksum recomputed over the received events does not match the
    /// one the device computed. The batch is discarded; the device retries.
    #[error("batch checksum mismatch: device sent {sent}, authority computed {computed}")]
    ChecksumMismatch { sent: String, computed: String },
}

/// Authoritative registry of spaces and credentials the reconciler accepts
/// references to. Provisioning keeps it current; the reconciler only reads.
#[derive(Debug, Default)]
pub struct AuthorityRegistry {
    spaces: RwLock<HashSet<SpaceId>>,
    credentials: RwLock<HashSet<CredentialId>>,
}

impl AuthorityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_space(&self, id: SpaceId) {
        self.spaces
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id);
    }

    pub fn register_credential(&self, id: CredentialId) {
        self.credentials
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id);
    }

    pub fn knows_space(&self, id: SpaceId) -> bool {
        self.spaces
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&id)
    }

    pub fn knows_credential(&self, id: CredentialId) -> bool {
        self.credentials
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&id)
    }
}

/// One accepted event in the canonical ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalEntry {
    pub id: EventId,
    pub credential_id: CredentialId,
    pub space_id: SpaceId,
    pub occurred_at: DateTime<Utc>,
    pub outcome: EventOutcome,
    pub reason_code: String,
    pub mode: EvaluationMode,
}

impl From<&WireEvent> for CanonicalEntry {
    fn from(event: &WireEvent) -> Self {
        Self {
            id: event.id,
            credential_id: event.credential_id,
            space_id: event.space_id,
            occurred_at: event.timestamp_utc,
            outcome: event.outcome,
            reason_code: event.reason_code.clone(),
            mode: event.mode,
        }
    }
}

/// Canonical system-of-record ledger.
///
/// Application is serialized per credential: each credential's history is
/// ordered by event timestamp, with a deny ordered ahead of a permit when
/// their timestamps tie. Batches from different devices may interleave, so
/// insertion keeps the per-credential order rather than trusting arrival
/// order.
#[derive(Debug, Default)]
pub struct CanonicalLedger {
    by_credential: RwLock<HashMap<CredentialId, Vec<CanonicalEntry>>>,
    accepted: RwLock<HashSet<EventId>>,
}

impl CanonicalLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this event id has already been accepted.
    pub fn contains(&self, id: EventId) -> bool {
        self.accepted
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&id)
    }

    /// Insert an entry into its credential's history at the ordered position.
    /// Returns false when the event id was already accepted.
    pub fn apply(&self, entry: CanonicalEntry) -> bool {
        let mut accepted = self.accepted.write().unwrap_or_else(|e| e.into_inner());
        if !accepted.insert(entry.id) {
            return false;
        }

        let mut histories = self
            .by_credential
            .write()
            .unwrap_or_else(|e| e.into_inner());
        let history = histories.entry(entry.credential_id).or_default();
        let at = history.partition_point(|e| order_key(e) <= order_key(&entry));
        history.insert(at, entry);
        true
    }

    /// A credential's accepted history in canonical order.
    pub fn history(&self, credential_id: CredentialId) -> Vec<CanonicalEntry> {
        self.by_credential
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&credential_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn accepted_count(&self) -> usize {
        self.accepted
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

/// Canonical ordering key: timestamp, then outcome with deny ahead of permit
/// on a timestamp tie.
fn order_key(entry: &CanonicalEntry) -> (DateTime<Utc>, u8) {
    let rank = match entry.outcome {
        EventOutcome::Deny => 0,
        EventOutcome::Permit => 1,
    };
    (entry.occurred_at, rank)
}

/// Receives device batches and reconciles them into the canonical ledger.
pub struct Reconciler {
    registry: AuthorityRegistry,
    ledger: CanonicalLedger,
    /// Authority's copy of the device HMAC key; when set, events carrying a
    /// signature must verify against it.
    signer: Option<EventSigner>,
}

impl Reconciler {
    pub fn new(registry: AuthorityRegistry) -> Self {
        Self {
            registry,
            ledger: CanonicalLedger::new(),
            signer: None,
        }
    }

    pub fn with_signer(registry: AuthorityRegistry, signer: EventSigner) -> Self {
        Self {
            registry,
            ledger: CanonicalLedger::new(),
            signer: Some(signer),
        }
    }

    pub fn registry(&self) -> &AuthorityRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &CanonicalLedger {
        &self.ledger
    }

    /// Reconcile one batch: verify the checksum over the received events,
    /// then acknowledge each event individually.
    ///
    /// Resubmission is safe: an event id already accepted comes back as
    /// `Duplicate` and is not reprocessed.
    pub fn reconcile(&self, envelope: &BatchEnvelope) -> Result<BatchAck, ReconcileError> {
        let computed = batch_checksum(&envelope.events);
        if computed != envelope.checksum {
            tracing::warn!(
                batch_id = %envelope.batch_id,
                sent = %envelope.checksum,
                computed = %computed,
                "rejecting batch with checksum mismatch"
            );
            return Err(ReconcileError::ChecksumMismatch {
                sent: envelope.checksum.clone(),
                computed,
            });
        }

        let results: Vec<EventAck> = envelope
            .events
            .iter()
            .map(|event| self.reconcile_event(event))
            .collect();

        let accepted = results
            .iter()
            .filter(|r| r.status == AckStatus::Accepted)
            .count();
        tracing::info!(
            batch_id = %envelope.batch_id,
            events = envelope.events.len(),
            accepted,
            "batch reconciled"
        );

        Ok(BatchAck {
            batch_id: envelope.batch_id,
            checksum: computed,
            results,
        })
    }

    fn reconcile_event(&self, event: &WireEvent) -> EventAck {
        if let (Some(signer), Some(signature)) = (&self.signer, &event.signature) {
            if !signer.verify(event.canonical_line().as_bytes(), signature) {
                return reject(event.id, "invalid signature");
            }
        }
        if !self.registry.knows_space(event.space_id) {
            return reject(event.id, "unknown space");
        }
        if !self.registry.knows_credential(event.credential_id) {
            return reject(event.id, "unknown credential");
        }

        if self.ledger.apply(CanonicalEntry::from(event)) {
            EventAck {
                event_id: event.id,
                status: AckStatus::Accepted,
                error: None,
            }
        } else {
            EventAck {
                event_id: event.id,
                status: AckStatus::Duplicate,
                error: None,
            }
        }
    }
}

fn reject(event_id: EventId, reason: &str) -> EventAck {
    tracing::warn!(%event_id, reason, "rejecting event");
    EventAck {
        event_id,
        status: AckStatus::Rejected,
        error: Some(reason.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gatewarden_core::BatchId;

    fn signer() -> EventSigner {
        EventSigner::new(b"shared-device-key")
    }

    fn wire_event(
        credential_id: CredentialId,
        space_id: SpaceId,
        outcome: EventOutcome,
        sign: bool,
    ) -> WireEvent {
        let mut event = WireEvent {
            id: EventId::new(),
            credential_id,
            space_id,
            timestamp_utc: Utc::now(),
            outcome,
            reason_code: "rule_matched".to_string(),
            mode: EvaluationMode::Offline,
            signature: None,
        };
        if sign {
            event.signature = Some(signer().sign(event.canonical_line().as_bytes()));
        }
        event
    }

    fn envelope(events: Vec<WireEvent>) -> BatchEnvelope {
        BatchEnvelope {
            batch_id: BatchId::new(),
            checksum: batch_checksum(&events),
            events,
        }
    }

    fn provisioned() -> (Reconciler, CredentialId, SpaceId) {
        let credential_id = CredentialId::new();
        let space_id = SpaceId::new();
        let registry = AuthorityRegistry::new();
        registry.register_credential(credential_id);
        registry.register_space(space_id);
        (
            Reconciler::with_signer(registry, signer()),
            credential_id,
            space_id,
        )
    }

    #[test]
    fn accepted_then_duplicate_on_resubmission() {
        let (reconciler, credential_id, space_id) = provisioned();
        let batch = envelope(vec![
            wire_event(credential_id, space_id, EventOutcome::Permit, true),
            wire_event(credential_id, space_id, EventOutcome::Deny, true),
        ]);

        let first = reconciler.reconcile(&batch).unwrap();
        assert!(first.results.iter().all(|r| r.status == AckStatus::Accepted));

        // Ack lost in transit; device resends the identical batch.
        let second = reconciler.reconcile(&batch).unwrap();
        assert!(second
            .results
            .iter()
            .all(|r| r.status == AckStatus::Duplicate));
        assert_eq!(reconciler.ledger().accepted_count(), 2);
    }

    #[test]
    fn checksum_mismatch_discards_the_batch() {
        let (reconciler, credential_id, space_id) = provisioned();
        let mut batch = envelope(vec![wire_event(
            credential_id,
            space_id,
            EventOutcome::Permit,
            true,
        )]);
        batch.checksum = "0".repeat(64);

        let err = reconciler.reconcile(&batch).unwrap_err();
        assert!(matches!(err, ReconcileError::ChecksumMismatch { .. }));
        assert_eq!(reconciler.ledger().accepted_count(), 0);
    }

    #[test]
    fn unknown_references_reject_per_event_not_per_batch() {
        let (reconciler, credential_id, space_id) = provisioned();
        let good = wire_event(credential_id, space_id, EventOutcome::Permit, true);
        let bad_space = wire_event(credential_id, SpaceId::new(), EventOutcome::Permit, true);
        let bad_credential = wire_event(CredentialId::new(), space_id, EventOutcome::Deny, true);
        let batch = envelope(vec![good.clone(), bad_space, bad_credential]);

        let ack = reconciler.reconcile(&batch).unwrap();
        assert_eq!(ack.results[0].status, AckStatus::Accepted);
        assert_eq!(ack.results[1].status, AckStatus::Rejected);
        assert_eq!(ack.results[1].error.as_deref(), Some("unknown space"));
        assert_eq!(ack.results[2].status, AckStatus::Rejected);
        assert_eq!(ack.results[2].error.as_deref(), Some("unknown credential"));
        assert_eq!(reconciler.ledger().accepted_count(), 1);
        assert!(reconciler.ledger().contains(good.id));
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let (reconciler, credential_id, space_id) = provisioned();
        let mut event = wire_event(credential_id, space_id, EventOutcome::Permit, true);
        // Tamper with the outcome after signing.
        event.outcome = EventOutcome::Deny;
        let batch = envelope(vec![event]);

        let ack = reconciler.reconcile(&batch).unwrap();
        assert_eq!(ack.results[0].status, AckStatus::Rejected);
        assert_eq!(ack.results[0].error.as_deref(), Some("invalid signature"));
    }

    #[test]
    fn unsigned_events_pass_when_signature_is_absent() {
        let (reconciler, credential_id, space_id) = provisioned();
        let batch = envelope(vec![wire_event(
            credential_id,
            space_id,
            EventOutcome::Permit,
            false,
        )]);
        let ack = reconciler.reconcile(&batch).unwrap();
        assert_eq!(ack.results[0].status, AckStatus::Accepted);
    }

    #[test]
    fn canonical_order_puts_deny_ahead_of_permit_on_a_timestamp_tie() {
        let (reconciler, credential_id, space_id) = provisioned();
        let at = Utc::now();

        let mut permit = wire_event(credential_id, space_id, EventOutcome::Permit, false);
        permit.timestamp_utc = at;
        let mut deny = wire_event(credential_id, space_id, EventOutcome::Deny, false);
        deny.timestamp_utc = at;

        // Permit arrives first, in its own batch.
        reconciler.reconcile(&envelope(vec![permit.clone()])).unwrap();
        reconciler.reconcile(&envelope(vec![deny.clone()])).unwrap();

        let history = reconciler.ledger().history(credential_id);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, deny.id);
        assert_eq!(history[1].id, permit.id);
    }

    #[test]
    fn histories_are_kept_per_credential() {
        let (reconciler, credential_id, space_id) = provisioned();
        let other = CredentialId::new();
        reconciler.registry().register_credential(other);

        let batch = envelope(vec![
            wire_event(credential_id, space_id, EventOutcome::Permit, true),
            wire_event(other, space_id, EventOutcome::Deny, true),
        ]);
        reconciler.reconcile(&batch).unwrap();

        assert_eq!(reconciler.ledger().history(credential_id).len(), 1);
        assert_eq!(reconciler.ledger().history(other).len(), 1);
    }
}
