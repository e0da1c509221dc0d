//! Ledger entry model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gatewarden_core::{CredentialId, DomainError, EventId, SpaceId};

use crate::signer::EventSigner;

/// Final outcome recorded in the ledger. Provisional biometric outcomes are
/// resolved before anything is appended.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOutcome {
    Permit,
    Deny,
}

impl EventOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventOutcome::Permit => "Permit",
            EventOutcome::Deny => "Deny",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "Permit" => Ok(EventOutcome::Permit),
            "Deny" => Ok(EventOutcome::Deny),
            other => Err(DomainError::validation(format!(
                "unknown event outcome '{other}'"
            ))),
        }
    }
}

/// Whether the device had connectivity when it evaluated.
///
/// A mode flag, not a separate code path: same evaluator, same ledger; only
/// the sync manager's transmission timing differs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationMode {
    Online,
    Offline,
}

impl EvaluationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationMode::Online => "Online",
            EvaluationMode::Offline => "Offline",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "Online" => Ok(EvaluationMode::Online),
            "Offline" => Ok(EvaluationMode::Offline),
            other => Err(DomainError::validation(format!(
                "unknown evaluation mode '{other}'"
            ))),
        }
    }
}

/// Synchronization state of a ledger entry. The only mutable part of an
/// event post-append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "state", content = "detail")]
pub enum SyncState {
    Unsynced,
    Synced,
    /// The authority rejected this event permanently (e.g. unknown space);
    /// it is never retried.
    Rejected(String),
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Unsynced => "Unsynced",
            SyncState::Synced => "Synced",
            SyncState::Rejected(_) => "Rejected",
        }
    }
}

/// Input to `EventLedger::append`: everything about the decision except the
/// identity and signature, which the ledger assigns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub credential_id: CredentialId,
    pub space_id: SpaceId,
    pub occurred_at: DateTime<Utc>,
    pub outcome: EventOutcome,
    pub reason_code: String,
    /// Human-readable reason, kept locally for audit; not part of the wire
    /// contract or the signature.
    pub reason: String,
    pub mode: EvaluationMode,
}

/// An immutable ledger record of one decision.
///
/// Identity, outcome, timestamp and mode never change after append; only the
/// sync state and attempt metadata may.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessEvent {
    pub id: EventId,
    pub credential_id: CredentialId,
    pub space_id: SpaceId,
    pub occurred_at: DateTime<Utc>,
    pub outcome: EventOutcome,
    pub reason_code: String,
    pub reason: String,
    pub mode: EvaluationMode,
    /// HMAC-SHA256 over the immutable fields, hex-encoded, when the device
    /// has a provisioned signing key.
    pub signature: Option<String>,
    pub sync_state: SyncState,
    pub sync_attempts: u32,
    pub synced_at: Option<DateTime<Utc>>,
}

impl AccessEvent {
    /// Materialize a record into an event: assign the globally unique id
    /// (generated at decision time, so retries never create duplicates) and
    /// sign the immutable fields.
    pub fn from_record(record: EventRecord, signer: Option<&EventSigner>) -> Self {
        let mut event = Self {
            id: EventId::new(),
            credential_id: record.credential_id,
            space_id: record.space_id,
            occurred_at: record.occurred_at,
            outcome: record.outcome,
            reason_code: record.reason_code,
            reason: record.reason,
            mode: record.mode,
            signature: None,
            sync_state: SyncState::Unsynced,
            sync_attempts: 0,
            synced_at: None,
        };
        event.signature = signer.map(|s| s.sign(&event.canonical_bytes()));
        event
    }

    /// Canonical rendering of the immutable fields, used for the signature.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        format!(
            "{}|{}|{}|{}|{}|{}|{}",
            self.id,
            self.credential_id,
            self.space_id,
            self.occurred_at.to_rfc3339(),
            self.outcome.as_str(),
            self.reason_code,
            self.mode.as_str(),
        )
        .into_bytes()
    }

    /// Verify the signature against a key, when both are present.
    pub fn verify_signature(&self, signer: &EventSigner) -> bool {
        match &self.signature {
            Some(sig) => signer.verify(&self.canonical_bytes(), sig),
            None => false,
        }
    }
}
