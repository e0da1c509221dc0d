//! Wire contract between device and authority.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gatewarden_core::{BatchId, CredentialId, EventId, SpaceId};
use gatewarden_ledger::{AccessEvent, EvaluationMode, EventOutcome};

/// One event as transmitted to the authority. The human-readable reason text
/// stays on the device; the wire carries the machine reason code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEvent {
    pub id: EventId,
    pub credential_id: CredentialId,
    pub space_id: SpaceId,
    pub timestamp_utc: DateTime<Utc>,
    pub outcome: EventOutcome,
    pub reason_code: String,
    pub mode: EvaluationMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl From<&AccessEvent> for WireEvent {
    fn from(event: &AccessEvent) -> Self {
        Self {
            id: event.id,
            credential_id: event.credential_id,
            space_id: event.space_id,
            timestamp_utc: event.occurred_at,
            outcome: event.outcome,
            reason_code: event.reason_code.clone(),
            mode: event.mode,
            signature: event.signature.clone(),
        }
    }
}

impl WireEvent {
    /// The canonical line this event contributes to the batch checksum, and
    /// the byte string its signature covers. Must match
    /// `AccessEvent::canonical_bytes` on the device side.
    pub fn canonical_line(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}",
            self.id,
            self.credential_id,
            self.space_id,
            self.timestamp_utc.to_rfc3339(),
            self.outcome.as_str(),
            self.reason_code,
            self.mode.as_str(),
        )
    }
}

/// A batch in flight: `{batchId, checksum, events: [...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEnvelope {
    pub batch_id: BatchId,
    pub checksum: String,
    pub events: Vec<WireEvent>,
}

/// Authority's verdict for one event.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckStatus {
    Accepted,
    /// Already accepted under the same id; a no-op, safe to mark synced.
    Duplicate,
    /// Permanently rejected (e.g. unknown space); never retried.
    Rejected,
}

/// Per-event acknowledgment; one per event in the batch, so the device can
/// mark individual events synced even when others are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventAck {
    pub event_id: EventId,
    pub status: AckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Authority response: `{batchId, checksum, results: [...]}`. The checksum is
/// echoed so the device can detect transport corruption before marking
/// anything synced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchAck {
    pub batch_id: BatchId,
    pub checksum: String,
    pub results: Vec<EventAck>,
}
