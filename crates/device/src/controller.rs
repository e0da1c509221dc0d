//! Device access controller.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};

use gatewarden_core::{CredentialId, DeviceId, DomainError, EventId, SpaceId};
use gatewarden_ledger::{EventLedger, EventOutcome, EventRecord, LedgerError};
use gatewarden_policy::evaluator::{
    evaluate, resolve_biometric, BiometricConfirmation, Decision, EvaluationConfig,
    EvaluationError, Outcome,
};
use gatewarden_policy::snapshot::{CredentialTracker, RuleStore};
use gatewarden_sync::ConnectivityStatus;

/// Access decision failure.
///
/// Ledger failure is escalated, never swallowed: the controller must not
/// report a decision it cannot later prove it made.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Snapshot resolution failed, e.g. the credential was never provisioned
    /// to this device.
    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Fire-and-forget "event appended" signal for external consumers.
/// Delivery is best-effort; a lagging or absent receiver never fails the
/// decision path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventNotice {
    pub event_id: EventId,
    pub credential_id: CredentialId,
    pub space_id: SpaceId,
    pub outcome: EventOutcome,
    pub occurred_at: DateTime<Utc>,
}

/// Outcome of one access request.
#[derive(Debug, Clone)]
pub enum AccessResponse {
    /// Final decision, already appended to the ledger.
    Decided {
        decision: Decision,
        event: gatewarden_ledger::AccessEvent,
    },
    /// Provisional permit awaiting biometric confirmation. Nothing is
    /// appended until [`AccessController::confirm_biometric`] resolves it.
    PendingBiometric { decision: Decision },
}

/// One physical access point: evaluates requests against the cached
/// snapshots and appends exactly one ledger record per final decision.
pub struct AccessController<L> {
    device_id: DeviceId,
    rules: Arc<RuleStore>,
    credentials: Arc<CredentialTracker>,
    ledger: Arc<L>,
    config: EvaluationConfig,
    connectivity: Arc<ConnectivityStatus>,
    notifier: broadcast::Sender<EventNotice>,
    /// Serializes appends so the ledger keeps creation-time order even when
    /// requests overlap.
    append_lock: Mutex<()>,
}

impl<L: EventLedger> AccessController<L> {
    pub fn new(
        device_id: DeviceId,
        rules: Arc<RuleStore>,
        credentials: Arc<CredentialTracker>,
        ledger: Arc<L>,
        config: EvaluationConfig,
        connectivity: Arc<ConnectivityStatus>,
    ) -> Self {
        let (notifier, _) = broadcast::channel(64);
        Self {
            device_id,
            rules,
            credentials,
            ledger,
            config,
            connectivity,
            notifier,
            append_lock: Mutex::new(()),
        }
    }

    /// Subscribe to appended-event notices.
    pub fn subscribe(&self) -> broadcast::Receiver<EventNotice> {
        self.notifier.subscribe()
    }

    /// Evaluate an access request and, for final decisions, append the event.
    ///
    /// A space with no provisioned rule set evaluates against an empty
    /// candidate list, so the configured default policy decides.
    pub async fn request_access(
        &self,
        credential_id: CredentialId,
        space_id: SpaceId,
        now: DateTime<Utc>,
    ) -> Result<AccessResponse, AccessError> {
        let snapshot = self.credentials.resolve(credential_id)?;
        let (candidates, rules_fetched_at) = match self.rules.candidates(space_id) {
            Some((rules, fetched_at)) => (rules, Some(fetched_at)),
            None => (Vec::new(), None),
        };

        let decision = evaluate(
            &snapshot,
            space_id,
            now,
            &candidates,
            rules_fetched_at,
            &self.config,
        )?;

        if decision.outcome == Outcome::PermitPendingBiometric {
            tracing::info!(
                device_id = %self.device_id,
                %credential_id,
                %space_id,
                deadline = ?decision.biometric_deadline,
                "access provisionally permitted pending biometric"
            );
            return Ok(AccessResponse::PendingBiometric { decision });
        }

        let event = self
            .append_decision(credential_id, space_id, now, &decision)
            .await?;
        Ok(AccessResponse::Decided { decision, event })
    }

    /// Resolve a provisional permit with the biometric confirmation and
    /// append the final event.
    pub async fn confirm_biometric(
        &self,
        credential_id: CredentialId,
        space_id: SpaceId,
        pending: Decision,
        confirmation: BiometricConfirmation,
    ) -> Result<(Decision, gatewarden_ledger::AccessEvent), AccessError> {
        let decision = resolve_biometric(pending, confirmation);
        let event = self
            .append_decision(credential_id, space_id, confirmation.at, &decision)
            .await?;
        Ok((decision, event))
    }

    async fn append_decision(
        &self,
        credential_id: CredentialId,
        space_id: SpaceId,
        occurred_at: DateTime<Utc>,
        decision: &Decision,
    ) -> Result<gatewarden_ledger::AccessEvent, AccessError> {
        let outcome = match decision.outcome {
            Outcome::Permit => EventOutcome::Permit,
            Outcome::Deny => EventOutcome::Deny,
            Outcome::PermitPendingBiometric => {
                // Provisional outcomes are resolved before appending.
                return Err(AccessError::Domain(DomainError::invariant(
                    "cannot append a provisional decision",
                )));
            }
        };

        let record = EventRecord {
            credential_id,
            space_id,
            occurred_at,
            outcome,
            reason_code: decision.reason_code.clone(),
            reason: decision.reason.clone(),
            mode: self.connectivity.mode(),
        };

        let event = {
            let _guard = self.append_lock.lock().await;
            self.ledger.append(record).await?
        };

        tracing::info!(
            device_id = %self.device_id,
            event_id = %event.id,
            %credential_id,
            %space_id,
            outcome = outcome.as_str(),
            reason_code = %decision.reason_code,
            mode = event.mode.as_str(),
            backlog = self.ledger.unsynced_count(),
            "access decision recorded"
        );

        // Best-effort: no receiver or a lagging receiver never fails the
        // decision path.
        let _ = self.notifier.send(EventNotice {
            event_id: event.id,
            credential_id,
            space_id,
            outcome,
            occurred_at,
        });

        Ok(event)
    }
}
