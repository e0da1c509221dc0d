//! Sync Batch Manager.
//!
//! Owns at most one batch in flight at a time. A batch keeps its identity,
//! member events and checksum across retries, so a resend after a lost ack
//! is safe: the authority deduplicates by event id, not by batch id.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};

use gatewarden_ledger::{EventLedger, LedgerError};

use crate::batch::{RetryPolicy, SyncBatch};
use crate::checksum::batch_checksum;
use crate::transport::{BatchTransport, TransportError};
use crate::wire::{AckStatus, BatchEnvelope, WireEvent};

/// Explicit sync configuration. Both fields are deployment choices; there is
/// no `Default`.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Upper bound on events per batch.
    pub max_batch_size: usize,
    pub retry_policy: RetryPolicy,
}

impl SyncConfig {
    pub fn new(max_batch_size: usize, retry_policy: RetryPolicy) -> Self {
        Self {
            max_batch_size,
            retry_policy,
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("checksum mismatch: computed {ours}, authority returned {theirs}")]
    Integrity { ours: String, theirs: String },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("sync cancelled while in flight")]
    Cancelled,

    /// Retry ceiling reached; persistent error requiring operator attention.
    #[error("sync batch exhausted after {attempts} attempts: {error}")]
    RetryExhausted { attempts: u32, error: String },
}

/// What one `flush` call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// No unsynced events and no batch awaiting retry.
    Idle,
    /// A failed batch exists but its backoff window is still open; nothing
    /// was transmitted.
    Deferred(SyncBatch),
    /// The batch was acknowledged and its member events marked synced.
    Synced(SyncBatch),
}

pub struct SyncBatchManager<L, T> {
    ledger: Arc<L>,
    transport: T,
    config: SyncConfig,
    /// The one batch this device currently owns: pending retry or in flight.
    in_flight: Mutex<Option<(SyncBatch, BatchEnvelope)>>,
}

impl<L, T> SyncBatchManager<L, T>
where
    L: EventLedger,
    T: BatchTransport,
{
    pub fn new(ledger: Arc<L>, transport: T, config: SyncConfig) -> Self {
        Self {
            ledger,
            transport,
            config,
            in_flight: Mutex::new(None),
        }
    }

    /// Unsynced backlog, for observability. Reads the maintained counter;
    /// never queries storage, never blocks the append path.
    pub fn backlog(&self) -> u64 {
        self.ledger.unsynced_count()
    }

    pub async fn check_connectivity(&self) -> bool {
        self.transport.check_connectivity().await
    }

    /// Flush without external cancellation.
    pub async fn flush(&self) -> Result<FlushOutcome, SyncError> {
        let never = Notify::new();
        self.flush_with_cancel(&never).await
    }

    /// Build (or resume) a batch of unsynced events and transmit it.
    ///
    /// If `cancel` fires while the transmission is in flight, the batch is
    /// left `Pending` for retry; it is never partially acknowledged.
    pub async fn flush_with_cancel(&self, cancel: &Notify) -> Result<FlushOutcome, SyncError> {
        let now = Utc::now();
        let policy = &self.config.retry_policy;
        let mut slot = self.in_flight.lock().await;

        let (mut batch, envelope) = match slot.take() {
            Some((batch, envelope)) => {
                if batch.is_exhausted(policy) {
                    let err = SyncError::RetryExhausted {
                        attempts: batch.attempts,
                        error: batch.error.clone().unwrap_or_default(),
                    };
                    tracing::error!(
                        batch_id = %batch.id,
                        attempts = batch.attempts,
                        backlog = self.backlog(),
                        "sync batch exhausted its retry ceiling; operator attention required"
                    );
                    *slot = Some((batch, envelope));
                    return Err(err);
                }
                if batch.backoff_pending(now) {
                    let snapshot = batch.clone();
                    *slot = Some((batch, envelope));
                    return Ok(FlushOutcome::Deferred(snapshot));
                }
                let mut batch = batch;
                batch.mark_pending();
                (batch, envelope)
            }
            None => {
                let events = self.ledger.list_unsynced(self.config.max_batch_size).await?;
                if events.is_empty() {
                    return Ok(FlushOutcome::Idle);
                }
                let wire: Vec<WireEvent> = events.iter().map(WireEvent::from).collect();
                let checksum = batch_checksum(&wire);
                let batch = SyncBatch::new(
                    events.iter().map(|e| e.id).collect(),
                    checksum.clone(),
                    now,
                );
                let envelope = BatchEnvelope {
                    batch_id: batch.id,
                    checksum,
                    events: wire,
                };
                (batch, envelope)
            }
        };

        batch.mark_sent();
        self.ledger.record_sync_attempt(&batch.event_ids).await?;
        tracing::info!(
            batch_id = %batch.id,
            events = batch.item_count(),
            attempt = batch.attempts,
            "transmitting sync batch"
        );

        let send_result = tokio::select! {
            res = self.transport.send(&envelope) => Some(res),
            _ = cancel.notified() => None,
        };

        let Some(send_result) = send_result else {
            batch.mark_cancelled();
            tracing::warn!(batch_id = %batch.id, "sync cancelled in flight; batch left pending");
            *slot = Some((batch, envelope));
            return Err(SyncError::Cancelled);
        };

        let ack = match send_result {
            Ok(ack) => ack,
            Err(e) => {
                return self.fail(&mut slot, batch, envelope, SyncError::from(e));
            }
        };

        if ack.checksum != batch.checksum {
            let err = SyncError::Integrity {
                ours: batch.checksum.clone(),
                theirs: ack.checksum,
            };
            return self.fail(&mut slot, batch, envelope, err);
        }

        let mut synced = Vec::with_capacity(ack.results.len());
        for result in &ack.results {
            match result.status {
                AckStatus::Accepted | AckStatus::Duplicate => synced.push(result.event_id),
                AckStatus::Rejected => {
                    let detail = result.error.as_deref().unwrap_or("rejected by authority");
                    tracing::warn!(
                        event_id = %result.event_id,
                        error = detail,
                        "authority rejected event; recording terminal rejection"
                    );
                    self.ledger.mark_rejected(result.event_id, detail).await?;
                }
            }
        }
        self.ledger.mark_synced(&synced).await?;

        batch.mark_acked();
        tracing::info!(
            batch_id = %batch.id,
            synced = synced.len(),
            backlog = self.backlog(),
            "sync batch acknowledged"
        );
        Ok(FlushOutcome::Synced(batch))
    }

    /// Clear a terminally failed batch after operator intervention, resetting
    /// its attempt count so the next flush retransmits it.
    pub async fn reset_exhausted(&self) -> Option<SyncBatch> {
        let mut slot = self.in_flight.lock().await;
        let (batch, _) = slot.as_mut()?;
        if !batch.is_exhausted(&self.config.retry_policy) {
            return None;
        }
        batch.attempts = 0;
        batch.error = None;
        batch.mark_pending();
        Some(batch.clone())
    }

    fn fail(
        &self,
        slot: &mut Option<(SyncBatch, BatchEnvelope)>,
        mut batch: SyncBatch,
        envelope: BatchEnvelope,
        err: SyncError,
    ) -> Result<FlushOutcome, SyncError> {
        batch.mark_failed(err.to_string(), &self.config.retry_policy, Utc::now());
        let exhausted = batch.is_exhausted(&self.config.retry_policy);
        tracing::warn!(
            batch_id = %batch.id,
            attempts = batch.attempts,
            exhausted,
            error = %err,
            "sync batch transmission failed"
        );
        let attempts = batch.attempts;
        let detail = batch.error.clone().unwrap_or_default();
        *slot = Some((batch, envelope));
        if exhausted {
            Err(SyncError::RetryExhausted {
                attempts,
                error: detail,
            })
        } else {
            Err(err)
        }
    }
}
