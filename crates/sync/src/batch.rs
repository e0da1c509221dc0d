//! Sync batch state machine and retry policy.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gatewarden_core::{BatchId, EventId};

/// Batch status: `Pending → Sent → {Acked | Failed}`; a failed batch returns
/// to `Pending` after backoff, up to the retry ceiling, after which it stays
/// `Failed` with an operator-visible error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Sent,
    Acked,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "Pending",
            BatchStatus::Sent => "Sent",
            BatchStatus::Acked => "Acked",
            BatchStatus::Failed => "Failed",
        }
    }
}

/// Backoff strategy for batch retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^attempt
    Exponential,
    /// Linear backoff: base * attempt
    Linear,
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential
    }
}

/// Retry policy configuration.
///
/// The ceiling and schedule are explicit configuration points; there is no
/// guessed default schedule, only named constructors a deployment chooses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of transmission attempts (not counting the first).
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Backoff strategy
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0) to spread retries
    pub jitter: f64,
}

impl RetryPolicy {
    /// No retries: a single failed transmission is terminal.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    /// Fixed delays between attempts.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    /// Exponential backoff with a delay cap.
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    /// Calculate delay for a given attempt number (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => {
                let exp = 2_f64.powi((attempt - 1) as i32);
                (base_ms * exp).min(max_ms)
            }
            BackoffStrategy::Linear => {
                let linear = base_ms * (attempt as f64);
                linear.min(max_ms)
            }
        };

        // Deterministic jitter keyed off the attempt number: reproducible in
        // tests, still spreads concurrent devices.
        let jitter_range = delay_ms * self.jitter;
        let jitter = if jitter_range > 0.0 {
            let pseudo_random = ((attempt as f64 * 17.0) % 100.0) / 100.0;
            jitter_range * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }

    /// Whether another attempt is allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }
}

/// A bundle of unsynced events transmitted together.
///
/// Owned by the device that created it until acknowledged; the authority
/// never mutates a batch, it only records acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncBatch {
    pub id: BatchId,
    /// Member events, in creation-time order.
    pub event_ids: Vec<EventId>,
    /// Checksum over the canonical serialization of the batch.
    pub checksum: String,
    pub status: BatchStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Transmission attempts so far.
    pub attempts: u32,
    /// Earliest instant the next retry may run, when status is `Failed` and
    /// the ceiling has not been reached.
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl SyncBatch {
    pub fn new(event_ids: Vec<EventId>, checksum: String, created_at: DateTime<Utc>) -> Self {
        Self {
            id: BatchId::new(),
            event_ids,
            checksum,
            status: BatchStatus::Pending,
            error: None,
            created_at,
            attempts: 0,
            next_attempt_at: None,
        }
    }

    pub fn item_count(&self) -> usize {
        self.event_ids.len()
    }

    /// Record the start of one transmission attempt.
    pub fn mark_sent(&mut self) {
        self.status = BatchStatus::Sent;
        self.attempts += 1;
    }

    pub fn mark_acked(&mut self) {
        self.status = BatchStatus::Acked;
        self.error = None;
        self.next_attempt_at = None;
    }

    /// Record a failed attempt: schedules a retry when the ceiling allows,
    /// otherwise leaves the batch terminally failed.
    pub fn mark_failed(&mut self, error: impl Into<String>, policy: &RetryPolicy, now: DateTime<Utc>) {
        self.status = BatchStatus::Failed;
        self.error = Some(error.into());
        self.next_attempt_at = if policy.should_retry(self.attempts) {
            let delay = policy.delay_for_attempt(self.attempts);
            Some(now + chrono::Duration::from_std(delay).unwrap_or_default())
        } else {
            None
        };
    }

    /// A cancelled in-flight transmission leaves the batch pending, never
    /// partially acknowledged.
    pub fn mark_cancelled(&mut self) {
        self.status = BatchStatus::Pending;
        self.next_attempt_at = None;
    }

    /// Return a failed batch to pending for its next attempt.
    pub fn mark_pending(&mut self) {
        self.status = BatchStatus::Pending;
    }

    /// Terminal failure: retry ceiling reached. Requires operator attention.
    pub fn is_exhausted(&self, policy: &RetryPolicy) -> bool {
        self.status == BatchStatus::Failed && !policy.should_retry(self.attempts)
    }

    /// Whether the backoff window for the next retry is still open.
    pub fn backoff_pending(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at.is_some_and(|at| now < at)
    }
}
