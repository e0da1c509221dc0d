//! Background worker for periodic batch synchronization.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::connectivity::ConnectivityStatus;
use crate::manager::{FlushOutcome, SyncBatchManager, SyncError};
use crate::transport::BatchTransport;

use gatewarden_ledger::EventLedger;

/// Background sync worker that periodically drains the unsynced backlog.
///
/// Each tick probes connectivity, updates the shared [`ConnectivityStatus`]
/// flag, and flushes batches until the backlog is empty or a backoff window
/// opens. Shutdown cancels an in-flight transmission; the cancelled batch
/// stays pending and is retransmitted after restart.
pub struct SyncWorker<L, T> {
    manager: Arc<SyncBatchManager<L, T>>,
    connectivity: Arc<ConnectivityStatus>,
    interval: Duration,
    shutdown: Arc<Notify>,
}

impl<L, T> SyncWorker<L, T>
where
    L: EventLedger + 'static,
    T: BatchTransport + 'static,
{
    pub fn new(
        manager: Arc<SyncBatchManager<L, T>>,
        connectivity: Arc<ConnectivityStatus>,
        interval: Duration,
    ) -> Self {
        Self {
            manager,
            connectivity,
            interval,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Handle for requesting shutdown from outside the worker task.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Spawn the worker task.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        let manager = self.manager;
        let connectivity = self.connectivity;
        let shutdown = self.shutdown;
        let period = self.interval;

        tokio::spawn(async move {
            tracing::info!(interval_ms = period.as_millis() as u64, "sync worker started");

            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            let mut consecutive_failures = 0u32;

            'run: loop {
                tokio::select! {
                    _ = shutdown.notified() => {
                        tracing::info!("sync worker received shutdown signal");
                        break;
                    }
                    _ = tick.tick() => {
                        let online = manager.check_connectivity().await;
                        connectivity.set_online(online);
                        if !online {
                            tracing::debug!(
                                backlog = manager.backlog(),
                                "skipping sync, authority unreachable"
                            );
                            continue;
                        }

                        // Drain the backlog one batch at a time until idle or
                        // a backoff window opens.
                        loop {
                            match manager.flush_with_cancel(&shutdown).await {
                                Ok(FlushOutcome::Idle) => break,
                                Ok(FlushOutcome::Deferred(batch)) => {
                                    tracing::debug!(
                                        batch_id = %batch.id,
                                        next_attempt_at = ?batch.next_attempt_at,
                                        "batch deferred until backoff elapses"
                                    );
                                    break;
                                }
                                Ok(FlushOutcome::Synced(_)) => {
                                    consecutive_failures = 0;
                                }
                                Err(SyncError::Cancelled) => {
                                    tracing::info!("sync worker shutting down mid-flush");
                                    break 'run;
                                }
                                Err(e) => {
                                    consecutive_failures += 1;
                                    tracing::warn!(
                                        error = %e,
                                        consecutive_failures,
                                        backlog = manager.backlog(),
                                        "sync flush failed"
                                    );
                                    if matches!(e, SyncError::Transport(_)) {
                                        connectivity.set_online(false);
                                    }
                                    break;
                                }
                            }
                        }
                    }
                }
            }

            tracing::info!(backlog = manager.backlog(), "sync worker stopped");
        })
    }
}
