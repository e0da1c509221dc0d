//! `gatewarden-sync`: offline synchronization manager.
//!
//! Groups unsynced ledger entries into checksummed batches, transmits them to
//! the authority, verifies the echoed checksum, applies per-event
//! acknowledgments, and retries with bounded exponential backoff.
//! Transmission runs as a background task independent of the evaluation
//! path: a slow or broken network never stalls door decisions, and a burst
//! of access events never stalls sync.

pub mod batch;
pub mod checksum;
pub mod connectivity;
pub mod manager;
pub mod transport;
pub mod wire;
pub mod worker;

pub use batch::{BackoffStrategy, BatchStatus, RetryPolicy, SyncBatch};
pub use checksum::batch_checksum;
pub use connectivity::ConnectivityStatus;
pub use manager::{FlushOutcome, SyncBatchManager, SyncConfig, SyncError};
pub use transport::{BatchTransport, HttpTransport, TransportError};
pub use wire::{AckStatus, BatchAck, BatchEnvelope, EventAck, WireEvent};
pub use worker::SyncWorker;
