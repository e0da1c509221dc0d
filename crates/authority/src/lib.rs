//! `gatewarden-authority`: server-side batch reconciliation.
//!
//! Receives sync batches from devices, verifies batch integrity and event
//! signatures, validates references against the authoritative registry,
//! deduplicates by event id, and applies accepted events to the canonical
//! ledger. Returns one acknowledgment per event so a device can mark
//! individual events synced even when others in the same batch are rejected.

pub mod loopback;
pub mod reconciler;

pub use loopback::LoopbackTransport;
pub use reconciler::{AuthorityRegistry, CanonicalEntry, CanonicalLedger, ReconcileError, Reconciler};
