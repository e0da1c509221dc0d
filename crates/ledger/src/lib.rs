//! `gatewarden-ledger`: the device-local, append-only access event ledger.
//!
//! One immutable record per evaluation, online or offline. Durability is the
//! contract: `append` does not return until the event would survive a crash,
//! and a durability failure fails the whole evaluation; a device must never
//! report a decision it cannot later prove it made.

pub mod backlog;
pub mod event;
pub mod memory;
pub mod signer;
pub mod sqlite;
pub mod store;

pub use backlog::BacklogCounter;
pub use event::{AccessEvent, EvaluationMode, EventOutcome, EventRecord, SyncState};
pub use memory::InMemoryLedger;
pub use signer::EventSigner;
pub use sqlite::SqliteLedger;
pub use store::{EventLedger, LedgerError};
