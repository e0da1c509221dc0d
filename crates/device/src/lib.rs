//! `gatewarden-device`: device-side composition.
//!
//! Wires the cached snapshots, the evaluator, and the ledger into one access
//! controller, and keeps the snapshots fresh through the provisioning
//! collaborator. The decision path works identically online and offline; the
//! connectivity flag only stamps the evaluation mode on ledger entries and
//! gates the background sync worker.

pub mod controller;
pub mod provisioning;

pub use controller::{AccessController, AccessError, AccessResponse, EventNotice};
pub use provisioning::{
    ProvisionedCredential, ProvisionedRuleSet, ProvisioningClient, ProvisioningError,
    SnapshotRefresher,
};

pub use gatewarden_sync::ConnectivityStatus;
