//! `gatewarden-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod version;

pub use error::{DomainError, DomainResult};
pub use id::{BatchId, CredentialId, DeviceId, EventId, HolderId, RuleId, SpaceId};
pub use version::{ExpectedVersion, SnapshotVersion};
