//! Monotonic snapshot versions for optimistic concurrency.
//!
//! Snapshot refreshes from the provisioning service are applied with a
//! compare-and-swap on this counter: the writer states which version it read,
//! and the swap is rejected if the snapshot moved underneath it.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Monotonically increasing version of a cached snapshot.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotVersion(u64);

impl SnapshotVersion {
    /// Version of a snapshot that has never been written.
    pub const INITIAL: SnapshotVersion = SnapshotVersion(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    /// The version a successful swap advances to.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// Optimistic concurrency expectation for a snapshot update.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (first load, forced refresh).
    Any,
    /// Require the snapshot to be at an exact version.
    Exact(SnapshotVersion),
}

impl ExpectedVersion {
    pub fn matches(self, actual: SnapshotVersion) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: SnapshotVersion) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual:?})"
            )))
        }
    }
}
