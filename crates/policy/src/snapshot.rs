//! Local read-model snapshots of rules and credential state.
//!
//! These are read-only value snapshots with an explicit staleness timestamp,
//! refreshed by the provisioning collaborator. They are never live references
//! into a shared mutable graph; a device consults whatever it last cached and
//! the evaluator decides what staleness means.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use gatewarden_core::{
    CredentialId, DomainError, DomainResult, ExpectedVersion, SnapshotVersion, SpaceId,
};

use crate::credential::Credential;
use crate::rule::Rule;

/// A locally cached credential with its refresh metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSnapshot {
    pub credential: Credential,
    /// When the provisioning service last refreshed this snapshot.
    pub fetched_at: DateTime<Utc>,
    pub version: SnapshotVersion,
}

impl CredentialSnapshot {
    pub fn new(credential: Credential, fetched_at: DateTime<Utc>) -> Self {
        Self {
            credential,
            fetched_at,
            version: SnapshotVersion::INITIAL.next(),
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.fetched_at
    }

    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.age(now) > max_age
    }
}

/// The rule set cached for one space, as pushed by provisioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSetSnapshot {
    pub space_id: SpaceId,
    pub rules: Vec<Rule>,
    pub fetched_at: DateTime<Utc>,
    pub version: SnapshotVersion,
}

/// Device-local store of per-space rule sets; a pure read model for the
/// evaluator.
#[derive(Debug, Default)]
pub struct RuleStore {
    by_space: RwLock<HashMap<SpaceId, RuleSetSnapshot>>,
}

impl RuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Candidate rules for a space, with the snapshot's staleness timestamp.
    ///
    /// Returns `None` when no rule set was ever provisioned for the space.
    pub fn candidates(&self, space_id: SpaceId) -> Option<(Vec<Rule>, DateTime<Utc>)> {
        let by_space = self.by_space.read().unwrap_or_else(|e| e.into_inner());
        by_space
            .get(&space_id)
            .map(|set| (set.rules.clone(), set.fetched_at))
    }

    pub fn version_of(&self, space_id: SpaceId) -> SnapshotVersion {
        let by_space = self.by_space.read().unwrap_or_else(|e| e.into_inner());
        by_space
            .get(&space_id)
            .map(|set| set.version)
            .unwrap_or(SnapshotVersion::INITIAL)
    }

    /// Replace the rule set for a space under an optimistic concurrency check.
    pub fn replace(
        &self,
        space_id: SpaceId,
        rules: Vec<Rule>,
        fetched_at: DateTime<Utc>,
        expected: ExpectedVersion,
    ) -> DomainResult<SnapshotVersion> {
        let mut by_space = self.by_space.write().unwrap_or_else(|e| e.into_inner());
        let current = by_space
            .get(&space_id)
            .map(|set| set.version)
            .unwrap_or(SnapshotVersion::INITIAL);
        expected.check(current)?;

        let next = current.next();
        by_space.insert(
            space_id,
            RuleSetSnapshot {
                space_id,
                rules,
                fetched_at,
                version: next,
            },
        );
        Ok(next)
    }
}

/// Device-local tracker of credential snapshots, keyed by credential id.
#[derive(Debug, Default)]
pub struct CredentialTracker {
    by_id: RwLock<HashMap<CredentialId, CredentialSnapshot>>,
}

impl CredentialTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: CredentialId) -> Option<CredentialSnapshot> {
        let by_id = self.by_id.read().unwrap_or_else(|e| e.into_inner());
        by_id.get(&id).cloned()
    }

    pub fn version_of(&self, id: CredentialId) -> SnapshotVersion {
        let by_id = self.by_id.read().unwrap_or_else(|e| e.into_inner());
        by_id
            .get(&id)
            .map(|s| s.version)
            .unwrap_or(SnapshotVersion::INITIAL)
    }

    /// Upsert a credential snapshot under an optimistic concurrency check.
    pub fn upsert(
        &self,
        credential: Credential,
        fetched_at: DateTime<Utc>,
        expected: ExpectedVersion,
    ) -> DomainResult<SnapshotVersion> {
        let mut by_id = self.by_id.write().unwrap_or_else(|e| e.into_inner());
        let id = credential.id;
        let current = by_id
            .get(&id)
            .map(|s| s.version)
            .unwrap_or(SnapshotVersion::INITIAL);
        expected.check(current)?;

        let next = current.next();
        by_id.insert(
            id,
            CredentialSnapshot {
                credential,
                fetched_at,
                version: next,
            },
        );
        Ok(next)
    }

    /// Resolve a snapshot, failing with `NotFound` when the credential was
    /// never provisioned to this device.
    pub fn resolve(&self, id: CredentialId) -> DomainResult<CredentialSnapshot> {
        self.get(id).ok_or(DomainError::NotFound)
    }
}
