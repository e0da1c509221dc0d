//! Provisioning collaborator seam and snapshot refresh.
//!
//! The provisioning service is the authoritative source of rule sets and
//! credential state; devices pull snapshots and cache them locally. A refresh
//! applies under a compare-and-swap on the snapshot version so a concurrent
//! push and pull never interleave half-applied.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use gatewarden_core::{CredentialId, DomainError, ExpectedVersion, SnapshotVersion, SpaceId};
use gatewarden_policy::credential::Credential;
use gatewarden_policy::rule::Rule;
use gatewarden_policy::snapshot::{CredentialTracker, RuleStore};

/// A rule set as served by provisioning, with its staleness timestamp.
#[derive(Debug, Clone)]
pub struct ProvisionedRuleSet {
    pub space_id: SpaceId,
    pub rules: Vec<Rule>,
    pub fetched_at: DateTime<Utc>,
}

/// A credential snapshot as served by provisioning.
#[derive(Debug, Clone)]
pub struct ProvisionedCredential {
    pub credential: Credential,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("provisioning service unavailable: {0}")]
    Unavailable(String),

    /// The compare-and-swap kept losing to concurrent refreshes.
    #[error("snapshot refresh lost {attempts} compare-and-swap races")]
    Contended { attempts: u32 },

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Pull interface onto the provisioning service.
#[async_trait]
pub trait ProvisioningClient: Send + Sync {
    async fn get_rule_set(&self, space_id: SpaceId) -> Result<ProvisionedRuleSet, ProvisioningError>;

    async fn get_credential_snapshot(
        &self,
        id: CredentialId,
    ) -> Result<ProvisionedCredential, ProvisioningError>;
}

/// Refreshes the device-local snapshot caches from provisioning.
pub struct SnapshotRefresher<C> {
    client: C,
    rules: Arc<RuleStore>,
    credentials: Arc<CredentialTracker>,
    /// Bounded CAS retries before surfacing contention to the caller.
    max_retries: u32,
}

impl<C: ProvisioningClient> SnapshotRefresher<C> {
    pub fn new(client: C, rules: Arc<RuleStore>, credentials: Arc<CredentialTracker>) -> Self {
        Self {
            client,
            rules,
            credentials,
            max_retries: 3,
        }
    }

    /// Fetch and apply the rule set for a space. Returns the new version.
    pub async fn refresh_rule_set(&self, space_id: SpaceId) -> Result<SnapshotVersion, ProvisioningError> {
        for attempt in 1..=self.max_retries {
            let expected = ExpectedVersion::Exact(self.rules.version_of(space_id));
            let fetched = self.client.get_rule_set(space_id).await?;

            match self
                .rules
                .replace(space_id, fetched.rules, fetched.fetched_at, expected)
            {
                Ok(version) => {
                    tracing::debug!(%space_id, version = version.value(), "rule set refreshed");
                    return Ok(version);
                }
                Err(DomainError::Conflict(_)) => {
                    tracing::debug!(%space_id, attempt, "rule set refresh lost a version race");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ProvisioningError::Contended {
            attempts: self.max_retries,
        })
    }

    /// Fetch and apply a credential snapshot. Returns the new version.
    pub async fn refresh_credential(
        &self,
        id: CredentialId,
    ) -> Result<SnapshotVersion, ProvisioningError> {
        for attempt in 1..=self.max_retries {
            let expected = ExpectedVersion::Exact(self.credentials.version_of(id));
            let fetched = self.client.get_credential_snapshot(id).await?;

            match self
                .credentials
                .upsert(fetched.credential, fetched.fetched_at, expected)
            {
                Ok(version) => {
                    tracing::debug!(credential_id = %id, version = version.value(), "credential refreshed");
                    return Ok(version);
                }
                Err(DomainError::Conflict(_)) => {
                    tracing::debug!(credential_id = %id, attempt, "credential refresh lost a version race");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ProvisioningError::Contended {
            attempts: self.max_retries,
        })
    }
}
