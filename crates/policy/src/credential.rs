//! Credential lifecycle state machine.
//!
//! Transitions are applied by an authoritative push when online; a device
//! operating offline treats credential state as read-only. The single
//! exception is expiry-by-time, which is a pure function of the clock and
//! needs no write propagation (see [`Credential::effective_state`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gatewarden_core::{CredentialId, DomainError, DomainResult, HolderId};

/// Lifecycle state of a credential.
///
/// `Issued → Activated → {Expired | Suspended}`; `Suspended` is reversible
/// back to `Activated` by explicit reactivation; `Issued` is never re-entered
/// and `Expired` is terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialState {
    Issued,
    Activated,
    Suspended,
    Expired,
}

impl CredentialState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CredentialState::Expired)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialState::Issued => "Issued",
            CredentialState::Activated => "Activated",
            CredentialState::Suspended => "Suspended",
            CredentialState::Expired => "Expired",
        }
    }
}

/// Authoritative lifecycle transition pushed from the provisioning service.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialTransition {
    Activate,
    Suspend,
    Reactivate,
    Expire,
}

/// The access-granting identity presented by a holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub id: CredentialId,
    pub holder_id: HolderId,
    /// Tag distinguishing which rule subsets apply (e.g. "staff", "visitor").
    pub kind: String,
    pub state: CredentialState,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn issue(
        id: CredentialId,
        holder_id: HolderId,
        kind: impl Into<String>,
        issued_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            holder_id,
            kind: kind.into(),
            state: CredentialState::Issued,
            issued_at,
            expires_at,
        }
    }

    /// Apply an authoritative lifecycle transition.
    ///
    /// Illegal edges are invariant violations; the state machine never
    /// re-enters `Issued` and never leaves `Expired`.
    pub fn apply(&mut self, transition: CredentialTransition) -> DomainResult<()> {
        let next = match (self.state, transition) {
            (CredentialState::Issued, CredentialTransition::Activate) => CredentialState::Activated,
            (CredentialState::Activated, CredentialTransition::Suspend) => {
                CredentialState::Suspended
            }
            (CredentialState::Suspended, CredentialTransition::Reactivate) => {
                CredentialState::Activated
            }
            (CredentialState::Activated, CredentialTransition::Expire)
            | (CredentialState::Suspended, CredentialTransition::Expire) => {
                CredentialState::Expired
            }
            (state, transition) => {
                return Err(DomainError::invariant(format!(
                    "illegal credential transition {:?} from {}",
                    transition,
                    state.as_str()
                )));
            }
        };
        self.state = next;
        Ok(())
    }

    /// Whether the expiry timestamp has passed.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    /// State as of `now`, applying expiry-by-time.
    ///
    /// This is the only transition a device may take locally; it is pure and
    /// identical on every device given the same clock reading.
    pub fn effective_state(&self, now: DateTime<Utc>) -> CredentialState {
        if self.is_expired_at(now) {
            CredentialState::Expired
        } else {
            self.state
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_credential(expires_at: Option<DateTime<Utc>>) -> Credential {
        Credential::issue(
            CredentialId::new(),
            HolderId::new(),
            "staff",
            Utc::now(),
            expires_at,
        )
    }

    #[test]
    fn activation_then_suspension_then_reactivation() {
        let mut cred = test_credential(None);
        cred.apply(CredentialTransition::Activate).unwrap();
        assert_eq!(cred.state, CredentialState::Activated);

        cred.apply(CredentialTransition::Suspend).unwrap();
        assert_eq!(cred.state, CredentialState::Suspended);

        cred.apply(CredentialTransition::Reactivate).unwrap();
        assert_eq!(cred.state, CredentialState::Activated);
    }

    #[test]
    fn issued_is_never_reentered() {
        let mut cred = test_credential(None);
        cred.apply(CredentialTransition::Activate).unwrap();
        // There is no edge back to Issued; a second Activate is illegal.
        let err = cred.apply(CredentialTransition::Activate).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn expired_is_terminal() {
        let mut cred = test_credential(None);
        cred.apply(CredentialTransition::Activate).unwrap();
        cred.apply(CredentialTransition::Expire).unwrap();

        for transition in [
            CredentialTransition::Activate,
            CredentialTransition::Suspend,
            CredentialTransition::Reactivate,
            CredentialTransition::Expire,
        ] {
            assert!(cred.clone().apply(transition).is_err());
        }
        assert!(cred.state.is_terminal());
    }

    #[test]
    fn suspend_requires_activated() {
        let mut cred = test_credential(None);
        let err = cred.apply(CredentialTransition::Suspend).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn effective_state_applies_expiry_by_time() {
        let now = Utc::now();
        let mut cred = test_credential(Some(now - Duration::seconds(1)));
        cred.apply(CredentialTransition::Activate).unwrap();

        assert_eq!(cred.state, CredentialState::Activated);
        assert_eq!(cred.effective_state(now), CredentialState::Expired);
        // The stored state is untouched; expiry-by-time is read-only.
        assert_eq!(cred.state, CredentialState::Activated);
    }
}
