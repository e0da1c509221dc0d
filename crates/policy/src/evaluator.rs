//! Access Policy Evaluator.
//!
//! `evaluate` is a pure function of (credential snapshot, space, now,
//! candidate rules, rule snapshot age, config): no IO, no side effects, no
//! hidden clocks. Given
//! the same inputs it returns the same `Decision` on any device, online or
//! offline. The evaluator never writes the ledger; the caller does, exactly
//! once per evaluation.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use gatewarden_core::{RuleId, SpaceId};

use crate::rule::{Rule, RulePolicy};
use crate::snapshot::CredentialSnapshot;

/// Machine-readable reason codes shared between device and authority audit
/// trails.
pub mod reason {
    pub const RULE_MATCHED: &str = "rule_matched";
    pub const DEFAULT_POLICY: &str = "default_policy";
    pub const CREDENTIAL_NOT_ACTIVE: &str = "credential_not_active";
    pub const CREDENTIAL_EXPIRED: &str = "credential_expired";
    pub const STALE_CREDENTIAL_DATA: &str = "stale_credential_data";
    pub const STALE_RULE_DATA: &str = "stale_rule_data";
    pub const BIOMETRIC_REQUIRED: &str = "biometric_required";
    pub const BIOMETRIC_FAILED: &str = "biometric_failed";
    pub const BIOMETRIC_TIMEOUT: &str = "biometric_timeout";
}

/// Final or provisional outcome of one evaluation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Permit,
    Deny,
    /// Provisional permit awaiting a biometric confirmation within the
    /// configured window; resolved by [`resolve_biometric`].
    PermitPendingBiometric,
}

/// What decided the evaluation: a concrete rule, or the configured default.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecidedBy {
    Rule(RuleId),
    DefaultPolicy,
}

/// The evaluator's output for one (credential, space, time) evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub outcome: Outcome,
    pub decided_by: DecidedBy,
    pub reason_code: String,
    /// Human-readable reason for audit.
    pub reason: String,
    /// Deadline for the biometric confirmation when the outcome is
    /// `PermitPendingBiometric`.
    pub biometric_deadline: Option<DateTime<Utc>>,
}

impl Decision {
    fn deny(decided_by: DecidedBy, reason_code: &str, reason: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Deny,
            decided_by,
            reason_code: reason_code.to_string(),
            reason: reason.into(),
            biometric_deadline: None,
        }
    }

    pub fn is_permit(&self) -> bool {
        matches!(
            self.outcome,
            Outcome::Permit | Outcome::PermitPendingBiometric
        )
    }
}

/// Fallback when no rule matches. A closed set: the choice is always explicit
/// configuration, never an implicit default.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultPolicy {
    Permit,
    Deny,
    /// Refuse to decide: surfaces [`EvaluationError::NoApplicableRule`] so
    /// operators see the misconfiguration instead of a silent default.
    Escalate,
}

/// Evaluator configuration.
///
/// Deliberately has no `Default` impl: the default policy, staleness
/// threshold and biometric window are correctness choices the deployment
/// must make explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationConfig {
    pub default_policy: DefaultPolicy,
    /// Maximum tolerated age of the cached credential and rule set snapshots;
    /// beyond it every permit is downgraded to deny rather than trusting
    /// possibly-revoked state.
    pub snapshot_max_age: Duration,
    /// How long a provisional permit waits for biometric confirmation.
    pub biometric_window: Duration,
}

impl EvaluationConfig {
    pub fn new(
        default_policy: DefaultPolicy,
        snapshot_max_age: Duration,
        biometric_window: Duration,
    ) -> Self {
        Self {
            default_policy,
            snapshot_max_age,
            biometric_window,
        }
    }
}

/// Fatal evaluation failure; must be surfaced to operators, never silently
/// defaulted to a permit.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvaluationError {
    /// No rule matched and the deployment escalates instead of defaulting.
    #[error("no applicable rule for space {space_id} and no default policy configured")]
    NoApplicableRule { space_id: SpaceId },
}

/// Evaluate one access request against the cached snapshots and candidate
/// rules.
///
/// `candidate_rules` is the subset of the rule store whose target matches
/// `space_id` or is a wildcard; rules for other spaces are filtered here
/// anyway so a sloppy caller cannot widen access. `rules_fetched_at` is the
/// rule set snapshot's refresh timestamp (`None` when no rule set was ever
/// provisioned for the space).
pub fn evaluate(
    snapshot: &CredentialSnapshot,
    space_id: SpaceId,
    now: DateTime<Utc>,
    candidate_rules: &[Rule],
    rules_fetched_at: Option<DateTime<Utc>>,
    config: &EvaluationConfig,
) -> Result<Decision, EvaluationError> {
    let decision = evaluate_fresh(snapshot, space_id, now, candidate_rules, config)?;
    if !decision.is_permit() {
        return Ok(decision);
    }

    // Correctness over availability: stale cached data, credential or rule
    // set, downgrades every permit to deny rather than trusting
    // possibly-revoked state. Denies keep their original reason.
    if snapshot.is_stale(now, config.snapshot_max_age) {
        return Ok(Decision::deny(
            decision.decided_by,
            reason::STALE_CREDENTIAL_DATA,
            format!(
                "credential snapshot is {}s old (max {}s)",
                snapshot.age(now).num_seconds(),
                config.snapshot_max_age.num_seconds()
            ),
        ));
    }
    if let Some(fetched_at) = rules_fetched_at {
        let age = now - fetched_at;
        if age > config.snapshot_max_age {
            return Ok(Decision::deny(
                decision.decided_by,
                reason::STALE_RULE_DATA,
                format!(
                    "rule snapshot is {}s old (max {}s)",
                    age.num_seconds(),
                    config.snapshot_max_age.num_seconds()
                ),
            ));
        }
    }

    Ok(decision)
}

fn evaluate_fresh(
    snapshot: &CredentialSnapshot,
    space_id: SpaceId,
    now: DateTime<Utc>,
    candidate_rules: &[Rule],
    config: &EvaluationConfig,
) -> Result<Decision, EvaluationError> {
    let credential = &snapshot.credential;

    if credential.is_expired_at(now) {
        return Ok(Decision::deny(
            DecidedBy::DefaultPolicy,
            reason::CREDENTIAL_EXPIRED,
            "credential expired",
        ));
    }

    let state = credential.effective_state(now);
    if state != crate::credential::CredentialState::Activated {
        return Ok(Decision::deny(
            DecidedBy::DefaultPolicy,
            reason::CREDENTIAL_NOT_ACTIVE,
            format!("credential not active (state: {})", state.as_str()),
        ));
    }

    let matching: Vec<&Rule> = candidate_rules
        .iter()
        .filter(|r| r.applies_to(space_id) && r.matches_at(now))
        .collect();

    let Some(winner) = pick_winner(&matching) else {
        return match config.default_policy {
            DefaultPolicy::Permit => Ok(Decision {
                outcome: Outcome::Permit,
                decided_by: DecidedBy::DefaultPolicy,
                reason_code: reason::DEFAULT_POLICY.to_string(),
                reason: "no rule matched; default policy permits".to_string(),
                biometric_deadline: None,
            }),
            DefaultPolicy::Deny => Ok(Decision::deny(
                DecidedBy::DefaultPolicy,
                reason::DEFAULT_POLICY,
                "no rule matched; default policy denies",
            )),
            DefaultPolicy::Escalate => Err(EvaluationError::NoApplicableRule { space_id }),
        };
    };

    let decision = match winner.policy {
        RulePolicy::Deny => Decision::deny(
            DecidedBy::Rule(winner.id),
            reason::RULE_MATCHED,
            format!("denied by rule {} (priority {})", winner.id, winner.priority),
        ),
        RulePolicy::Permit if winner.requires_biometric => Decision {
            outcome: Outcome::PermitPendingBiometric,
            decided_by: DecidedBy::Rule(winner.id),
            reason_code: reason::BIOMETRIC_REQUIRED.to_string(),
            reason: format!(
                "permitted by rule {} pending biometric confirmation",
                winner.id
            ),
            biometric_deadline: Some(now + config.biometric_window),
        },
        RulePolicy::Permit => Decision {
            outcome: Outcome::Permit,
            decided_by: DecidedBy::Rule(winner.id),
            reason_code: reason::RULE_MATCHED.to_string(),
            reason: format!(
                "permitted by rule {} (priority {})",
                winner.id, winner.priority
            ),
            biometric_deadline: None,
        },
    };

    Ok(decision)
}

/// Highest priority value wins; equal priorities tie-break by rule id
/// ascending (UUID byte order) so evaluation is reproducible across devices
/// regardless of input ordering.
fn pick_winner<'a>(matching: &[&'a Rule]) -> Option<&'a Rule> {
    matching
        .iter()
        .copied()
        .min_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)))
}

/// Confirmation signal supplied by the caller for a provisional permit.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BiometricConfirmation {
    pub confirmed: bool,
    pub at: DateTime<Utc>,
}

/// Resolve a provisional `PermitPendingBiometric` decision.
///
/// Pure, like `evaluate`. Decisions that were never provisional pass through
/// unchanged.
pub fn resolve_biometric(decision: Decision, confirmation: BiometricConfirmation) -> Decision {
    if decision.outcome != Outcome::PermitPendingBiometric {
        return decision;
    }

    let within_window = decision
        .biometric_deadline
        .is_some_and(|deadline| confirmation.at <= deadline);

    if !within_window {
        return Decision::deny(
            decision.decided_by,
            reason::BIOMETRIC_TIMEOUT,
            "biometric confirmation arrived after the window closed",
        );
    }
    if !confirmation.confirmed {
        return Decision::deny(
            decision.decided_by,
            reason::BIOMETRIC_FAILED,
            "biometric confirmation failed",
        );
    }

    Decision {
        outcome: Outcome::Permit,
        reason_code: reason::RULE_MATCHED.to_string(),
        reason: "permitted after biometric confirmation".to_string(),
        biometric_deadline: None,
        ..decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{Credential, CredentialState, CredentialTransition};
    use crate::rule::{RulePolicy, RuleTarget};
    use chrono::TimeZone;
    use gatewarden_core::{CredentialId, HolderId};
    use uuid::Uuid;

    fn test_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 17, 12, 0, 0).unwrap()
    }

    fn test_config() -> EvaluationConfig {
        EvaluationConfig::new(
            DefaultPolicy::Deny,
            Duration::hours(24),
            Duration::seconds(30),
        )
    }

    fn fresh_rules_at() -> Option<DateTime<Utc>> {
        Some(test_now() - Duration::minutes(5))
    }

    fn activated_snapshot(expires_at: Option<DateTime<Utc>>) -> CredentialSnapshot {
        let mut cred = Credential::issue(
            CredentialId::new(),
            HolderId::new(),
            "staff",
            test_now() - Duration::days(30),
            expires_at,
        );
        cred.apply(CredentialTransition::Activate).unwrap();
        CredentialSnapshot::new(cred, test_now() - Duration::minutes(5))
    }

    fn rule_with_priority(priority: u32, policy: RulePolicy) -> Rule {
        Rule::simple(RuleId::new(), RuleTarget::AnySpace, priority, policy)
    }

    #[test]
    fn non_activated_credential_never_permits() {
        let space = SpaceId::new();
        let permit_all = vec![rule_with_priority(10, RulePolicy::Permit)];

        for state in [
            CredentialState::Issued,
            CredentialState::Suspended,
            CredentialState::Expired,
        ] {
            let mut snapshot = activated_snapshot(None);
            snapshot.credential.state = state;

            let decision = evaluate(
                &snapshot,
                space,
                test_now(),
                &permit_all,
                fresh_rules_at(),
                &test_config(),
            )
            .unwrap();
            assert_eq!(decision.outcome, Outcome::Deny, "state {state:?}");
            assert_eq!(decision.reason_code, reason::CREDENTIAL_NOT_ACTIVE);
        }
    }

    #[test]
    fn expired_credential_is_denied_even_when_rules_permit() {
        let snapshot = activated_snapshot(Some(test_now() - Duration::seconds(1)));
        let rules = vec![rule_with_priority(10, RulePolicy::Permit)];

        let decision = evaluate(
            &snapshot,
            SpaceId::new(),
            test_now(),
            &rules,
            fresh_rules_at(),
            &test_config(),
        )
        .unwrap();
        assert_eq!(decision.outcome, Outcome::Deny);
        assert_eq!(decision.reason_code, reason::CREDENTIAL_EXPIRED);
    }

    #[test]
    fn higher_priority_rule_wins() {
        let snapshot = activated_snapshot(None);
        let permit = rule_with_priority(10, RulePolicy::Permit);
        let deny = rule_with_priority(20, RulePolicy::Deny);

        let decision = evaluate(
            &snapshot,
            SpaceId::new(),
            test_now(),
            &[permit.clone(), deny.clone()],
            fresh_rules_at(),
            &test_config(),
        )
        .unwrap();
        assert_eq!(decision.outcome, Outcome::Deny);
        assert_eq!(decision.decided_by, DecidedBy::Rule(deny.id));

        // Input ordering must not matter.
        let reversed = evaluate(
            &snapshot,
            SpaceId::new(),
            test_now(),
            &[deny.clone(), permit],
            fresh_rules_at(),
            &test_config(),
        )
        .unwrap();
        assert_eq!(reversed, decision);
    }

    #[test]
    fn priority_tie_breaks_by_rule_id() {
        let snapshot = activated_snapshot(None);
        let lo_id = Rule::simple(
            RuleId::from_uuid(Uuid::from_u128(1)),
            RuleTarget::AnySpace,
            10,
            RulePolicy::Deny,
        );
        let hi_id = Rule::simple(
            RuleId::from_uuid(Uuid::from_u128(2)),
            RuleTarget::AnySpace,
            10,
            RulePolicy::Permit,
        );

        let decision = evaluate(
            &snapshot,
            SpaceId::new(),
            test_now(),
            &[hi_id, lo_id.clone()],
            fresh_rules_at(),
            &test_config(),
        )
        .unwrap();
        assert_eq!(decision.decided_by, DecidedBy::Rule(lo_id.id));
        assert_eq!(decision.outcome, Outcome::Deny);
    }

    #[test]
    fn no_matching_rule_falls_back_to_explicit_default() {
        let snapshot = activated_snapshot(None);
        let space = SpaceId::new();

        let deny_cfg = test_config();
        let decision =
            evaluate(&snapshot, space, test_now(), &[], fresh_rules_at(), &deny_cfg).unwrap();
        assert_eq!(decision.outcome, Outcome::Deny);
        assert_eq!(decision.decided_by, DecidedBy::DefaultPolicy);

        let permit_cfg = EvaluationConfig::new(
            DefaultPolicy::Permit,
            Duration::hours(24),
            Duration::seconds(30),
        );
        let decision = evaluate(
            &snapshot,
            space,
            test_now(),
            &[],
            fresh_rules_at(),
            &permit_cfg,
        )
        .unwrap();
        assert_eq!(decision.outcome, Outcome::Permit);

        let escalate_cfg = EvaluationConfig::new(
            DefaultPolicy::Escalate,
            Duration::hours(24),
            Duration::seconds(30),
        );
        let err = evaluate(
            &snapshot,
            space,
            test_now(),
            &[],
            fresh_rules_at(),
            &escalate_cfg,
        )
        .unwrap_err();
        assert_eq!(err, EvaluationError::NoApplicableRule { space_id: space });
    }

    #[test]
    fn stale_snapshot_downgrades_permit_to_deny() {
        let mut snapshot = activated_snapshot(None);
        snapshot.fetched_at = test_now() - Duration::hours(25);
        let rules = vec![rule_with_priority(10, RulePolicy::Permit)];

        let decision = evaluate(
            &snapshot,
            SpaceId::new(),
            test_now(),
            &rules,
            fresh_rules_at(),
            &test_config(),
        )
        .unwrap();
        assert_eq!(decision.outcome, Outcome::Deny);
        assert_eq!(decision.reason_code, reason::STALE_CREDENTIAL_DATA);
    }

    #[test]
    fn stale_rule_set_downgrades_permit_even_with_fresh_credential() {
        let snapshot = activated_snapshot(None);
        let rules = vec![rule_with_priority(10, RulePolicy::Permit)];

        let decision = evaluate(
            &snapshot,
            SpaceId::new(),
            test_now(),
            &rules,
            Some(test_now() - Duration::hours(25)),
            &test_config(),
        )
        .unwrap();
        assert_eq!(decision.outcome, Outcome::Deny);
        assert_eq!(decision.reason_code, reason::STALE_RULE_DATA);
    }

    #[test]
    fn stale_credential_reason_wins_when_both_snapshots_are_stale() {
        let mut snapshot = activated_snapshot(None);
        snapshot.fetched_at = test_now() - Duration::hours(25);
        let rules = vec![rule_with_priority(10, RulePolicy::Permit)];

        let decision = evaluate(
            &snapshot,
            SpaceId::new(),
            test_now(),
            &rules,
            Some(test_now() - Duration::hours(25)),
            &test_config(),
        )
        .unwrap();
        assert_eq!(decision.outcome, Outcome::Deny);
        assert_eq!(decision.reason_code, reason::STALE_CREDENTIAL_DATA);
    }

    #[test]
    fn stale_snapshot_keeps_deny_reasons() {
        let mut snapshot = activated_snapshot(None);
        snapshot.fetched_at = test_now() - Duration::hours(25);
        let deny = rule_with_priority(10, RulePolicy::Deny);

        let decision = evaluate(
            &snapshot,
            SpaceId::new(),
            test_now(),
            &[deny],
            fresh_rules_at(),
            &test_config(),
        )
        .unwrap();
        assert_eq!(decision.reason_code, reason::RULE_MATCHED);
    }

    #[test]
    fn biometric_rule_yields_provisional_permit() {
        let snapshot = activated_snapshot(None);
        let mut rule = rule_with_priority(10, RulePolicy::Permit);
        rule.requires_biometric = true;

        let decision = evaluate(
            &snapshot,
            SpaceId::new(),
            test_now(),
            &[rule],
            fresh_rules_at(),
            &test_config(),
        )
        .unwrap();
        assert_eq!(decision.outcome, Outcome::PermitPendingBiometric);
        assert_eq!(
            decision.biometric_deadline,
            Some(test_now() + Duration::seconds(30))
        );

        let confirmed = resolve_biometric(
            decision.clone(),
            BiometricConfirmation {
                confirmed: true,
                at: test_now() + Duration::seconds(5),
            },
        );
        assert_eq!(confirmed.outcome, Outcome::Permit);

        let failed = resolve_biometric(
            decision.clone(),
            BiometricConfirmation {
                confirmed: false,
                at: test_now() + Duration::seconds(5),
            },
        );
        assert_eq!(failed.outcome, Outcome::Deny);
        assert_eq!(failed.reason_code, reason::BIOMETRIC_FAILED);

        let late = resolve_biometric(
            decision,
            BiometricConfirmation {
                confirmed: true,
                at: test_now() + Duration::seconds(31),
            },
        );
        assert_eq!(late.outcome, Outcome::Deny);
        assert_eq!(late.reason_code, reason::BIOMETRIC_TIMEOUT);
    }

    #[test]
    fn repeated_evaluation_is_deterministic() {
        let snapshot = activated_snapshot(None);
        let space = SpaceId::new();
        let rules = vec![
            rule_with_priority(5, RulePolicy::Permit),
            rule_with_priority(7, RulePolicy::Deny),
            rule_with_priority(3, RulePolicy::Permit),
        ];

        let first = evaluate(
            &snapshot,
            space,
            test_now(),
            &rules,
            fresh_rules_at(),
            &test_config(),
        )
        .unwrap();
        for _ in 0..10 {
            let again = evaluate(
                &snapshot,
                space,
                test_now(),
                &rules,
                fresh_rules_at(),
                &test_config(),
            )
            .unwrap();
            assert_eq!(again, first);
        }
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_rule() -> impl Strategy<Value = Rule> {
            (any::<u128>(), 0u32..100, any::<bool>()).prop_map(|(id, priority, permit)| {
                Rule::simple(
                    RuleId::from_uuid(Uuid::from_u128(id)),
                    RuleTarget::AnySpace,
                    priority,
                    if permit {
                        RulePolicy::Permit
                    } else {
                        RulePolicy::Deny
                    },
                )
            })
        }

        proptest! {
            #[test]
            fn winner_is_independent_of_input_order(
                rules in proptest::collection::vec(arb_rule(), 1..20),
                seed in any::<u64>(),
            ) {
                let snapshot = activated_snapshot(None);
                let space = SpaceId::new();
                let cfg = test_config();

                let baseline =
                    evaluate(&snapshot, space, test_now(), &rules, fresh_rules_at(), &cfg).unwrap();

                let mut shuffled = rules.clone();
                // Cheap deterministic shuffle.
                let len = shuffled.len();
                for i in 0..len {
                    let j = ((seed as usize).wrapping_mul(31).wrapping_add(i * 17)) % len;
                    shuffled.swap(i, j);
                }
                let permuted =
                    evaluate(&snapshot, space, test_now(), &shuffled, fresh_rules_at(), &cfg).unwrap();
                prop_assert_eq!(permuted, baseline);
            }

            #[test]
            fn suspended_credentials_never_permit(
                rules in proptest::collection::vec(arb_rule(), 0..20),
            ) {
                let mut snapshot = activated_snapshot(None);
                snapshot.credential.state = CredentialState::Suspended;

                let decision = evaluate(
                    &snapshot,
                    SpaceId::new(),
                    test_now(),
                    &rules,
                    fresh_rules_at(),
                    &test_config(),
                ).unwrap();
                prop_assert_eq!(decision.outcome, Outcome::Deny);
            }
        }
    }
}
