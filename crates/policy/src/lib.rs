//! `gatewarden-policy`: access rules, credential lifecycle, and the evaluator.
//!
//! Everything in this crate is **pure domain**: no IO, no clocks other than
//! the `now` passed in by the caller. That purity is what makes an offline
//! evaluation reproducible on any device and safe to reconcile later.

pub mod credential;
pub mod evaluator;
pub mod rule;
pub mod snapshot;

pub use credential::{Credential, CredentialState, CredentialTransition};
pub use evaluator::{
    evaluate, resolve_biometric, BiometricConfirmation, DecidedBy, Decision, DefaultPolicy,
    EvaluationConfig, EvaluationError, Outcome,
};
pub use rule::{Rule, RulePolicy, RuleTarget, TimeWindow, ValidityInterval};
pub use snapshot::{CredentialSnapshot, CredentialTracker, RuleSetSnapshot, RuleStore};
