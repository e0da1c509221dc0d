//! Access rule model: targets, schedules, validity, priority.

use chrono::{DateTime, Datelike, NaiveTime, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

use gatewarden_core::{RuleId, SpaceId};

/// Outcome a rule produces when it wins an evaluation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RulePolicy {
    Permit,
    Deny,
}

/// What a rule applies to: one space, or every space.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleTarget {
    Space(SpaceId),
    AnySpace,
}

impl RuleTarget {
    pub fn covers(&self, space: SpaceId) -> bool {
        match self {
            RuleTarget::Space(s) => *s == space,
            RuleTarget::AnySpace => true,
        }
    }
}

/// Recurring time-of-day / day-of-week window.
///
/// A window with `start > end` wraps past midnight (e.g. 22:00–06:00); the
/// instant is attributed to the day the window started on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub days: Vec<Weekday>,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn new(days: Vec<Weekday>, start: NaiveTime, end: NaiveTime) -> Self {
        Self { days, start, end }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let time = at.time();
        // Truncate to minute precision so a window ending 17:00 admits 17:00:59.
        let time = NaiveTime::from_hms_opt(time.hour(), time.minute(), 0).unwrap_or(time);

        if self.start <= self.end {
            self.days.contains(&at.weekday()) && time >= self.start && time <= self.end
        } else {
            // Overnight window: the tail before `end` belongs to the previous day.
            (self.days.contains(&at.weekday()) && time >= self.start)
                || (self.days.contains(&at.weekday().pred()) && time <= self.end)
        }
    }
}

/// Absolute validity interval; `None` bounds are open-ended.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidityInterval {
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
}

impl ValidityInterval {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        if let Some(nb) = self.not_before {
            if at < nb {
                return false;
            }
        }
        if let Some(na) = self.not_after {
            if at > na {
                return false;
            }
        }
        true
    }
}

/// A configured access rule.
///
/// Rules are value snapshots pushed by the provisioning service; devices never
/// mutate them. Within a space the highest `priority` value wins; equal
/// priorities tie-break by `id` ordering so evaluation is reproducible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub target: RuleTarget,
    /// Recurring schedule; `None` means always valid.
    pub window: Option<TimeWindow>,
    /// Absolute validity bounds; `None` means open-ended.
    pub validity: Option<ValidityInterval>,
    pub priority: u32,
    pub policy: RulePolicy,
    /// Requires a secondary biometric confirmation at evaluation time.
    pub requires_biometric: bool,
}

impl Rule {
    /// A permanently valid rule with no schedule or biometric requirement.
    pub fn simple(id: RuleId, target: RuleTarget, priority: u32, policy: RulePolicy) -> Self {
        Self {
            id,
            target,
            window: None,
            validity: None,
            priority,
            policy,
            requires_biometric: false,
        }
    }

    /// Whether this rule is a candidate for the given space.
    pub fn applies_to(&self, space: SpaceId) -> bool {
        self.target.covers(space)
    }

    /// Whether this rule matches at the given instant.
    ///
    /// A rule outside its validity interval or time window never matches.
    pub fn matches_at(&self, at: DateTime<Utc>) -> bool {
        if let Some(validity) = &self.validity {
            if !validity.contains(at) {
                return false;
            }
        }
        if let Some(window) = &self.window {
            if !window.contains(at) {
                return false;
            }
        }
        true
    }
}
