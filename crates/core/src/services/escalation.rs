//! Escalation policy.
//!
//! A pure decision function from the current record and an incoming
//! moderation event to the next action. It has no side effects; the
//! controller applies the decision to the store and to the transport.

use chrono::{DateTime, Duration, Utc};

use crate::services::audit::ActionKind;
use crate::services::collaborators::EnforcementAction;
use crate::services::infraction_store::InfractionRecord;

/// Reason recorded when repeated warnings trigger a ban.
pub const THRESHOLD_REASON: &str = "threshold reached";

/// Default number of warnings that triggers a ban.
pub const DEFAULT_THRESHOLD: u32 = 3;

/// Longest accepted mute. The platform treats longer restrictions as
/// permanent.
pub const MAX_MUTE_DAYS: i64 = 366;

/// A moderation request against one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModerationEvent {
    Warn,
    Unwarn,
    Mute { duration: Duration },
    Unmute,
    Ban { reason: String },
    Unban,
    Kick,
}

impl ModerationEvent {
    /// Whether the event worsens a user's standing.
    #[must_use]
    pub const fn is_punitive(&self) -> bool {
        matches!(
            self,
            Self::Warn | Self::Mute { .. } | Self::Ban { .. } | Self::Kick
        )
    }
}

/// What the policy decided for an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Warning recorded; carries the new count.
    Warn(u32),
    /// Warning removed; carries the new count.
    Unwarn(u32),
    Mute { until: DateTime<Utc> },
    Unmute,
    /// Ban, either requested directly or reached through warnings.
    AutoBan(String),
    Unban,
    Kick,
    NoOp,
}

/// Escalation rules with a configurable warning threshold.
#[derive(Debug, Clone, Copy)]
pub struct EscalationPolicy {
    threshold: u32,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl EscalationPolicy {
    /// Create a policy that bans at `threshold` warnings (minimum 1).
    #[must_use]
    pub const fn new(threshold: u32) -> Self {
        Self {
            threshold: if threshold == 0 { 1 } else { threshold },
        }
    }

    /// Warnings that trigger a ban.
    #[must_use]
    pub const fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Decide the next action for `event` given the current `record`.
    ///
    /// Bans are terminal: a banned user only responds to `Unban`.
    #[must_use]
    pub fn decide(
        &self,
        record: &InfractionRecord,
        event: &ModerationEvent,
        now: DateTime<Utc>,
    ) -> Decision {
        if record.is_banned() {
            return match event {
                ModerationEvent::Unban => Decision::Unban,
                _ => Decision::NoOp,
            };
        }

        match event {
            ModerationEvent::Warn => {
                let count = record.warning_count.saturating_add(1);
                if count >= self.threshold {
                    Decision::AutoBan(THRESHOLD_REASON.to_string())
                } else {
                    Decision::Warn(count)
                }
            }
            ModerationEvent::Unwarn => match record.warning_count {
                0 => Decision::NoOp,
                count => Decision::Unwarn(count - 1),
            },
            ModerationEvent::Mute { duration } => match now.checked_add_signed(*duration) {
                Some(until) => Decision::Mute { until },
                None => Decision::NoOp,
            },
            ModerationEvent::Unmute => {
                if record.mute_until.is_some() {
                    Decision::Unmute
                } else {
                    Decision::NoOp
                }
            }
            ModerationEvent::Ban { reason } => Decision::AutoBan(reason.clone()),
            ModerationEvent::Unban => Decision::NoOp,
            ModerationEvent::Kick => Decision::Kick,
        }
    }
}

impl Decision {
    /// The record after this decision takes effect.
    #[must_use]
    pub fn apply(&self, record: &InfractionRecord) -> InfractionRecord {
        let mut next = record.clone();
        match self {
            Self::Warn(count) | Self::Unwarn(count) => next.warning_count = *count,
            Self::Mute { until } => next.mute_until = Some(*until),
            Self::Unmute => next.mute_until = None,
            Self::AutoBan(reason) => {
                next.ban_reason = Some(reason.clone());
                next.mute_until = None;
            }
            Self::Unban => {
                next.ban_reason = None;
                next.warning_count = 0;
            }
            Self::Kick | Self::NoOp => {}
        }
        next
    }

    /// The transport-level action this decision requires, if any.
    #[must_use]
    pub const fn enforcement(&self) -> Option<EnforcementAction> {
        match self {
            Self::AutoBan(_) => Some(EnforcementAction::Ban),
            Self::Unban => Some(EnforcementAction::Unban),
            Self::Mute { until } => Some(EnforcementAction::Mute { until: *until }),
            Self::Unmute => Some(EnforcementAction::Unmute),
            Self::Kick => Some(EnforcementAction::Kick),
            Self::Warn(_) | Self::Unwarn(_) | Self::NoOp => None,
        }
    }

    /// The audit kind recorded for this decision, if any.
    #[must_use]
    pub const fn action_kind(&self) -> Option<ActionKind> {
        match self {
            Self::Warn(_) => Some(ActionKind::Warn),
            Self::Unwarn(_) => Some(ActionKind::Unwarn),
            Self::Mute { .. } => Some(ActionKind::Mute),
            Self::Unmute => Some(ActionKind::Unmute),
            Self::AutoBan(_) => Some(ActionKind::Ban),
            Self::Unban => Some(ActionKind::Unban),
            Self::Kick => Some(ActionKind::Kick),
            Self::NoOp => None,
        }
    }
}

/// Parse a duration such as `45`, `30s`, `10m`, `2h` or `1d`.
///
/// A bare number is seconds. Zero, negative and durations longer than
/// [`MAX_MUTE_DAYS`] are rejected.
#[must_use]
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim().to_lowercase();
    let (digits, unit) = match input.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => input.split_at(idx),
        None => (input.as_str(), "s"),
    };

    let value: i64 = digits.parse().ok().filter(|v| *v > 0)?;
    let duration = match unit {
        "s" => Duration::try_seconds(value),
        "m" => Duration::try_minutes(value),
        "h" => Duration::try_hours(value),
        "d" => Duration::try_days(value),
        "w" => Duration::try_weeks(value),
        _ => None,
    }?;
    (duration <= Duration::days(MAX_MUTE_DAYS)).then_some(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(warnings: u32) -> InfractionRecord {
        InfractionRecord {
            warning_count: warnings,
            ..InfractionRecord::empty(-100, 7)
        }
    }

    #[test]
    fn test_warn_below_threshold_increments() {
        let policy = EscalationPolicy::default();
        assert_eq!(
            policy.decide(&record(0), &ModerationEvent::Warn, Utc::now()),
            Decision::Warn(1)
        );
        assert_eq!(
            policy.decide(&record(1), &ModerationEvent::Warn, Utc::now()),
            Decision::Warn(2)
        );
    }

    #[test]
    fn test_warn_at_threshold_minus_one_bans() {
        for threshold in 1..6 {
            let policy = EscalationPolicy::new(threshold);
            let decision = policy.decide(&record(threshold - 1), &ModerationEvent::Warn, Utc::now());
            assert_eq!(decision, Decision::AutoBan(THRESHOLD_REASON.to_string()));
        }
    }

    #[test]
    fn test_unwarn_clamps_at_zero() {
        let policy = EscalationPolicy::default();
        assert_eq!(
            policy.decide(&record(0), &ModerationEvent::Unwarn, Utc::now()),
            Decision::NoOp
        );
        assert_eq!(
            policy.decide(&record(2), &ModerationEvent::Unwarn, Utc::now()),
            Decision::Unwarn(1)
        );
    }

    #[test]
    fn test_mute_sets_deadline_without_touching_warnings() {
        let policy = EscalationPolicy::default();
        let now = Utc::now();
        let decision = policy.decide(
            &record(2),
            &ModerationEvent::Mute {
                duration: Duration::seconds(60),
            },
            now,
        );

        assert_eq!(
            decision,
            Decision::Mute {
                until: now + Duration::seconds(60)
            }
        );
        let next = decision.apply(&record(2));
        assert_eq!(next.warning_count, 2);
        assert_eq!(next.mute_until, Some(now + Duration::seconds(60)));
    }

    #[test]
    fn test_ban_ignores_warning_count() {
        let policy = EscalationPolicy::default();
        let decision = policy.decide(
            &record(0),
            &ModerationEvent::Ban {
                reason: "spam".to_string(),
            },
            Utc::now(),
        );
        assert_eq!(decision, Decision::AutoBan("spam".to_string()));
    }

    #[test]
    fn test_banned_user_only_accepts_unban() {
        let policy = EscalationPolicy::default();
        let banned = Decision::AutoBan("spam".to_string()).apply(&record(1));

        for event in [
            ModerationEvent::Warn,
            ModerationEvent::Unwarn,
            ModerationEvent::Mute {
                duration: Duration::minutes(5),
            },
            ModerationEvent::Kick,
            ModerationEvent::Ban {
                reason: "again".to_string(),
            },
        ] {
            assert_eq!(policy.decide(&banned, &event, Utc::now()), Decision::NoOp);
        }
        assert_eq!(
            policy.decide(&banned, &ModerationEvent::Unban, Utc::now()),
            Decision::Unban
        );
    }

    #[test]
    fn test_ban_clears_mute_and_unban_clears_warnings() {
        let muted = InfractionRecord {
            mute_until: Some(Utc::now()),
            ..record(2)
        };
        let banned = Decision::AutoBan("spam".to_string()).apply(&muted);
        assert!(banned.mute_until.is_none());

        let unbanned = Decision::Unban.apply(&banned);
        assert!(unbanned.is_empty());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("45"), Some(Duration::seconds(45)));
        assert_eq!(parse_duration("30s"), Some(Duration::seconds(30)));
        assert_eq!(parse_duration("10m"), Some(Duration::minutes(10)));
        assert_eq!(parse_duration("2H"), Some(Duration::hours(2)));
        assert_eq!(parse_duration("1d"), Some(Duration::days(1)));
        assert_eq!(parse_duration("0m"), None);
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration("5y"), None);
        assert_eq!(parse_duration("366d"), Some(Duration::days(366)));
        assert_eq!(parse_duration("367d"), None);
        assert_eq!(parse_duration("53w"), None);
        assert_eq!(parse_duration("100000000d"), None);
        assert_eq!(parse_duration("99999999999999999999"), None);
    }

    #[test]
    fn test_mute_past_representable_time_is_noop() {
        let policy = EscalationPolicy::default();
        let decision = policy.decide(
            &record(0),
            &ModerationEvent::Mute {
                duration: Duration::MAX,
            },
            Utc::now(),
        );
        assert_eq!(decision, Decision::NoOp);
    }
}
