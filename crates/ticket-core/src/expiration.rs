//! Expiration policies
//!
//! Policies are plain data so they can travel with the ticket through any
//! codec. A policy never looks anything up: it decides from the
//! [`TicketUsage`] it is handed and the current instant.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Usage view of a ticket that a policy decides on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TicketUsage {
    pub creation_time: DateTime<Utc>,
    pub last_time_used: DateTime<Utc>,
    pub previous_time_used: Option<DateTime<Utc>>,
    pub count_of_uses: u64,
    /// Whether the authentication behind the ticket asked to be remembered
    pub remember_me: bool,
}

/// Closed set of expiration policies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExpirationPolicy {
    /// The ticket never expires by policy
    NeverExpires,

    /// The ticket is born expired
    AlwaysExpires,

    /// Expires a fixed number of seconds after creation, whatever the usage
    HardTimeout { time_to_kill_seconds: u64 },

    /// Expires after a period of inactivity since the last use
    Timeout { time_to_kill_seconds: u64 },

    /// Expires once used `number_of_uses` times or once
    /// `time_to_kill_seconds` have elapsed since creation
    MultiTimeUseOrTimeout {
        number_of_uses: u64,
        time_to_kill_seconds: u64,
    },

    /// Idle timeout plus a minimum delay between two consecutive uses
    ThrottledUseAndTimeout {
        time_to_kill_seconds: u64,
        time_in_between_uses_seconds: u64,
    },

    /// Sliding idle timeout bounded by a hard maximum lifetime
    TicketGrantingTicket {
        max_time_to_live_seconds: u64,
        time_to_kill_seconds: u64,
    },

    /// Expires at a fixed instant
    FixedInstant { expires_at: DateTime<Utc> },

    /// Picks `remember_me` when the authentication asked to be remembered,
    /// `session` otherwise
    RememberMeDelegating {
        remember_me: Box<ExpirationPolicy>,
        session: Box<ExpirationPolicy>,
    },
}

impl Default for ExpirationPolicy {
    fn default() -> Self {
        ExpirationPolicy::NeverExpires
    }
}

impl ExpirationPolicy {
    pub fn multi_time_use_or_timeout(number_of_uses: u64, time_to_kill_seconds: u64) -> Self {
        ExpirationPolicy::MultiTimeUseOrTimeout {
            number_of_uses,
            time_to_kill_seconds,
        }
    }

    pub fn hard_timeout(time_to_kill_seconds: u64) -> Self {
        ExpirationPolicy::HardTimeout { time_to_kill_seconds }
    }

    pub fn timeout(time_to_kill_seconds: u64) -> Self {
        ExpirationPolicy::Timeout { time_to_kill_seconds }
    }

    pub fn ticket_granting_ticket(max_time_to_live_seconds: u64, time_to_kill_seconds: u64) -> Self {
        ExpirationPolicy::TicketGrantingTicket {
            max_time_to_live_seconds,
            time_to_kill_seconds,
        }
    }

    pub fn remember_me_delegating(remember_me: ExpirationPolicy, session: ExpirationPolicy) -> Self {
        ExpirationPolicy::RememberMeDelegating {
            remember_me: Box::new(remember_me),
            session: Box::new(session),
        }
    }

    /// Evaluate the policy against the current time
    pub fn is_expired(&self, usage: &TicketUsage) -> bool {
        self.is_expired_at(usage, Utc::now())
    }

    /// Evaluate the policy at a given instant
    pub fn is_expired_at(&self, usage: &TicketUsage, now: DateTime<Utc>) -> bool {
        match self {
            ExpirationPolicy::NeverExpires => false,
            ExpirationPolicy::AlwaysExpires => true,
            ExpirationPolicy::HardTimeout { time_to_kill_seconds } => {
                now > plus_seconds(usage.creation_time, *time_to_kill_seconds)
            }
            ExpirationPolicy::Timeout { time_to_kill_seconds } => {
                now > plus_seconds(usage.last_time_used, *time_to_kill_seconds)
            }
            ExpirationPolicy::MultiTimeUseOrTimeout {
                number_of_uses,
                time_to_kill_seconds,
            } => {
                usage.count_of_uses >= *number_of_uses
                    || now > plus_seconds(usage.creation_time, *time_to_kill_seconds)
            }
            ExpirationPolicy::ThrottledUseAndTimeout {
                time_to_kill_seconds,
                time_in_between_uses_seconds,
            } => {
                let kill_time = plus_seconds(usage.last_time_used, *time_to_kill_seconds);
                if now > kill_time {
                    return true;
                }
                if usage.count_of_uses == 0 {
                    return false;
                }
                // Used too soon after the previous use
                now < plus_seconds(usage.last_time_used, *time_in_between_uses_seconds)
            }
            ExpirationPolicy::TicketGrantingTicket {
                max_time_to_live_seconds,
                time_to_kill_seconds,
            } => {
                now > plus_seconds(usage.creation_time, *max_time_to_live_seconds)
                    || now > plus_seconds(usage.last_time_used, *time_to_kill_seconds)
            }
            ExpirationPolicy::FixedInstant { expires_at } => now >= *expires_at,
            ExpirationPolicy::RememberMeDelegating {
                remember_me,
                session,
            } => {
                if usage.remember_me {
                    remember_me.is_expired_at(usage, now)
                } else {
                    session.is_expired_at(usage, now)
                }
            }
        }
    }

    /// Upper bound on how long a ticket under this policy can live, used as
    /// the entry lifetime in backing stores. `None` means unbounded.
    pub fn time_to_live(&self) -> Option<Duration> {
        match self {
            ExpirationPolicy::NeverExpires | ExpirationPolicy::FixedInstant { .. } => None,
            ExpirationPolicy::AlwaysExpires => Some(Duration::ZERO),
            ExpirationPolicy::HardTimeout { time_to_kill_seconds }
            | ExpirationPolicy::Timeout { time_to_kill_seconds }
            | ExpirationPolicy::MultiTimeUseOrTimeout {
                time_to_kill_seconds,
                ..
            }
            | ExpirationPolicy::ThrottledUseAndTimeout {
                time_to_kill_seconds,
                ..
            } => Some(Duration::from_secs(*time_to_kill_seconds)),
            ExpirationPolicy::TicketGrantingTicket {
                max_time_to_live_seconds,
                ..
            } => Some(Duration::from_secs(*max_time_to_live_seconds)),
            ExpirationPolicy::RememberMeDelegating {
                remember_me,
                session,
            } => match (remember_me.time_to_live(), session.time_to_live()) {
                (Some(a), Some(b)) => Some(a.max(b)),
                _ => None,
            },
        }
    }

    /// Policy name used in log output
    pub fn name(&self) -> &'static str {
        match self {
            ExpirationPolicy::NeverExpires => "NeverExpires",
            ExpirationPolicy::AlwaysExpires => "AlwaysExpires",
            ExpirationPolicy::HardTimeout { .. } => "HardTimeout",
            ExpirationPolicy::Timeout { .. } => "Timeout",
            ExpirationPolicy::MultiTimeUseOrTimeout { .. } => "MultiTimeUseOrTimeout",
            ExpirationPolicy::ThrottledUseAndTimeout { .. } => "ThrottledUseAndTimeout",
            ExpirationPolicy::TicketGrantingTicket { .. } => "TicketGrantingTicket",
            ExpirationPolicy::FixedInstant { .. } => "FixedInstant",
            ExpirationPolicy::RememberMeDelegating { .. } => "RememberMeDelegating",
        }
    }
}

fn plus_seconds(instant: DateTime<Utc>, seconds: u64) -> DateTime<Utc> {
    let seconds = i64::try_from(seconds).unwrap_or(i64::MAX);
    chrono::Duration::try_seconds(seconds)
        .and_then(|delta| instant.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn usage_at(created: DateTime<Utc>, uses: u64) -> TicketUsage {
        TicketUsage {
            creation_time: created,
            last_time_used: created,
            previous_time_used: None,
            count_of_uses: uses,
            remember_me: false,
        }
    }

    #[test]
    fn test_never_and_always() {
        let usage = usage_at(Utc::now(), 1000);
        assert!(!ExpirationPolicy::NeverExpires.is_expired(&usage));
        assert!(ExpirationPolicy::AlwaysExpires.is_expired(&usage));
    }

    #[test]
    fn test_multi_time_use_checks_both_conditions() {
        let created = Utc::now();
        let policy = ExpirationPolicy::multi_time_use_or_timeout(2, 5);

        assert!(!policy.is_expired_at(&usage_at(created, 0), created));
        assert!(!policy.is_expired_at(&usage_at(created, 1), created));
        assert!(policy.is_expired_at(&usage_at(created, 2), created));

        // Time alone is enough, uses do not extend the lifetime
        let later = created + ChronoDuration::seconds(6);
        assert!(policy.is_expired_at(&usage_at(created, 0), later));

        let mut used = usage_at(created, 1);
        used.last_time_used = later;
        assert!(policy.is_expired_at(&used, later));
    }

    #[test]
    fn test_zero_uses_is_degenerate() {
        let created = Utc::now();
        let policy = ExpirationPolicy::multi_time_use_or_timeout(0, 60);
        assert!(policy.is_expired_at(&usage_at(created, 0), created));
    }

    #[test]
    fn test_idle_timeout_slides_with_use() {
        let created = Utc::now();
        let policy = ExpirationPolicy::timeout(10);
        let mut usage = usage_at(created, 1);
        let now = created + ChronoDuration::seconds(15);
        assert!(policy.is_expired_at(&usage, now));

        usage.last_time_used = created + ChronoDuration::seconds(8);
        assert!(!policy.is_expired_at(&usage, now));
    }

    #[test]
    fn test_hard_timeout_ignores_use() {
        let created = Utc::now();
        let policy = ExpirationPolicy::hard_timeout(10);
        let mut usage = usage_at(created, 3);
        usage.last_time_used = created + ChronoDuration::seconds(9);
        assert!(policy.is_expired_at(&usage, created + ChronoDuration::seconds(11)));
    }

    #[test]
    fn test_throttled_use() {
        let created = Utc::now();
        let policy = ExpirationPolicy::ThrottledUseAndTimeout {
            time_to_kill_seconds: 60,
            time_in_between_uses_seconds: 5,
        };

        assert!(!policy.is_expired_at(&usage_at(created, 0), created));

        let used = usage_at(created, 1);
        assert!(policy.is_expired_at(&used, created + ChronoDuration::seconds(2)));
        assert!(!policy.is_expired_at(&used, created + ChronoDuration::seconds(6)));
        assert!(policy.is_expired_at(&used, created + ChronoDuration::seconds(61)));
    }

    #[test]
    fn test_ticket_granting_policy_bounds() {
        let created = Utc::now();
        let policy = ExpirationPolicy::ticket_granting_ticket(100, 10);
        let mut usage = usage_at(created, 5);

        usage.last_time_used = created + ChronoDuration::seconds(95);
        assert!(!policy.is_expired_at(&usage, created + ChronoDuration::seconds(99)));
        assert!(policy.is_expired_at(&usage, created + ChronoDuration::seconds(101)));
    }

    #[test]
    fn test_remember_me_delegation() {
        let created = Utc::now();
        let policy = ExpirationPolicy::remember_me_delegating(
            ExpirationPolicy::hard_timeout(1000),
            ExpirationPolicy::hard_timeout(10),
        );
        let now = created + ChronoDuration::seconds(20);

        let mut usage = usage_at(created, 0);
        assert!(policy.is_expired_at(&usage, now));

        usage.remember_me = true;
        assert!(!policy.is_expired_at(&usage, now));
        assert_eq!(policy.time_to_live(), Some(Duration::from_secs(1000)));
    }

    #[test]
    fn test_fixed_instant() {
        let at = Utc::now() + ChronoDuration::seconds(30);
        let policy = ExpirationPolicy::FixedInstant { expires_at: at };
        let usage = usage_at(Utc::now(), 0);
        assert!(!policy.is_expired_at(&usage, at - ChronoDuration::seconds(1)));
        assert!(policy.is_expired_at(&usage, at));
    }

    #[test]
    fn test_huge_timeouts_do_not_overflow() {
        let policy = ExpirationPolicy::hard_timeout(u64::MAX);
        assert!(!policy.is_expired(&usage_at(Utc::now(), 0)));
    }

    #[test]
    fn test_policy_is_plain_data() {
        let policy = ExpirationPolicy::remember_me_delegating(
            ExpirationPolicy::multi_time_use_or_timeout(1, 10),
            ExpirationPolicy::NeverExpires,
        );
        let json = serde_json::to_string(&policy).unwrap();
        let back: ExpirationPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, policy);
    }
}
