//! The shared rate-limit policy primitive.
//!
//! A stateless decision over a shipment's `last_manual_refresh`; the
//! refresh coordinator is the sole enforcement point, so the user,
//! scheduler, and validator paths all see the identical window.

use chrono::{DateTime, Duration, Utc};

/// Why the limiter decided the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitReason {
    /// Rate limiting is switched off in configuration.
    Disabled,
    /// The caller forced the refresh.
    Forced,
    /// The shipment has never been manually refreshed.
    NoPrevious,
    /// The previous manual refresh is still inside the window.
    WithinWindow,
    /// The window has elapsed.
    Elapsed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub blocked: bool,
    /// Time left in the window when blocked.
    pub remaining: Option<Duration>,
    pub reason: RateLimitReason,
}

impl RateLimitDecision {
    fn allow(reason: RateLimitReason) -> Self {
        Self {
            blocked: false,
            remaining: None,
            reason,
        }
    }
}

/// Decide whether a live carrier call is allowed right now.
pub fn check_rate_limit(
    last_manual_refresh: Option<DateTime<Utc>>,
    forced: bool,
    now: DateTime<Utc>,
    window: Duration,
    disabled: bool,
) -> RateLimitDecision {
    if disabled {
        return RateLimitDecision::allow(RateLimitReason::Disabled);
    }
    if forced {
        return RateLimitDecision::allow(RateLimitReason::Forced);
    }
    let Some(last) = last_manual_refresh else {
        return RateLimitDecision::allow(RateLimitReason::NoPrevious);
    };

    let remaining = window - (now - last);
    if remaining > Duration::zero() {
        RateLimitDecision {
            blocked: true,
            remaining: Some(remaining),
            reason: RateLimitReason::WithinWindow,
        }
    } else {
        RateLimitDecision::allow(RateLimitReason::Elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::minutes(5);

    #[test]
    fn disabled_always_allows() {
        let now = Utc::now();
        let decision =
            check_rate_limit(Some(now), false, now, WINDOW, true);
        assert!(!decision.blocked);
        assert_eq!(decision.reason, RateLimitReason::Disabled);
    }

    #[test]
    fn forced_always_allows() {
        let now = Utc::now();
        let decision =
            check_rate_limit(Some(now), true, now, WINDOW, false);
        assert!(!decision.blocked);
        assert_eq!(decision.reason, RateLimitReason::Forced);
    }

    #[test]
    fn no_previous_refresh_allows() {
        let decision =
            check_rate_limit(None, false, Utc::now(), WINDOW, false);
        assert!(!decision.blocked);
        assert_eq!(decision.reason, RateLimitReason::NoPrevious);
    }

    #[test]
    fn blocks_inside_the_window_with_remaining_time() {
        let now = Utc::now();
        let decision = check_rate_limit(
            Some(now - Duration::minutes(2)),
            false,
            now,
            WINDOW,
            false,
        );
        assert!(decision.blocked);
        assert_eq!(decision.remaining, Some(Duration::minutes(3)));
    }

    #[test]
    fn allows_once_the_window_has_elapsed() {
        let now = Utc::now();
        let decision = check_rate_limit(
            Some(now - Duration::minutes(5)),
            false,
            now,
            WINDOW,
            false,
        );
        assert!(!decision.blocked);
        assert_eq!(decision.reason, RateLimitReason::Elapsed);
    }
}
