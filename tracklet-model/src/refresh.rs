use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shipment::TrackingEvent;

/// Who is asking for a refresh.
///
/// Every path to a carrier goes through the refresh coordinator; the caller
/// tag is what keeps the user, scheduler, and email-validation entry points
/// from drifting apart in policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshCaller {
    User,
    Scheduler,
    EmailValidator,
}

impl RefreshCaller {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshCaller::User => "user",
            RefreshCaller::Scheduler => "scheduler",
            RefreshCaller::EmailValidator => "email_validator",
        }
    }
}

/// The contract returned to any refresh caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub shipment_id: i64,
    pub updated_at: DateTime<Utc>,
    /// Events persisted by this refresh (after dedup), not the total.
    pub events_added: i64,
    pub total_events: i64,
    pub events: Vec<TrackingEvent>,
}

/// The memoized result of a successful carrier lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedRefresh {
    pub key: String,
    pub response: RefreshResponse,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CachedRefresh {
    /// An entry exactly at `expires_at` is already a miss.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.cached_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn cached(at: DateTime<Utc>, ttl: Duration) -> CachedRefresh {
        CachedRefresh {
            key: "shipment:1".to_string(),
            response: RefreshResponse {
                shipment_id: 1,
                updated_at: at,
                events_added: 0,
                total_events: 0,
                events: vec![],
            },
            cached_at: at,
            expires_at: at + ttl,
        }
    }

    #[test]
    fn expiry_boundary_is_a_miss() {
        let at = Utc::now();
        let entry = cached(at, Duration::minutes(5));
        assert!(!entry.is_expired(at + Duration::minutes(4)));
        assert!(entry.is_expired(at + Duration::minutes(5)));
        assert!(entry.is_expired(at + Duration::minutes(6)));
    }
}
