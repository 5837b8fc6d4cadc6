use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::carrier::Carrier;
use crate::error::ModelError;
use crate::status::ShipmentStatus;

/// A tracked parcel.
///
/// Created by a user request or by email ingestion; mutated by the refresh
/// coordinator (events, status) and the auto-update scheduler (counters).
/// `(tracking_number, carrier)` is unique, and `delivered` mirrors
/// `status == Delivered` for fast filtering.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Shipment {
    pub id: i64,
    pub tracking_number: String,
    pub carrier: Carrier,
    pub description: String,
    pub status: ShipmentStatus,
    pub delivered: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expected_delivery: Option<DateTime<Utc>>,

    // Refresh bookkeeping.
    pub last_manual_refresh: Option<DateTime<Utc>>,
    pub manual_refresh_count: i64,
    pub last_auto_refresh: Option<DateTime<Utc>>,
    pub auto_refresh_count: i64,
    pub auto_refresh_fail_count: i64,
    pub auto_refresh_enabled: bool,
    pub last_auto_refresh_error: Option<String>,
}

impl Shipment {
    /// Whether the scheduler's 5-minute manual-activity window covers `now`.
    pub fn manually_refreshed_within(
        &self,
        window: chrono::Duration,
        now: DateTime<Utc>,
    ) -> bool {
        self.last_manual_refresh
            .map(|t| now - t < window)
            .unwrap_or(false)
    }
}

/// Payload for creating a shipment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewShipment {
    pub tracking_number: String,
    pub carrier: Carrier,
    pub description: String,
}

impl NewShipment {
    pub fn new(
        tracking_number: impl Into<String>,
        carrier: Carrier,
        description: impl Into<String>,
    ) -> Self {
        Self {
            tracking_number: tracking_number.into(),
            carrier,
            description: description.into(),
        }
    }

    /// Reject obviously malformed input before it reaches the store.
    pub fn validate(&self) -> Result<(), ModelError> {
        let tracking = self.tracking_number.trim();
        if tracking.is_empty() {
            return Err(ModelError::InvalidTrackingNumber(
                "tracking number is empty".to_string(),
            ));
        }
        if tracking.len() > 50 {
            return Err(ModelError::InvalidTrackingNumber(format!(
                "tracking number too long ({} chars)",
                tracking.len()
            )));
        }
        if !tracking.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ModelError::InvalidTrackingNumber(
                "tracking number must be alphanumeric".to_string(),
            ));
        }
        Ok(())
    }
}

/// A carrier-reported event that has not been persisted yet.
///
/// Produced by carrier clients; the event store stamps ids and `created_at`
/// on insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTrackingEvent {
    pub event_time: DateTime<Utc>,
    pub location: String,
    pub status: String,
    pub description: String,
}

/// A single carrier-reported state transition. Immutable once persisted.
///
/// `(shipment_id, event_time, description)` identifies an event; the store
/// uses that triple to deduplicate on refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TrackingEvent {
    pub id: i64,
    pub shipment_id: i64,
    pub event_time: DateTime<Utc>,
    pub location: String,
    pub status: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}
