use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracklet_model::{NewTrackingEvent, TrackingEvent};

use crate::error::Result;

const EVENT_COLUMNS: &str = "id, shipment_id, event_time, location, \
     status, description, created_at";

#[derive(Debug, Clone)]
pub struct EventStore {
    pool: SqlitePool,
}

impl EventStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append events for a shipment, skipping any the store already holds.
    ///
    /// Events are identified by `(shipment_id, event_time, description)`;
    /// re-appending a known event is a no-op. Returns the number of rows
    /// actually inserted.
    pub async fn append(
        &self,
        shipment_id: i64,
        events: &[NewTrackingEvent],
    ) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let added =
            append_in_tx(&mut tx, shipment_id, events, Utc::now()).await?;
        tx.commit().await?;
        Ok(added)
    }

    /// All events for a shipment, most recent first.
    pub async fn list_for_shipment(
        &self,
        shipment_id: i64,
    ) -> Result<Vec<TrackingEvent>> {
        let rows = sqlx::query_as::<_, TrackingEvent>(&format!(
            "SELECT {EVENT_COLUMNS} FROM tracking_events \
             WHERE shipment_id = ? ORDER BY event_time DESC, id DESC"
        ))
        .bind(shipment_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

pub(crate) async fn append_in_tx(
    tx: &mut Transaction<'_, Sqlite>,
    shipment_id: i64,
    events: &[NewTrackingEvent],
    now: DateTime<Utc>,
) -> Result<i64> {
    let mut added = 0_i64;
    for event in events {
        // The UNIQUE(shipment_id, event_time, description) constraint does
        // the dedup; OR IGNORE turns replays into no-ops.
        let result = sqlx::query(
            "INSERT OR IGNORE INTO tracking_events \
                 (shipment_id, event_time, location, status, description, \
                  created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(shipment_id)
        .bind(event.event_time)
        .bind(&event.location)
        .bind(&event.status)
        .bind(&event.description)
        .bind(now)
        .execute(&mut **tx)
        .await?;
        added += result.rows_affected() as i64;
    }
    Ok(added)
}

pub(crate) async fn list_in_tx(
    tx: &mut Transaction<'_, Sqlite>,
    shipment_id: i64,
) -> Result<Vec<TrackingEvent>> {
    let rows = sqlx::query_as::<_, TrackingEvent>(&format!(
        "SELECT {EVENT_COLUMNS} FROM tracking_events \
         WHERE shipment_id = ? ORDER BY event_time DESC, id DESC"
    ))
    .bind(shipment_id)
    .fetch_all(&mut **tx)
    .await?;
    Ok(rows)
}
