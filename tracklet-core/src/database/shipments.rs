use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracklet_model::{Carrier, NewShipment, Shipment, ShipmentStatus};

use super::RefreshStamp;
use crate::error::{Result, TrackerError};

const SHIPMENT_COLUMNS: &str = "id, tracking_number, carrier, description, \
     status, delivered, created_at, updated_at, expected_delivery, \
     last_manual_refresh, manual_refresh_count, last_auto_refresh, \
     auto_refresh_count, auto_refresh_fail_count, auto_refresh_enabled, \
     last_auto_refresh_error";

/// Result of one scheduler attempt, for the counter update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoRefreshOutcome {
    Success,
    Failure(String),
}

#[derive(Debug, Clone)]
pub struct ShipmentStore {
    pool: SqlitePool,
}

impl ShipmentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, new: &NewShipment) -> Result<Shipment> {
        new.validate()?;
        let now = Utc::now();

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO shipments \
                 (tracking_number, carrier, description, status, delivered, \
                  created_at, updated_at) \
             VALUES (?, ?, ?, ?, 0, ?, ?) \
             RETURNING id",
        )
        .bind(new.tracking_number.trim())
        .bind(new.carrier)
        .bind(&new.description)
        .bind(ShipmentStatus::Pending)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                TrackerError::Validation(
                    tracklet_model::ModelError::InvalidField {
                        field: "tracking_number",
                        reason: format!(
                            "{} is already tracked with {}",
                            new.tracking_number, new.carrier
                        ),
                    },
                )
            }
            _ => TrackerError::Database(e),
        })?;

        self.get(id).await?.ok_or_else(|| {
            TrackerError::Internal(format!(
                "shipment {id} vanished after insert"
            ))
        })
    }

    pub async fn get(&self, id: i64) -> Result<Option<Shipment>> {
        let row = sqlx::query_as::<_, Shipment>(&format!(
            "SELECT {SHIPMENT_COLUMNS} FROM shipments WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_by_tracking(
        &self,
        tracking_number: &str,
        carrier: Carrier,
    ) -> Result<Option<Shipment>> {
        let row = sqlx::query_as::<_, Shipment>(&format!(
            "SELECT {SHIPMENT_COLUMNS} FROM shipments \
             WHERE tracking_number = ? AND carrier = ?"
        ))
        .bind(tracking_number)
        .bind(carrier)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list(&self) -> Result<Vec<Shipment>> {
        let rows = sqlx::query_as::<_, Shipment>(&format!(
            "SELECT {SHIPMENT_COLUMNS} FROM shipments ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn update_description(
        &self,
        id: i64,
        description: &str,
    ) -> Result<Shipment> {
        let now = Utc::now();
        let affected = sqlx::query(
            "UPDATE shipments SET description = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(description)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(TrackerError::NotFound(format!("shipment {id}")));
        }
        self.get(id).await?.ok_or_else(|| {
            TrackerError::NotFound(format!("shipment {id}"))
        })
    }

    /// Delete a shipment; tracking events cascade.
    pub async fn delete(&self, id: i64) -> Result<()> {
        let affected = sqlx::query("DELETE FROM shipments WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if affected == 0 {
            return Err(TrackerError::NotFound(format!("shipment {id}")));
        }
        Ok(())
    }

    /// The scheduler eligibility query.
    ///
    /// Returns shipments for `carrier` that are not delivered, were created
    /// at or after `cutoff`, still have auto-refresh enabled, sit below the
    /// failure cap, and were last auto-refreshed before `stale_before` (or
    /// never). Oldest first; never-refreshed shipments sort ahead of
    /// everything (SQLite sorts NULL first on ASC).
    pub async fn get_active_for_auto_update(
        &self,
        carrier: Carrier,
        cutoff: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        max_retries: i64,
    ) -> Result<Vec<Shipment>> {
        let rows = sqlx::query_as::<_, Shipment>(&format!(
            "SELECT {SHIPMENT_COLUMNS} FROM shipments \
             WHERE carrier = ? \
               AND delivered = 0 \
               AND created_at >= ? \
               AND auto_refresh_enabled = 1 \
               AND auto_refresh_fail_count < ? \
               AND (last_auto_refresh IS NULL OR last_auto_refresh < ?) \
             ORDER BY last_auto_refresh ASC"
        ))
        .bind(carrier)
        .bind(cutoff)
        .bind(max_retries)
        .bind(stale_before)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Atomic counter update after a scheduler attempt.
    ///
    /// Success stamps `last_auto_refresh`, bumps the success counter, and
    /// clears the failure state; failure bumps the failure counter and
    /// stores the error without touching `last_auto_refresh`, so the
    /// shipment stays eligible for the next tick.
    pub async fn update_auto_refresh_tracking(
        &self,
        id: i64,
        outcome: &AutoRefreshOutcome,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match outcome {
            AutoRefreshOutcome::Success => {
                sqlx::query(
                    "UPDATE shipments SET \
                         last_auto_refresh = ?, \
                         auto_refresh_count = auto_refresh_count + 1, \
                         auto_refresh_fail_count = 0, \
                         last_auto_refresh_error = NULL, \
                         updated_at = ? \
                     WHERE id = ?",
                )
                .bind(now)
                .bind(now)
                .bind(id)
                .execute(&self.pool)
                .await?;
            }
            AutoRefreshOutcome::Failure(error) => {
                sqlx::query(
                    "UPDATE shipments SET \
                         auto_refresh_fail_count = \
                             auto_refresh_fail_count + 1, \
                         last_auto_refresh_error = ?, \
                         updated_at = ? \
                     WHERE id = ?",
                )
                .bind(error)
                .bind(now)
                .bind(id)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }
}

/// Shipment-row half of the transactional refresh persist.
///
/// Delivered latches: once a shipment row has `delivered = 1` the status
/// column never changes again.
pub(crate) async fn apply_refresh_in_tx(
    tx: &mut Transaction<'_, Sqlite>,
    shipment_id: i64,
    status: ShipmentStatus,
    expected_delivery: Option<DateTime<Utc>>,
    stamp: RefreshStamp,
    now: DateTime<Utc>,
) -> Result<()> {
    let delivered = status == ShipmentStatus::Delivered;

    sqlx::query(
        "UPDATE shipments SET \
             status = CASE WHEN delivered = 1 THEN status ELSE ? END, \
             delivered = CASE WHEN delivered = 1 THEN 1 ELSE ? END, \
             expected_delivery = COALESCE(?, expected_delivery), \
             updated_at = ? \
         WHERE id = ?",
    )
    .bind(status)
    .bind(delivered)
    .bind(expected_delivery)
    .bind(now)
    .bind(shipment_id)
    .execute(&mut **tx)
    .await?;

    match stamp {
        RefreshStamp::Manual => {
            sqlx::query(
                "UPDATE shipments SET \
                     last_manual_refresh = ?, \
                     manual_refresh_count = manual_refresh_count + 1 \
                 WHERE id = ?",
            )
            .bind(now)
            .bind(shipment_id)
            .execute(&mut **tx)
            .await?;
        }
        RefreshStamp::Auto => {
            sqlx::query(
                "UPDATE shipments SET \
                     last_auto_refresh = ?, \
                     auto_refresh_count = auto_refresh_count + 1, \
                     auto_refresh_fail_count = 0, \
                     last_auto_refresh_error = NULL \
                 WHERE id = ?",
            )
            .bind(now)
            .bind(shipment_id)
            .execute(&mut **tx)
            .await?;
        }
        RefreshStamp::None => {}
    }

    Ok(())
}
