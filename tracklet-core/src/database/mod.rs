//! SQLite persistence layer.
//!
//! One process owns the database file. Stores are cheap pool handles; every
//! multi-row mutation inside a single logical operation runs in one
//! transaction.

pub mod emails;
pub mod events;
pub mod refresh_cache;
pub mod shipments;

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};
use tracing::info;
use tracklet_model::{
    Carrier, NewTrackingEvent, ShipmentStatus, TrackingEvent,
};

use crate::error::{Result, TrackerError};
pub use emails::EmailStore;
pub use events::EventStore;
pub use refresh_cache::RefreshCacheStore;
pub use shipments::{AutoRefreshOutcome, ShipmentStore};

const SCHEMA: &str = include_str!("schema.sql");

/// Handle to the SQLite database and its stores.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) the database file and apply the schema.
    pub async fn connect(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.apply_schema().await?;
        info!(path = %path.display(), "database ready");
        Ok(db)
    }

    /// A single-connection in-memory database, for tests.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| TrackerError::Internal(e.to_string()))?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.apply_schema().await?;
        Ok(db)
    }

    async fn apply_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        for carrier in Carrier::ALL {
            sqlx::query(
                "INSERT OR IGNORE INTO carriers (code, name) VALUES (?, ?)",
            )
            .bind(carrier.as_str())
            .bind(carrier.display_name())
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn shipments(&self) -> ShipmentStore {
        ShipmentStore::new(self.pool.clone())
    }

    pub fn events(&self) -> EventStore {
        EventStore::new(self.pool.clone())
    }

    pub fn refresh_cache(&self) -> RefreshCacheStore {
        RefreshCacheStore::new(self.pool.clone())
    }

    pub fn emails(&self) -> EmailStore {
        EmailStore::new(self.pool.clone())
    }

    /// Persist the outcome of one successful carrier fetch atomically:
    /// append deduplicated events, recompute the shipment row, and bump the
    /// appropriate refresh bookkeeping.
    ///
    /// Returns `(events_added, total_events, events)` for the refresh
    /// response.
    #[allow(clippy::too_many_arguments)]
    pub async fn persist_refresh(
        &self,
        shipment_id: i64,
        new_events: &[NewTrackingEvent],
        status: ShipmentStatus,
        expected_delivery: Option<DateTime<Utc>>,
        stamp: RefreshStamp,
        now: DateTime<Utc>,
    ) -> Result<(i64, i64, Vec<TrackingEvent>)> {
        let mut tx = self.pool.begin().await?;

        let added =
            events::append_in_tx(&mut tx, shipment_id, new_events, now)
                .await?;

        shipments::apply_refresh_in_tx(
            &mut tx,
            shipment_id,
            status,
            expected_delivery,
            stamp,
            now,
        )
        .await?;

        let events =
            events::list_in_tx(&mut tx, shipment_id).await?;
        let total = events.len() as i64;

        tx.commit().await?;
        Ok((added, total, events))
    }
}

/// Which refresh bookkeeping block a successful persist updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshStamp {
    /// User-initiated: bumps `manual_refresh_count` / `last_manual_refresh`.
    Manual,
    /// Scheduler-initiated: bumps the auto counters and resets the failure
    /// count.
    Auto,
    /// Validation lookups leave the bookkeeping untouched.
    None,
}
