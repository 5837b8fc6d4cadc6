use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracklet_model::{CachedRefresh, RefreshResponse};

use crate::error::Result;

/// Durable tier of the refresh cache.
#[derive(Debug, Clone)]
pub struct RefreshCacheStore {
    pool: SqlitePool,
}

#[derive(Debug, sqlx::FromRow)]
struct CacheRow {
    key: String,
    response: String,
    cached_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl CacheRow {
    fn into_cached(self) -> Result<CachedRefresh> {
        let response: RefreshResponse =
            serde_json::from_str(&self.response)?;
        Ok(CachedRefresh {
            key: self.key,
            response,
            cached_at: self.cached_at,
            expires_at: self.expires_at,
        })
    }
}

impl RefreshCacheStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, key: &str) -> Result<Option<CachedRefresh>> {
        let row = sqlx::query_as::<_, CacheRow>(
            "SELECT key, response, cached_at, expires_at \
             FROM refresh_cache WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        row.map(CacheRow::into_cached).transpose()
    }

    pub async fn set(&self, entry: &CachedRefresh) -> Result<()> {
        let response = serde_json::to_string(&entry.response)?;
        sqlx::query(
            "INSERT INTO refresh_cache \
                 (key, response, cached_at, expires_at) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT (key) DO UPDATE SET \
                 response = excluded.response, \
                 cached_at = excluded.cached_at, \
                 expires_at = excluded.expires_at",
        )
        .bind(&entry.key)
        .bind(response)
        .bind(entry.cached_at)
        .bind(entry.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM refresh_cache WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove every entry at or past its expiry. Returns rows removed.
    pub async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let affected =
            sqlx::query("DELETE FROM refresh_cache WHERE expires_at <= ?")
                .bind(now)
                .execute(&self.pool)
                .await?
                .rows_affected();
        Ok(affected)
    }

    /// Every entry that is still live at `now`, for the startup warm load.
    pub async fn load_all(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<CachedRefresh>> {
        let rows = sqlx::query_as::<_, CacheRow>(
            "SELECT key, response, cached_at, expires_at \
             FROM refresh_cache WHERE expires_at > ?",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(CacheRow::into_cached).collect()
    }
}
