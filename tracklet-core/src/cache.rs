//! Two-tier refresh-response cache.
//!
//! The durable tier (the `refresh_cache` table) is authoritative and is
//! written first; the memory tier is a dashmap in front of it. A background
//! sweep removes expired entries on a fixed cadence, but correctness never
//! depends on the sweep having run: every read checks expiry itself.

use std::sync::Arc;
use std::sync::Weak;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracklet_config::CacheSettings;
use tracklet_model::{CachedRefresh, Carrier, RefreshResponse};

use crate::database::RefreshCacheStore;
use crate::error::Result;

/// How often the sweeper wakes.
const SWEEP_INTERVAL: std::time::Duration =
    std::time::Duration::from_secs(60);

/// The only place cache keys are built. Shipment-id keys and
/// email-validation keys share the durable table; the prefixes keep the
/// namespaces from ever colliding.
#[derive(Debug, Clone, Copy)]
pub struct CacheKeys;

impl CacheKeys {
    pub fn shipment(id: i64) -> String {
        format!("shipment:{id}")
    }

    pub fn validation(carrier: Carrier, tracking_number: &str) -> String {
        format!("validate:{carrier}:{tracking_number}")
    }
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    response: RefreshResponse,
    cached_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Write-through refresh cache with TTL expiry.
#[derive(Debug)]
pub struct RefreshCache {
    disabled: bool,
    ttl: Duration,
    memory: DashMap<String, MemoryEntry>,
    store: RefreshCacheStore,
    shutdown: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshCache {
    /// Build the cache, warm the memory tier from the durable tier, and
    /// start the sweeper.
    ///
    /// Warm-loaded entries are re-stamped to expire a full TTL after
    /// process start so a restart does not begin with a burst of misses;
    /// their durable expiry is unchanged.
    pub async fn initialize(
        store: RefreshCacheStore,
        settings: &CacheSettings,
    ) -> Result<Arc<Self>> {
        let ttl = Duration::from_std(settings.ttl).unwrap_or_else(|_| {
            Duration::minutes(5)
        });

        let cache = Arc::new(Self {
            disabled: settings.disabled,
            ttl,
            memory: DashMap::new(),
            store,
            shutdown: CancellationToken::new(),
            sweeper: Mutex::new(None),
        });

        if cache.disabled {
            info!("refresh cache disabled; every lookup will miss");
            return Ok(cache);
        }

        let now = Utc::now();
        let warm = cache.store.load_all(now).await?;
        let loaded = warm.len();
        for entry in warm {
            cache.memory.insert(
                entry.key.clone(),
                MemoryEntry {
                    response: entry.response,
                    cached_at: entry.cached_at,
                    expires_at: now + ttl,
                },
            );
        }
        info!(loaded, "refresh cache warmed from durable tier");

        let handle = tokio::spawn(sweep_loop(
            Arc::downgrade(&cache),
            cache.shutdown.clone(),
        ));
        *cache.sweeper.lock().await = Some(handle);

        Ok(cache)
    }

    /// Look a key up, consulting memory first and falling back to the
    /// durable tier. An entry exactly at its expiry is a miss.
    pub async fn get(&self, key: &str) -> Result<Option<CachedRefresh>> {
        if self.disabled {
            return Ok(None);
        }
        let now = Utc::now();

        if let Some(entry) = self.memory.get(key) {
            if now < entry.expires_at {
                debug!(key, "cache hit (memory)");
                return Ok(Some(CachedRefresh {
                    key: key.to_string(),
                    response: entry.response.clone(),
                    cached_at: entry.cached_at,
                    expires_at: entry.expires_at,
                }));
            }
        }
        // Either missing or stale; drop any stale entry before consulting
        // the durable tier.
        self.memory
            .remove_if(key, |_, entry| now >= entry.expires_at);

        match self.store.get(key).await? {
            Some(entry) if !entry.is_expired(now) => {
                debug!(key, "cache hit (durable)");
                self.memory.insert(
                    key.to_string(),
                    MemoryEntry {
                        response: entry.response.clone(),
                        cached_at: entry.cached_at,
                        expires_at: now + self.ttl,
                    },
                );
                Ok(Some(entry))
            }
            _ => {
                debug!(key, "cache miss");
                Ok(None)
            }
        }
    }

    /// Write-through set. The durable write is authoritative: if it fails
    /// the memory tier is left untouched and the error propagates.
    pub async fn set(
        &self,
        key: &str,
        response: &RefreshResponse,
    ) -> Result<()> {
        if self.disabled {
            return Ok(());
        }
        let now = Utc::now();
        let entry = CachedRefresh {
            key: key.to_string(),
            response: response.clone(),
            cached_at: now,
            expires_at: now + self.ttl,
        };
        self.store.set(&entry).await?;
        self.memory.insert(
            key.to_string(),
            MemoryEntry {
                response: response.clone(),
                cached_at: now,
                expires_at: now + self.ttl,
            },
        );
        debug!(key, "cache set");
        Ok(())
    }

    /// Delete memory-first so a concurrent reader cannot resurrect a
    /// freshly-invalidated entry from the durable tier into memory.
    pub async fn delete(&self, key: &str) -> Result<()> {
        if self.disabled {
            return Ok(());
        }
        self.memory.remove(key);
        self.store.delete(key).await?;
        debug!(key, "cache delete");
        Ok(())
    }

    /// Invalidate and report how old the entry was, for telemetry.
    pub async fn force_invalidate(
        &self,
        key: &str,
    ) -> Result<Option<Duration>> {
        if self.disabled {
            return Ok(None);
        }
        let now = Utc::now();
        let age = match self.memory.get(key) {
            Some(entry) => Some(now - entry.cached_at),
            None => self
                .store
                .get(key)
                .await?
                .map(|entry| entry.age(now)),
        };
        self.delete(key).await?;
        Ok(age)
    }

    /// Drop expired entries from both tiers. Returns durable rows removed.
    pub async fn sweep(&self) -> Result<u64> {
        if self.disabled {
            return Ok(0);
        }
        let now = Utc::now();
        self.memory.retain(|_, entry| now < entry.expires_at);
        let removed = self.store.delete_expired(now).await?;
        if removed > 0 {
            debug!(removed, "cache sweep removed expired entries");
        }
        Ok(removed)
    }

    /// Stop the sweeper. Idempotent.
    pub async fn close(&self) {
        self.shutdown.cancel();
        if let Some(handle) = self.sweeper.lock().await.take() {
            let _ = handle.await;
        }
    }
}

async fn sweep_loop(
    cache: Weak<RefreshCache>,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(
        tokio::time::MissedTickBehavior::Skip,
    );
    // The first tick fires immediately; skip it, the cache was just warmed.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(cache) = cache.upgrade() else { break };
        if let Err(err) = cache.sweep().await {
            warn!(error = %err, "cache sweep failed");
        }
    }
}
