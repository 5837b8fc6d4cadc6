//! The refresh coordinator: the single path through which any lookup
//! reaches a carrier.
//!
//! User requests, scheduler ticks, and email validation are thin call-sites
//! over one routine parameterized by a caller tag, so cache, rate-limit,
//! and persistence policy cannot drift between entry points.

pub mod rate_limit;

use std::sync::Arc;

use chrono::{Duration, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use tracklet_config::RateLimitSettings;
use tracklet_model::{
    Carrier, NewTrackingEvent, RefreshCaller, RefreshResponse, Shipment,
};

use crate::cache::{CacheKeys, RefreshCache};
use crate::carriers::{
    CarrierError, ClientFactory, FallbackClient, TrackingSnapshot,
};
use crate::database::{Database, RefreshStamp};
use crate::error::{Result, TrackerError};
pub use rate_limit::{
    RateLimitDecision, RateLimitReason, check_rate_limit,
};

/// Source of per-carrier clients. Lets tests swap the real factory for
/// stub strategy chains.
pub trait CarrierClientProvider: Send + Sync {
    fn client(&self, carrier: Carrier) -> FallbackClient;
}

impl CarrierClientProvider for ClientFactory {
    fn client(&self, carrier: Carrier) -> FallbackClient {
        ClientFactory::client(self, carrier)
    }
}

pub struct RefreshCoordinator {
    db: Database,
    cache: Arc<RefreshCache>,
    clients: Arc<dyn CarrierClientProvider>,
    rate_limit_window: Duration,
    rate_limit_disabled: bool,
    /// Per-key refresh locks; an entry exists only while someone holds or
    /// waits on it.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("rate_limit_window", &self.rate_limit_window)
            .field("rate_limit_disabled", &self.rate_limit_disabled)
            .field("active_locks", &self.locks.len())
            .finish()
    }
}

impl RefreshCoordinator {
    pub fn new(
        db: Database,
        cache: Arc<RefreshCache>,
        clients: Arc<dyn CarrierClientProvider>,
        settings: &RateLimitSettings,
    ) -> Self {
        Self {
            db,
            cache,
            clients,
            rate_limit_window: Duration::from_std(settings.window)
                .unwrap_or_else(|_| Duration::minutes(5)),
            rate_limit_disabled: settings.disabled,
            locks: DashMap::new(),
        }
    }

    /// Refresh a shipment on behalf of `caller`.
    ///
    /// A fresh cache hit is returned without a carrier call and without
    /// touching the rate-limit timestamp; the cache is the user-facing
    /// defense against rate limiting.
    pub async fn refresh_shipment(
        &self,
        shipment_id: i64,
        forced: bool,
        caller: RefreshCaller,
    ) -> Result<RefreshResponse> {
        let shipment = self
            .db
            .shipments()
            .get(shipment_id)
            .await?
            .ok_or_else(|| {
                TrackerError::NotFound(format!("shipment {shipment_id}"))
            })?;

        if shipment.delivered && caller != RefreshCaller::EmailValidator {
            return Err(TrackerError::AlreadyDelivered(shipment_id));
        }

        let key = CacheKeys::shipment(shipment_id);

        if let Some(cached) = self.cache.get(&key).await? {
            debug!(shipment_id, caller = caller.as_str(), "served from cache");
            return Ok(cached.response);
        }

        let decision = check_rate_limit(
            shipment.last_manual_refresh,
            forced,
            Utc::now(),
            self.rate_limit_window,
            self.rate_limit_disabled,
        );
        if decision.blocked {
            let remaining_secs = decision
                .remaining
                .map(|d| d.num_seconds().max(1))
                .unwrap_or(1);
            debug!(
                shipment_id,
                caller = caller.as_str(),
                remaining_secs,
                "refresh blocked by rate limit"
            );
            return Err(TrackerError::RateLimited { remaining_secs });
        }

        let _guard = self.hold_lock(&key).await;

        // Single-flight: a waiter that queued behind the winning call finds
        // the cache populated and returns the same response.
        if let Some(cached) = self.cache.get(&key).await? {
            debug!(shipment_id, "cache filled while waiting on refresh lock");
            return Ok(cached.response);
        }

        let snapshot = self
            .fetch_from_carrier(
                shipment.carrier,
                &shipment.tracking_number,
            )
            .await?;

        self.ingest_snapshot(&shipment, snapshot, caller).await
    }

    /// Validator-mode refresh: a `{tracking, carrier}` candidate with no
    /// owning shipment. Nothing is persisted to the shipment tables; the
    /// result is cached under a tracking-number key so repeated candidates
    /// in one mailbox window cost one carrier call.
    pub async fn validate_candidate(
        &self,
        tracking_number: &str,
        carrier: Carrier,
    ) -> Result<TrackingSnapshot> {
        let key = CacheKeys::validation(carrier, tracking_number);

        if let Some(cached) = self.cache.get(&key).await? {
            return Ok(snapshot_from_response(&cached.response));
        }

        let _guard = self.hold_lock(&key).await;
        if let Some(cached) = self.cache.get(&key).await? {
            return Ok(snapshot_from_response(&cached.response));
        }

        let snapshot = self
            .fetch_from_carrier(carrier, tracking_number)
            .await?;

        let now = Utc::now();
        let response = RefreshResponse {
            shipment_id: 0,
            updated_at: now,
            events_added: 0,
            total_events: snapshot.events.len() as i64,
            events: snapshot
                .events
                .iter()
                .map(|e| tracklet_model::TrackingEvent {
                    id: 0,
                    shipment_id: 0,
                    event_time: e.event_time,
                    location: e.location.clone(),
                    status: e.status.clone(),
                    description: e.description.clone(),
                    created_at: now,
                })
                .collect(),
        };
        if let Err(err) = self.cache.set(&key, &response).await {
            warn!(key, error = %err, "failed to cache validation result");
        }
        Ok(snapshot)
    }

    /// Persist one successful carrier snapshot and fill the cache
    /// (§refresh steps 6-7 without the lookup). The scheduler routes
    /// batch results through here so batched and single refreshes share
    /// one persist path.
    pub async fn ingest_snapshot(
        &self,
        shipment: &Shipment,
        snapshot: TrackingSnapshot,
        caller: RefreshCaller,
    ) -> Result<RefreshResponse> {
        let stamp = match caller {
            RefreshCaller::User => RefreshStamp::Manual,
            RefreshCaller::Scheduler => RefreshStamp::Auto,
            RefreshCaller::EmailValidator => RefreshStamp::None,
        };

        let now = Utc::now();
        let (events_added, total_events, events) = self
            .db
            .persist_refresh(
                shipment.id,
                &snapshot.events,
                snapshot.status,
                snapshot.expected_delivery,
                stamp,
                now,
            )
            .await?;

        let response = RefreshResponse {
            shipment_id: shipment.id,
            updated_at: now,
            events_added,
            total_events,
            events,
        };

        let key = CacheKeys::shipment(shipment.id);
        if let Err(err) = self.cache.set(&key, &response).await {
            // A cache failure must not fail the refresh; the durable state
            // is already committed.
            warn!(key, error = %err, "failed to cache refresh response");
        }

        info!(
            shipment_id = shipment.id,
            caller = caller.as_str(),
            events_added,
            total_events,
            "refresh persisted"
        );
        Ok(response)
    }

    /// Drop the cache entry for a shipment (after mutation or delete).
    /// Returns the observed age of the invalidated entry.
    pub async fn invalidate_shipment(
        &self,
        shipment_id: i64,
    ) -> Result<Option<Duration>> {
        self.cache
            .force_invalidate(&CacheKeys::shipment(shipment_id))
            .await
    }

    async fn fetch_from_carrier(
        &self,
        carrier: Carrier,
        tracking_number: &str,
    ) -> Result<TrackingSnapshot> {
        let client = self.clients.client(carrier);
        client.fetch(tracking_number).await.map_err(|err| match err {
            CarrierError::NotFound(msg) => {
                TrackerError::UnknownTracking(msg)
            }
            other => TrackerError::Carrier(other),
        })
    }

    /// Acquire the per-key refresh lock, creating the entry on demand.
    /// The lease removes the entry again once the last holder lets go.
    async fn hold_lock(&self, key: &str) -> LockLease<'_> {
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        LockLease {
            guard: Some(guard),
            key: key.to_string(),
            locks: &self.locks,
        }
    }
}

/// Holds a keyed refresh lock; dropping it releases the mutex and discards
/// the map entry when no waiter remains.
struct LockLease<'a> {
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
    key: String,
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
}

impl Drop for LockLease<'_> {
    fn drop(&mut self) {
        // Release the mutex (and our Arc) before inspecting the count; a
        // blocked waiter holds its own clone and keeps the entry alive.
        self.guard.take();
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

fn snapshot_from_response(response: &RefreshResponse) -> TrackingSnapshot {
    let events: Vec<NewTrackingEvent> = response
        .events
        .iter()
        .map(|e| NewTrackingEvent {
            event_time: e.event_time,
            location: e.location.clone(),
            status: e.status.clone(),
            description: e.description.clone(),
        })
        .collect();
    TrackingSnapshot::from_events(events, None)
}
