//! The auto-update scheduler: one background loop per process.
//!
//! Each tick enumerates eligible shipments per carrier (oldest first),
//! batches USPS lookups, re-issues batch failures individually, and routes
//! every outcome through the refresh coordinator so scheduled refreshes
//! persist exactly like manual ones. Errors are recorded on the shipment
//! and never crash the loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracklet_config::{RateLimitSettings, SchedulerSettings};
use tracklet_model::{Carrier, RefreshCaller, Shipment};

use crate::database::{AutoRefreshOutcome, Database};
use crate::error::TrackerError;
use crate::refresh::{CarrierClientProvider, RefreshCoordinator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Running,
    Paused,
    Stopped,
}

/// Snapshot returned by the admin status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub tick_interval_secs: u64,
    pub ticks_completed: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
}

pub struct AutoUpdateScheduler {
    db: Database,
    coordinator: Arc<RefreshCoordinator>,
    clients: Arc<dyn CarrierClientProvider>,
    settings: SchedulerSettings,
    /// Manual activity inside this window defers the auto refresh.
    manual_activity_window: Duration,
    /// Ephemeral by design: a restart always resumes.
    paused: AtomicBool,
    ticks_completed: AtomicU64,
    last_tick_at: std::sync::Mutex<Option<DateTime<Utc>>>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for AutoUpdateScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoUpdateScheduler")
            .field("settings", &self.settings)
            .field("paused", &self.paused.load(Ordering::Relaxed))
            .finish()
    }
}

impl AutoUpdateScheduler {
    pub fn new(
        db: Database,
        coordinator: Arc<RefreshCoordinator>,
        clients: Arc<dyn CarrierClientProvider>,
        settings: SchedulerSettings,
        rate_limit: &RateLimitSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            db,
            coordinator,
            clients,
            settings,
            manual_activity_window: Duration::from_std(rate_limit.window)
                .unwrap_or_else(|_| Duration::minutes(5)),
            paused: AtomicBool::new(false),
            ticks_completed: AtomicU64::new(0),
            last_tick_at: std::sync::Mutex::new(None),
            shutdown,
        }
    }

    /// Pause future ticks. Returns false when the scheduler was already
    /// paused.
    pub fn pause(&self) -> bool {
        let was_paused = self.paused.swap(true, Ordering::SeqCst);
        if !was_paused {
            info!("auto-update scheduler paused");
        }
        !was_paused
    }

    /// Resume ticking. Returns false when the scheduler was not paused.
    pub fn resume(&self) -> bool {
        let was_paused = self.paused.swap(false, Ordering::SeqCst);
        if was_paused {
            info!("auto-update scheduler resumed");
        }
        was_paused
    }

    pub fn state(&self) -> SchedulerState {
        if !self.settings.enabled || self.shutdown.is_cancelled() {
            SchedulerState::Stopped
        } else if self.paused.load(Ordering::SeqCst) {
            SchedulerState::Paused
        } else {
            SchedulerState::Running
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            state: self.state(),
            tick_interval_secs: self.settings.update_interval.as_secs(),
            ticks_completed: self.ticks_completed.load(Ordering::Relaxed),
            last_tick_at: *self
                .last_tick_at
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        }
    }

    /// The scheduler loop. Runs until shutdown; returns immediately when
    /// auto-update is disabled in configuration.
    pub async fn run(self: Arc<Self>) {
        if !self.settings.enabled {
            info!("auto-update disabled; scheduler not starting");
            return;
        }

        let mut ticker =
            tokio::time::interval(self.settings.update_interval);
        // Ticks never stack: if a tick outlasts the interval the missed
        // firings are skipped, not queued.
        ticker.set_missed_tick_behavior(
            tokio::time::MissedTickBehavior::Skip,
        );
        // interval() fires immediately; the first real tick comes one
        // interval after startup.
        ticker.tick().await;

        info!(
            interval_secs = self.settings.update_interval.as_secs(),
            "auto-update scheduler running"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("auto-update scheduler stopping");
                    break;
                }
                _ = ticker.tick() => {}
            }

            if self.paused.load(Ordering::SeqCst) {
                debug!("scheduler paused; tick skipped");
                continue;
            }

            self.run_tick().await;
            self.ticks_completed.fetch_add(1, Ordering::Relaxed);
            *self
                .last_tick_at
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) =
                Some(Utc::now());
        }
    }

    /// One pass over every carrier's eligible shipments.
    pub async fn run_tick(&self) {
        let now = Utc::now();
        let cutoff = now - Duration::days(self.settings.cutoff_days);
        let stale_before = now
            - Duration::from_std(self.settings.update_interval)
                .unwrap_or_else(|_| Duration::hours(1));

        for carrier in Carrier::ALL {
            if self.shutdown.is_cancelled() {
                return;
            }
            let eligible = match self
                .db
                .shipments()
                .get_active_for_auto_update(
                    carrier,
                    cutoff,
                    stale_before,
                    self.settings.max_retries,
                )
                .await
            {
                Ok(shipments) => shipments,
                Err(err) => {
                    error!(
                        carrier = %carrier,
                        error = %err,
                        "eligibility query failed"
                    );
                    continue;
                }
            };

            // Manual activity takes precedence over the schedule.
            let due: Vec<Shipment> = eligible
                .into_iter()
                .filter(|s| {
                    !s.manually_refreshed_within(
                        self.manual_activity_window,
                        now,
                    )
                })
                .collect();

            if due.is_empty() {
                continue;
            }
            debug!(
                carrier = %carrier,
                count = due.len(),
                "auto-updating shipments"
            );

            let batch_ceiling = if carrier.supports_batch() {
                self.settings.batch_size.clamp(1, carrier.batch_ceiling())
            } else {
                1
            };

            for batch in due.chunks(batch_ceiling) {
                // Cancellation is observed at batch boundaries: the batch
                // in flight completes its persists, later ones never start.
                if self.shutdown.is_cancelled() {
                    return;
                }
                if batch.len() == 1 {
                    self.refresh_one(&batch[0]).await;
                } else {
                    self.refresh_batch(carrier, batch).await;
                }
            }
        }
    }

    /// Single-shipment path: the full coordinator pipeline.
    async fn refresh_one(&self, shipment: &Shipment) {
        match self
            .coordinator
            .refresh_shipment(shipment.id, false, RefreshCaller::Scheduler)
            .await
        {
            Ok(response) => {
                debug!(
                    shipment_id = shipment.id,
                    events_added = response.events_added,
                    "auto refresh succeeded"
                );
            }
            Err(err) => self.record_failure(shipment, &err).await,
        }
    }

    /// Batched USPS path: one carrier call for the group, individual
    /// re-issue for the numbers the batch could not answer.
    async fn refresh_batch(&self, carrier: Carrier, batch: &[Shipment]) {
        let numbers: Vec<String> = batch
            .iter()
            .map(|s| s.tracking_number.clone())
            .collect();
        let client = self.clients.client(carrier);
        let results = client.fetch_batch(&numbers).await;

        for (number, result) in results {
            let Some(shipment) =
                batch.iter().find(|s| s.tracking_number == number)
            else {
                warn!(
                    carrier = %carrier,
                    tracking_number = %number,
                    "batch result for unknown tracking number"
                );
                continue;
            };

            match result {
                Ok(snapshot) => {
                    if let Err(err) = self
                        .coordinator
                        .ingest_snapshot(
                            shipment,
                            snapshot,
                            RefreshCaller::Scheduler,
                        )
                        .await
                    {
                        self.record_failure(shipment, &err).await;
                    }
                }
                Err(batch_err) => {
                    debug!(
                        shipment_id = shipment.id,
                        error = %batch_err,
                        "batch lookup failed, re-issuing individually"
                    );
                    self.refresh_one(shipment).await;
                }
            }
        }
    }

    async fn record_failure(
        &self,
        shipment: &Shipment,
        err: &TrackerError,
    ) {
        warn!(
            shipment_id = shipment.id,
            tracking_number = %shipment.tracking_number,
            transient = err.is_transient(),
            error = %err,
            "auto refresh failed"
        );
        if let Err(store_err) = self
            .db
            .shipments()
            .update_auto_refresh_tracking(
                shipment.id,
                &AutoRefreshOutcome::Failure(err.to_string()),
                Utc::now(),
            )
            .await
        {
            error!(
                shipment_id = shipment.id,
                error = %store_err,
                "failed to record auto refresh failure"
            );
        }
    }
}
