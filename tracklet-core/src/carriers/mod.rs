//! Carrier lookup clients.
//!
//! For each carrier the factory yields an ordered chain of strategies
//! (API, headless browser, plain scrape) wrapped so that callers see a
//! single `fetch`. Transport-level retries and deadlines live here; policy
//! (caching, rate limiting, persistence) belongs to the refresh
//! coordinator.

pub mod browser;
pub mod dhl;
pub mod fedex;
pub mod scrape;
pub mod ups;
pub mod usps;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use tracklet_config::CarrierCredentials;
use tracklet_model::{Carrier, NewTrackingEvent, ShipmentStatus};

/// Hard outer deadline for a single tracking lookup, scraping included.
pub const FETCH_DEADLINE: Duration = Duration::from_secs(180);

/// Per-request HTTP timeout inside a lookup; the outer deadline still
/// bounds the whole chain.
pub(crate) const HTTP_TIMEOUT: Duration = Duration::from_secs(45);

#[derive(Debug, Clone, thiserror::Error)]
pub enum CarrierError {
    #[error("tracking number not found: {0}")]
    NotFound(String),

    #[error("rate limited by carrier: {0}")]
    RateLimited(String),

    #[error("carrier authentication failed: {0}")]
    Auth(String),

    #[error("transient carrier failure: {0}")]
    Transient(String),

    #[error("permanent carrier failure: {0}")]
    Permanent(String),
}

impl CarrierError {
    /// Whether a later attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CarrierError::RateLimited(_) | CarrierError::Transient(_)
        )
    }
}

impl From<reqwest::Error> for CarrierError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            return CarrierError::Transient(err.to_string());
        }
        match err.status() {
            Some(status) if status.as_u16() == 429 => {
                CarrierError::RateLimited(err.to_string())
            }
            Some(status) if status.as_u16() == 401 || status.as_u16() == 403 => {
                CarrierError::Auth(err.to_string())
            }
            Some(status) if status.is_server_error() => {
                CarrierError::Transient(err.to_string())
            }
            _ => CarrierError::Permanent(err.to_string()),
        }
    }
}

/// What one lookup learned about a tracking number.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingSnapshot {
    /// Newest first, as carriers report them.
    pub events: Vec<NewTrackingEvent>,
    pub status: ShipmentStatus,
    pub expected_delivery: Option<DateTime<Utc>>,
}

impl TrackingSnapshot {
    /// Derive the snapshot from a list of events (newest first).
    pub fn from_events(
        events: Vec<NewTrackingEvent>,
        expected_delivery: Option<DateTime<Utc>>,
    ) -> Self {
        let status = events
            .first()
            .map(|e| ShipmentStatus::from_carrier_status(&e.status))
            .unwrap_or_default();
        Self {
            events,
            status,
            expected_delivery,
        }
    }
}

/// One lookup strategy for one carrier.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CarrierClient: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(
        &self,
        tracking_number: &str,
    ) -> Result<TrackingSnapshot, CarrierError>;

    /// Batched lookup. Only USPS has real batching; the default issues
    /// sequential singles so callers can treat every client uniformly.
    async fn fetch_batch(
        &self,
        tracking_numbers: &[String],
    ) -> Vec<(String, Result<TrackingSnapshot, CarrierError>)> {
        let mut results = Vec::with_capacity(tracking_numbers.len());
        for number in tracking_numbers {
            results.push((number.clone(), self.fetch(number).await));
        }
        results
    }
}

/// Ordered strategy chain behind a single `fetch`.
///
/// `NotFound` is a definitive answer and stops the chain; any other error
/// falls through to the next strategy. The whole chain runs under
/// [`FETCH_DEADLINE`].
pub struct FallbackClient {
    carrier: Carrier,
    strategies: Vec<Arc<dyn CarrierClient>>,
}

impl std::fmt::Debug for FallbackClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackClient")
            .field("carrier", &self.carrier)
            .field(
                "strategies",
                &self
                    .strategies
                    .iter()
                    .map(|s| s.name())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl FallbackClient {
    pub fn new(
        carrier: Carrier,
        strategies: Vec<Arc<dyn CarrierClient>>,
    ) -> Self {
        debug_assert!(!strategies.is_empty());
        Self {
            carrier,
            strategies,
        }
    }

    pub fn carrier(&self) -> Carrier {
        self.carrier
    }

    pub async fn fetch(
        &self,
        tracking_number: &str,
    ) -> Result<TrackingSnapshot, CarrierError> {
        tokio::time::timeout(
            FETCH_DEADLINE,
            self.fetch_inner(tracking_number),
        )
        .await
        .map_err(|_| {
            CarrierError::Transient(format!(
                "{} lookup exceeded {}s deadline",
                self.carrier,
                FETCH_DEADLINE.as_secs()
            ))
        })?
    }

    async fn fetch_inner(
        &self,
        tracking_number: &str,
    ) -> Result<TrackingSnapshot, CarrierError> {
        let mut last_error = None;
        for strategy in &self.strategies {
            debug!(
                carrier = %self.carrier,
                strategy = strategy.name(),
                tracking_number,
                "carrier fetch"
            );
            match strategy.fetch(tracking_number).await {
                Ok(snapshot) => return Ok(snapshot),
                Err(CarrierError::NotFound(msg)) => {
                    return Err(CarrierError::NotFound(msg));
                }
                Err(err) => {
                    warn!(
                        carrier = %self.carrier,
                        strategy = strategy.name(),
                        error = %err,
                        "carrier strategy failed, trying next"
                    );
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            CarrierError::Permanent(format!(
                "no lookup strategy configured for {}",
                self.carrier
            ))
        }))
    }

    /// Batched lookup through the primary strategy, under the deadline.
    pub async fn fetch_batch(
        &self,
        tracking_numbers: &[String],
    ) -> Vec<(String, Result<TrackingSnapshot, CarrierError>)> {
        let Some(primary) = self.strategies.first() else {
            return vec![];
        };
        match tokio::time::timeout(
            FETCH_DEADLINE,
            primary.fetch_batch(tracking_numbers),
        )
        .await
        {
            Ok(results) => results,
            Err(_) => tracking_numbers
                .iter()
                .map(|n| {
                    (
                        n.clone(),
                        Err(CarrierError::Transient(format!(
                            "{} batch exceeded {}s deadline",
                            self.carrier,
                            FETCH_DEADLINE.as_secs()
                        ))),
                    )
                })
                .collect(),
        }
    }
}

/// Builds per-carrier clients from a configuration snapshot.
///
/// Strategy order is carrier-specific: USPS prefers its API when a key is
/// configured and falls back to scraping; FedEx prefers its API with a
/// headless-browser fallback; UPS and DHL lead with the browser and fall
/// back to scraping.
#[derive(Debug, Clone)]
pub struct ClientFactory {
    http: reqwest::Client,
    credentials: CarrierCredentials,
}

impl ClientFactory {
    pub fn new(credentials: CarrierCredentials) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(scrape::DESKTOP_USER_AGENT)
            .build()
            .unwrap_or_default();
        Self { http, credentials }
    }

    pub fn client(&self, carrier: Carrier) -> FallbackClient {
        let strategies: Vec<Arc<dyn CarrierClient>> = match carrier {
            Carrier::Usps => {
                if let Some(key) = &self.credentials.usps_api_key {
                    vec![Arc::new(usps::UspsApiClient::new(
                        self.http.clone(),
                        key.clone(),
                    ))]
                } else {
                    vec![Arc::new(usps::UspsWebClient::new(
                        self.http.clone(),
                    ))]
                }
            }
            Carrier::Fedex => {
                let mut chain: Vec<Arc<dyn CarrierClient>> = Vec::new();
                if self.credentials.has_fedex_api() {
                    // has_fedex_api() guarantees both halves are present.
                    if let (Some(key), Some(secret)) = (
                        &self.credentials.fedex_api_key,
                        &self.credentials.fedex_api_secret,
                    ) {
                        chain.push(Arc::new(fedex::FedexApiClient::new(
                            self.http.clone(),
                            key.clone(),
                            secret.clone(),
                        )));
                    }
                }
                chain.push(Arc::new(fedex::FedexBrowserClient::new()));
                chain
            }
            Carrier::Ups => vec![
                Arc::new(ups::UpsBrowserClient::new()),
                Arc::new(ups::UpsWebClient::new(self.http.clone())),
            ],
            Carrier::Dhl => vec![
                Arc::new(dhl::DhlBrowserClient::new()),
                Arc::new(dhl::DhlWebClient::new(self.http.clone())),
            ],
        };
        FallbackClient::new(carrier, strategies)
    }
}
