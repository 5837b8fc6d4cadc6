//! FedEx lookup strategies.
//!
//! The Track API (OAuth client-credentials) is preferred when credentials
//! are configured; otherwise the headless browser reads the public
//! tracking page.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tokio::sync::Mutex;
use tracklet_model::NewTrackingEvent;

use super::scrape::{decode_entities, tidy_whitespace};
use super::{CarrierClient, CarrierError, TrackingSnapshot, browser};

const OAUTH_ENDPOINT: &str = "https://apis.fedex.com/oauth/token";
const TRACK_ENDPOINT: &str =
    "https://apis.fedex.com/track/v1/trackingnumbers";

/// Renew the bearer token this long before FedEx expires it.
const TOKEN_SLACK_SECS: i64 = 60;

#[derive(Debug, Clone)]
struct BearerToken {
    value: String,
    expires_at: DateTime<Utc>,
}

pub struct FedexApiClient {
    http: reqwest::Client,
    api_key: String,
    api_secret: String,
    token: Mutex<Option<BearerToken>>,
}

impl std::fmt::Debug for FedexApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FedexApiClient")
            .field("api_key", &"[redacted]")
            .finish()
    }
}

impl FedexApiClient {
    pub fn new(
        http: reqwest::Client,
        api_key: String,
        api_secret: String,
    ) -> Self {
        Self {
            http,
            api_key,
            api_secret,
            token: Mutex::new(None),
        }
    }

    async fn bearer(&self) -> Result<String, CarrierError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref()
            && token.expires_at > Utc::now()
        {
            return Ok(token.value.clone());
        }

        let response = self
            .http
            .post(OAUTH_ENDPOINT)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.api_key.as_str()),
                ("client_secret", self.api_secret.as_str()),
            ])
            .send()
            .await?;

        if response.status().as_u16() == 401 {
            return Err(CarrierError::Auth(
                "FedEx rejected the API credentials".to_string(),
            ));
        }
        let payload: Value =
            response.error_for_status()?.json().await?;

        let value = payload["access_token"]
            .as_str()
            .ok_or_else(|| {
                CarrierError::Auth(
                    "FedEx OAuth response had no access_token"
                        .to_string(),
                )
            })?
            .to_string();
        let expires_in =
            payload["expires_in"].as_i64().unwrap_or(3600);

        let token = BearerToken {
            value: value.clone(),
            expires_at: Utc::now()
                + chrono::Duration::seconds(
                    (expires_in - TOKEN_SLACK_SECS).max(0),
                ),
        };
        *guard = Some(token);
        Ok(value)
    }

    fn parse_track_result(
        payload: &Value,
        tracking_number: &str,
    ) -> Result<TrackingSnapshot, CarrierError> {
        let result = &payload["output"]["completeTrackResults"][0]
            ["trackResults"][0];

        if let Some(code) =
            result["error"]["code"].as_str()
        {
            if code.contains("NOTFOUND") {
                return Err(CarrierError::NotFound(format!(
                    "FedEx has no record of {tracking_number}"
                )));
            }
            return Err(CarrierError::Permanent(format!(
                "FedEx track error {code}"
            )));
        }

        let events: Vec<NewTrackingEvent> = result["scanEvents"]
            .as_array()
            .map(|scans| {
                scans
                    .iter()
                    .filter_map(|scan| {
                        let description = scan["eventDescription"]
                            .as_str()?
                            .to_string();
                        let event_time = scan["date"]
                            .as_str()
                            .and_then(|d| {
                                DateTime::parse_from_rfc3339(d).ok()
                            })
                            .map(|d| d.with_timezone(&Utc))
                            .unwrap_or_else(Utc::now);
                        let location = [
                            scan["scanLocation"]["city"].as_str(),
                            scan["scanLocation"]
                                ["stateOrProvinceCode"]
                                .as_str(),
                        ]
                        .into_iter()
                        .flatten()
                        .collect::<Vec<_>>()
                        .join(", ");
                        Some(NewTrackingEvent {
                            event_time,
                            location,
                            status: scan["derivedStatus"]
                                .as_str()
                                .unwrap_or(&description)
                                .to_string(),
                            description,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        if events.is_empty() {
            return Err(CarrierError::NotFound(format!(
                "FedEx returned no scan events for {tracking_number}"
            )));
        }

        let expected = result["estimatedDeliveryTimeWindow"]["window"]
            ["ends"]
            .as_str()
            .or_else(|| {
                result["standardTransitTimeWindow"]["window"]["ends"]
                    .as_str()
            })
            .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
            .map(|d| d.with_timezone(&Utc));

        Ok(TrackingSnapshot::from_events(events, expected))
    }
}

#[async_trait]
impl CarrierClient for FedexApiClient {
    fn name(&self) -> &'static str {
        "fedex-api"
    }

    async fn fetch(
        &self,
        tracking_number: &str,
    ) -> Result<TrackingSnapshot, CarrierError> {
        let bearer = self.bearer().await?;
        let request = serde_json::json!({
            "includeDetailedScans": true,
            "trackingInfo": [{
                "trackingNumberInfo": {
                    "trackingNumber": tracking_number,
                }
            }]
        });

        let response = self
            .http
            .post(TRACK_ENDPOINT)
            .bearer_auth(bearer)
            .json(&request)
            .send()
            .await?;

        if response.status().as_u16() == 401 {
            // Token may have been revoked; drop it so the next call
            // re-authenticates.
            *self.token.lock().await = None;
            return Err(CarrierError::Auth(
                "FedEx rejected the bearer token".to_string(),
            ));
        }

        let payload: Value =
            response.error_for_status()?.json().await?;
        Self::parse_track_result(&payload, tracking_number)
    }
}

static BANNER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""keyStatus"\s*:\s*"([^"]+)""#).expect("static regex")
});

static NOT_FOUND_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(tracking\s+number\s+cannot\s+be\s+found|not\s+found|invalid\s+tracking)")
        .expect("static regex")
});

/// Headless fallback over the public tracking page.
#[derive(Debug, Clone, Default)]
pub struct FedexBrowserClient;

impl FedexBrowserClient {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CarrierClient for FedexBrowserClient {
    fn name(&self) -> &'static str {
        "fedex-browser"
    }

    async fn fetch(
        &self,
        tracking_number: &str,
    ) -> Result<TrackingSnapshot, CarrierError> {
        let url = format!(
            "https://www.fedex.com/fedextrack/?trknbr={tracking_number}"
        );
        let html = browser::rendered_page(url).await?;

        if NOT_FOUND_RE.is_match(&html) {
            return Err(CarrierError::NotFound(format!(
                "FedEx has no record of {tracking_number}"
            )));
        }

        let status = BANNER_RE
            .captures(&html)
            .map(|c| tidy_whitespace(&decode_entities(&c[1])))
            .ok_or_else(|| {
                CarrierError::Transient(format!(
                    "FedEx page had no readable state for {tracking_number}"
                ))
            })?;

        Ok(TrackingSnapshot::from_events(
            vec![NewTrackingEvent {
                event_time: Utc::now(),
                location: String::new(),
                status: status.clone(),
                description: status,
            }],
            None,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracklet_model::ShipmentStatus;

    #[test]
    fn parses_scan_events() {
        let payload = serde_json::json!({
            "output": {"completeTrackResults": [{"trackResults": [{
                "scanEvents": [
                    {
                        "date": "2026-07-30T11:07:00-07:00",
                        "eventDescription": "Delivered",
                        "derivedStatus": "Delivered",
                        "scanLocation": {"city": "Portland", "stateOrProvinceCode": "OR"}
                    },
                    {
                        "date": "2026-07-30T06:10:00-07:00",
                        "eventDescription": "On FedEx vehicle for delivery",
                        "derivedStatus": "Out for delivery",
                        "scanLocation": {"city": "Portland", "stateOrProvinceCode": "OR"}
                    }
                ],
                "estimatedDeliveryTimeWindow": {"window": {"ends": "2026-07-30T20:00:00-07:00"}}
            }]}]}
        });
        let snapshot = FedexApiClient::parse_track_result(
            &payload,
            "449044304137821",
        )
        .unwrap();
        assert_eq!(snapshot.events.len(), 2);
        assert_eq!(snapshot.status, ShipmentStatus::Delivered);
        assert_eq!(snapshot.events[0].location, "Portland, OR");
        assert!(snapshot.expected_delivery.is_some());
    }

    #[test]
    fn maps_not_found_error_code() {
        let payload = serde_json::json!({
            "output": {"completeTrackResults": [{"trackResults": [{
                "error": {"code": "TRACKING.TRACKINGNUMBER.NOTFOUND"}
            }]}]}
        });
        let err = FedexApiClient::parse_track_result(
            &payload,
            "000000000000",
        )
        .unwrap_err();
        assert!(matches!(err, CarrierError::NotFound(_)));
    }
}
