//! UPS lookup strategies.
//!
//! UPS has no keyless API; the tracking page is rendered by JavaScript, so
//! the browser client leads and the plain scraper is a best-effort
//! fallback. Both read the same embedded state blob.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracklet_model::NewTrackingEvent;

use super::scrape::{decode_entities, fetch_page, tidy_whitespace};
use super::{CarrierClient, CarrierError, TrackingSnapshot, browser};

fn track_url(tracking_number: &str) -> String {
    format!(
        "https://www.ups.com/track?loc=en_US&tracknum={tracking_number}"
    )
}

// The tracking page ships its model as JSON in the DOM; these pick the
// fields out without committing to the surrounding structure.
static ACTIVITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?s)\{[^{}]*"date"\s*:\s*"([^"]+)"[^{}]*"time"\s*:\s*"([^"]*)"[^{}]*"location"\s*:\s*"([^"]*)"[^{}]*"activityScan"\s*:\s*"([^"]+)"[^{}]*\}"#,
    )
    .expect("static regex")
});

static STATUS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""packageStatus"\s*:\s*"([^"]+)""#).expect("static regex")
});

static NOT_FOUND_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(number\s+is\s+invalid|couldn.t\s+find|no\s+details\s+for\s+this\s+number)")
        .expect("static regex")
});

fn parse_activity_time(date: &str, time: &str) -> DateTime<Utc> {
    // Page dates look like "07/30/2026" with "11:07 A.M." style times.
    let cleaned = time.replace('.', "");
    for format in ["%m/%d/%Y %I:%M %p", "%m/%d/%Y"] {
        let stamp = if format.contains("%I") {
            format!("{date} {cleaned}")
        } else {
            date.to_string()
        };
        if let Ok(naive) = NaiveDateTime::parse_from_str(&stamp, format) {
            return naive.and_utc();
        }
        if let Ok(day) =
            chrono::NaiveDate::parse_from_str(&stamp, format)
            && let Some(naive) = day.and_hms_opt(12, 0, 0)
        {
            return naive.and_utc();
        }
    }
    Utc::now()
}

pub(crate) fn parse_page(
    html: &str,
    tracking_number: &str,
) -> Result<TrackingSnapshot, CarrierError> {
    if NOT_FOUND_RE.is_match(html) {
        return Err(CarrierError::NotFound(format!(
            "UPS has no record of {tracking_number}"
        )));
    }

    let mut events: Vec<NewTrackingEvent> = ACTIVITY_RE
        .captures_iter(html)
        .map(|activity| {
            let description = tidy_whitespace(&decode_entities(
                &activity[4],
            ));
            NewTrackingEvent {
                event_time: parse_activity_time(
                    &activity[1],
                    &activity[2],
                ),
                location: tidy_whitespace(&decode_entities(
                    &activity[3],
                )),
                status: description.clone(),
                description,
            }
        })
        .collect();

    if events.is_empty() {
        // Fall back to the status banner when the activity list did not
        // render.
        let status = STATUS_RE
            .captures(html)
            .map(|c| tidy_whitespace(&decode_entities(&c[1])))
            .ok_or_else(|| {
                CarrierError::Transient(format!(
                    "UPS page had no readable state for {tracking_number}"
                ))
            })?;
        events.push(NewTrackingEvent {
            event_time: Utc::now(),
            location: String::new(),
            status: status.clone(),
            description: status,
        });
    }

    Ok(TrackingSnapshot::from_events(events, None))
}

#[derive(Debug, Clone, Default)]
pub struct UpsBrowserClient;

impl UpsBrowserClient {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CarrierClient for UpsBrowserClient {
    fn name(&self) -> &'static str {
        "ups-browser"
    }

    async fn fetch(
        &self,
        tracking_number: &str,
    ) -> Result<TrackingSnapshot, CarrierError> {
        let html =
            browser::rendered_page(track_url(tracking_number)).await?;
        parse_page(&html, tracking_number)
    }
}

#[derive(Debug, Clone)]
pub struct UpsWebClient {
    http: reqwest::Client,
}

impl UpsWebClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl CarrierClient for UpsWebClient {
    fn name(&self) -> &'static str {
        "ups-web"
    }

    async fn fetch(
        &self,
        tracking_number: &str,
    ) -> Result<TrackingSnapshot, CarrierError> {
        let html =
            fetch_page(&self.http, &track_url(tracking_number)).await?;
        parse_page(&html, tracking_number)
    }
}
