//! DHL lookup strategies. Browser first, plain scrape as the fallback;
//! both read the JSON the tracking page embeds in its DOM.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracklet_model::NewTrackingEvent;

use super::scrape::{decode_entities, fetch_page, tidy_whitespace};
use super::{CarrierClient, CarrierError, TrackingSnapshot, browser};

fn track_url(tracking_number: &str) -> String {
    format!(
        "https://www.dhl.com/us-en/home/tracking/tracking-express.html?submit=1&tracking-id={tracking_number}"
    )
}

static CHECKPOINT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?s)\{[^{}]*"date"\s*:\s*"([^"]+)"[^{}]*"description"\s*:\s*"([^"]+)"[^{}]*"location"\s*:\s*"([^"]*)"[^{}]*\}"#,
    )
    .expect("static regex")
});

static STATUS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""statusText"\s*:\s*"([^"]+)""#).expect("static regex")
});

static NOT_FOUND_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(no\s+shipments?\s+found|could\s+not\s+be\s+found|tracking\s+attempt\s+was\s+not\s+successful)")
        .expect("static regex")
});

fn parse_checkpoint_time(raw: &str) -> DateTime<Utc> {
    if let Ok(stamp) = DateTime::parse_from_rfc3339(raw) {
        return stamp.with_timezone(&Utc);
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%d"] {
        if let Ok(naive) =
            chrono::NaiveDateTime::parse_from_str(raw, format)
        {
            return naive.and_utc();
        }
        if let Ok(day) = chrono::NaiveDate::parse_from_str(raw, format)
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
            "DHL has no record of {tracking_number}"
        )));
    }

    let mut events: Vec<NewTrackingEvent> = CHECKPOINT_RE
        .captures_iter(html)
        .map(|checkpoint| {
            let description = tidy_whitespace(&decode_entities(
                &checkpoint[2],
            ));
            NewTrackingEvent {
                event_time: parse_checkpoint_time(&checkpoint[1]),
                location: tidy_whitespace(&decode_entities(
                    &checkpoint[3],
                )),
                status: description.clone(),
                description,
            }
        })
        .collect();

    if events.is_empty() {
        let status = STATUS_RE
            .captures(html)
            .map(|c| tidy_whitespace(&decode_entities(&c[1])))
            .ok_or_else(|| {
                CarrierError::Transient(format!(
                    "DHL page had no readable state for {tracking_number}"
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
pub struct DhlBrowserClient;

impl DhlBrowserClient {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CarrierClient for DhlBrowserClient {
    fn name(&self) -> &'static str {
        "dhl-browser"
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
pub struct DhlWebClient {
    http: reqwest::Client,
}

impl DhlWebClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl CarrierClient for DhlWebClient {
    fn name(&self) -> &'static str {
        "dhl-web"
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
