//! USPS lookup strategies.
//!
//! The Web Tools `TrackV2` API takes up to ten tracking numbers per
//! request, which is what the auto-update scheduler batches against. The
//! scraping client is the keyless fallback.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracklet_model::NewTrackingEvent;

use super::scrape::{decode_entities, fetch_page, tidy_whitespace};
use super::{CarrierClient, CarrierError, TrackingSnapshot};

const API_ENDPOINT: &str =
    "https://secure.shippingapis.com/ShippingAPI.dll";

static TRACK_INFO_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?s)<TrackInfo ID="([^"]+)"[^>]*>(.*?)</TrackInfo>"#,
    )
    .expect("static regex")
});

static EVENT_BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<(TrackSummary|TrackDetail)>(.*?)</(?:TrackSummary|TrackDetail)>")
        .expect("static regex")
});

static ERROR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<Error>.*?<Description>(.*?)</Description>.*?</Error>")
        .expect("static regex")
});

fn tag(block: &str, name: &str) -> Option<String> {
    let open = format!("<{name}>");
    let close = format!("</{name}>");
    let start = block.find(&open)? + open.len();
    let end = block[start..].find(&close)? + start;
    let value = decode_entities(block[start..end].trim());
    (!value.is_empty()).then_some(value)
}

fn parse_event_time(
    time: Option<&str>,
    date: Option<&str>,
) -> DateTime<Utc> {
    if let Some(date) = date {
        let stamp = match time {
            Some(time) => format!("{time} {date}"),
            None => format!("12:00 pm {date}"),
        };
        for format in ["%I:%M %p %B %d, %Y", "%I:%M%p %B %d, %Y"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(&stamp, format)
            {
                return naive.and_utc();
            }
        }
        if let Ok(day) = NaiveDate::parse_from_str(date, "%B %d, %Y")
            && let Some(naive) = day.and_hms_opt(12, 0, 0)
        {
            return naive.and_utc();
        }
    }
    Utc::now()
}

fn parse_track_info(body: &str) -> Result<TrackingSnapshot, CarrierError> {
    if let Some(error) = ERROR_RE.captures(body) {
        let description = tidy_whitespace(&error[1]);
        let lowered = description.to_lowercase();
        if lowered.contains("could not locate")
            || lowered.contains("not found")
        {
            return Err(CarrierError::NotFound(description));
        }
        return Err(CarrierError::Permanent(description));
    }

    let mut events = Vec::new();
    for block in EVENT_BLOCK_RE.captures_iter(body) {
        let block = &block[2];
        let Some(description) = tag(block, "Event") else {
            continue;
        };
        let location = [
            tag(block, "EventCity"),
            tag(block, "EventState"),
            tag(block, "EventZIPCode"),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(", ");

        events.push(NewTrackingEvent {
            event_time: parse_event_time(
                tag(block, "EventTime").as_deref(),
                tag(block, "EventDate").as_deref(),
            ),
            location,
            status: description.clone(),
            description,
        });
    }

    if events.is_empty() {
        return Err(CarrierError::NotFound(
            "USPS returned no tracking events".to_string(),
        ));
    }

    let expected = tag(body, "ExpectedDeliveryDate").map(|date| {
        parse_event_time(None, Some(&date))
    });

    Ok(TrackingSnapshot::from_events(events, expected))
}

/// Web Tools `TrackV2` client.
#[derive(Debug, Clone)]
pub struct UspsApiClient {
    http: reqwest::Client,
    user_id: String,
}

impl UspsApiClient {
    pub fn new(http: reqwest::Client, user_id: String) -> Self {
        Self { http, user_id }
    }

    fn request_xml(&self, tracking_numbers: &[String]) -> String {
        let ids: String = tracking_numbers
            .iter()
            .map(|n| format!(r#"<TrackID ID="{n}"/>"#))
            .collect();
        format!(
            r#"<TrackFieldRequest USERID="{}"><Revision>1</Revision><ClientIp>127.0.0.1</ClientIp><SourceId>tracklet</SourceId>{ids}</TrackFieldRequest>"#,
            self.user_id
        )
    }

    async fn call(
        &self,
        tracking_numbers: &[String],
    ) -> Result<String, CarrierError> {
        let response = self
            .http
            .get(API_ENDPOINT)
            .query(&[
                ("API", "TrackV2"),
                ("XML", &self.request_xml(tracking_numbers)),
            ])
            .send()
            .await?;

        let body = response.error_for_status()?.text().await?;
        let lowered = body.to_lowercase();
        if lowered.contains("authorization failure")
            || lowered.contains("username is invalid")
        {
            return Err(CarrierError::Auth(
                "USPS rejected the API user id".to_string(),
            ));
        }
        Ok(body)
    }
}

#[async_trait]
impl CarrierClient for UspsApiClient {
    fn name(&self) -> &'static str {
        "usps-api"
    }

    async fn fetch(
        &self,
        tracking_number: &str,
    ) -> Result<TrackingSnapshot, CarrierError> {
        let numbers = vec![tracking_number.to_string()];
        let mut results = self.fetch_batch(&numbers).await;
        match results.pop() {
            Some((_, result)) => result,
            None => Err(CarrierError::Transient(
                "USPS returned an empty response".to_string(),
            )),
        }
    }

    async fn fetch_batch(
        &self,
        tracking_numbers: &[String],
    ) -> Vec<(String, Result<TrackingSnapshot, CarrierError>)> {
        let body = match self.call(tracking_numbers).await {
            Ok(body) => body,
            Err(err) => {
                // A request-level failure fails every number in the batch;
                // the scheduler re-issues them individually.
                return tracking_numbers
                    .iter()
                    .map(|n| {
                        (
                            n.clone(),
                            Err(CarrierError::Transient(format!(
                                "USPS batch failed: {err}"
                            ))),
                        )
                    })
                    .collect();
            }
        };

        let mut by_id = std::collections::HashMap::new();
        for info in TRACK_INFO_RE.captures_iter(&body) {
            by_id.insert(
                info[1].to_string(),
                parse_track_info(&info[2]),
            );
        }

        tracking_numbers
            .iter()
            .map(|number| {
                let result =
                    by_id.remove(number).unwrap_or_else(|| {
                        Err(CarrierError::NotFound(format!(
                            "USPS response omitted {number}"
                        )))
                    });
                (number.clone(), result)
            })
            .collect()
    }
}

static WEB_STATUS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)class="tb-status[^"]*"[^>]*>([^<]+)<"#)
        .expect("static regex")
});

static WEB_BANNER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)class="delivery_status[^"]*".*?<strong>([^<]+)</strong>"#)
        .expect("static regex")
});

/// Keyless fallback that reads the public tracking page.
#[derive(Debug, Clone)]
pub struct UspsWebClient {
    http: reqwest::Client,
}

impl UspsWebClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl CarrierClient for UspsWebClient {
    fn name(&self) -> &'static str {
        "usps-web"
    }

    async fn fetch(
        &self,
        tracking_number: &str,
    ) -> Result<TrackingSnapshot, CarrierError> {
        let url = format!(
            "https://tools.usps.com/go/TrackConfirmAction?tLabels={tracking_number}"
        );
        let page = fetch_page(&self.http, &url).await?;

        let status = WEB_STATUS_RE
            .captures(&page)
            .or_else(|| WEB_BANNER_RE.captures(&page))
            .map(|c| tidy_whitespace(&decode_entities(&c[1])))
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                CarrierError::NotFound(format!(
                    "no status on USPS page for {tracking_number}"
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

    const DELIVERED_XML: &str = r#"<TrackResponse><TrackInfo ID="9405511206213119531111">
        <TrackSummary><EventTime>11:07 am</EventTime><EventDate>July 30, 2026</EventDate><Event>Delivered, In/At Mailbox</Event><EventCity>PORTLAND</EventCity><EventState>OR</EventState><EventZIPCode>97201</EventZIPCode></TrackSummary>
        <TrackDetail><EventTime>6:10 am</EventTime><EventDate>July 30, 2026</EventDate><Event>Out for Delivery</Event><EventCity>PORTLAND</EventCity><EventState>OR</EventState></TrackDetail>
    </TrackInfo></TrackResponse>"#;

    const NOT_FOUND_XML: &str = r#"<TrackResponse><TrackInfo ID="9400100000000000000000">
        <Error><Number>-2147219283</Number><Description>A status update is not yet available... could not locate the tracking information</Description></Error>
    </TrackInfo></TrackResponse>"#;

    #[test]
    fn parses_delivered_track_info() {
        let info = TRACK_INFO_RE.captures(DELIVERED_XML).unwrap();
        let snapshot = parse_track_info(&info[2]).unwrap();
        assert_eq!(snapshot.status, ShipmentStatus::Delivered);
        assert_eq!(snapshot.events.len(), 2);
        assert_eq!(
            snapshot.events[0].description,
            "Delivered, In/At Mailbox"
        );
        assert_eq!(
            snapshot.events[0].location,
            "PORTLAND, OR, 97201"
        );
        assert_eq!(
            snapshot.events[0].event_time.format("%H:%M").to_string(),
            "11:07"
        );
    }

    #[test]
    fn maps_missing_tracking_to_not_found() {
        let info = TRACK_INFO_RE.captures(NOT_FOUND_XML).unwrap();
        let err = parse_track_info(&info[2]).unwrap_err();
        assert!(matches!(err, CarrierError::NotFound(_)));
    }

    #[test]
    fn batch_request_lists_every_id() {
        let client = UspsApiClient::new(
            reqwest::Client::new(),
            "USER123".to_string(),
        );
        let xml = client.request_xml(&[
            "9405511206213119531111".to_string(),
            "9405511206213119532222".to_string(),
        ]);
        assert_eq!(xml.matches("<TrackID").count(), 2);
        assert!(xml.contains(r#"USERID="USER123""#));
    }
}
