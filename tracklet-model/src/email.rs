use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::carrier::Carrier;

/// How a mailbox pass located the message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum EmailScanMethod {
    Search,
    TimeWindow,
}

/// Terminal state of a processed mailbox message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum EmailProcessingStatus {
    Processed,
    Failed,
    Skipped,
}

/// Ingestion state for a single mailbox message.
///
/// A provider message id is processed at most once per mailbox; the record
/// reaches its terminal status before the worker advances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailProcessingRecord {
    pub message_id: String,
    pub thread_id: Option<String>,
    pub from: String,
    pub subject: String,
    pub received_at: DateTime<Utc>,
    pub body_text: String,
    pub body_html: String,
    pub scan_method: EmailScanMethod,
    pub processed_at: DateTime<Utc>,
    pub status: EmailProcessingStatus,
    /// Ordered; may be empty when nothing was extracted.
    pub tracking_numbers: Vec<String>,
    pub error: Option<String>,
}

/// A message as fetched from the mailbox, before any processing.
#[derive(Debug, Clone)]
pub struct MailMessage {
    pub uid: u32,
    pub message_id: String,
    pub thread_id: Option<String>,
    pub from: String,
    pub subject: String,
    pub received_at: DateTime<Utc>,
    pub body_text: String,
    pub body_html: String,
}

/// Where a tracking candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    Regex,
    Llm,
    Merged,
}

/// A tracking number spotted in an email, not yet validated with a carrier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingCandidate {
    pub tracking_number: String,
    pub carrier: Carrier,
    pub description: Option<String>,
    pub merchant: Option<String>,
    pub confidence: f64,
    pub source: CandidateSource,
}

impl TrackingCandidate {
    /// Compose the shipment description: "description from merchant" when
    /// both are present, else whichever exists, else a generic fallback.
    pub fn shipment_description(&self) -> String {
        match (
            self.description.as_deref().filter(|s| !s.is_empty()),
            self.merchant.as_deref().filter(|s| !s.is_empty()),
        ) {
            (Some(desc), Some(merchant)) => {
                format!("{desc} from {merchant}")
            }
            (Some(desc), None) => desc.to_string(),
            (None, Some(merchant)) => format!("Package from {merchant}"),
            (None, None) => {
                format!("{} shipment", self.carrier.display_name())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(
        description: Option<&str>,
        merchant: Option<&str>,
    ) -> TrackingCandidate {
        TrackingCandidate {
            tracking_number: "1Z999AA10123456784".to_string(),
            carrier: Carrier::Ups,
            description: description.map(str::to_string),
            merchant: merchant.map(str::to_string),
            confidence: 0.9,
            source: CandidateSource::Merged,
        }
    }

    #[test]
    fn composes_description_variants() {
        assert_eq!(
            candidate(Some("order"), Some("Acme")).shipment_description(),
            "order from Acme"
        );
        assert_eq!(
            candidate(Some("order"), None).shipment_description(),
            "order"
        );
        assert_eq!(
            candidate(None, Some("Acme")).shipment_description(),
            "Package from Acme"
        );
        assert_eq!(
            candidate(None, None).shipment_description(),
            "UPS shipment"
        );
        assert_eq!(
            candidate(Some(""), Some("")).shipment_description(),
            "UPS shipment"
        );
    }
}
