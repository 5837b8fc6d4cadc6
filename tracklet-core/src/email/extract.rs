//! Tracking-number extraction from email text.
//!
//! The regex extractor is authoritative for tracking-number values and
//! carrier guesses; the LLM (when present) contributes description and
//! merchant. Merging dedups by (number, carrier) and only trusts LLM
//! fields at or above the confidence floor.

use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use tracklet_model::email::CandidateSource;
use tracklet_model::{Carrier, TrackingCandidate};

use super::sanitize::sanitize_tracking_number;

/// LLM fields below this confidence are discarded.
pub const LLM_CONFIDENCE_FLOOR: f64 = 0.7;

struct CarrierPattern {
    carrier: Carrier,
    regex: &'static Lazy<Regex>,
}

static UPS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b1Z[0-9A-Z]{16}\b").expect("static regex")
});

// 92/93/94/95-prefixed IMpb barcodes (20-26 digits) plus the 13-character
// international form, e.g. EC123456789US.
static USPS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(9[2345]\d{18,24}|[A-Z]{2}\d{9}US)\b")
        .expect("static regex")
});

static FEDEX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{15}|\d{12})\b").expect("static regex")
});

static DHL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b\d{10}\b").expect("static regex")
});

/// Ordered most-specific first so a number claims its best carrier guess
/// before a looser pattern can.
static PATTERNS: &[CarrierPattern] = &[
    CarrierPattern {
        carrier: Carrier::Ups,
        regex: &UPS_RE,
    },
    CarrierPattern {
        carrier: Carrier::Usps,
        regex: &USPS_RE,
    },
    CarrierPattern {
        carrier: Carrier::Fedex,
        regex: &FEDEX_RE,
    },
    CarrierPattern {
        carrier: Carrier::Dhl,
        regex: &DHL_RE,
    },
];

/// Whether `number` matches the carrier's tracking-number format exactly.
pub fn matches_carrier_format(number: &str, carrier: Carrier) -> bool {
    PATTERNS
        .iter()
        .filter(|p| p.carrier == carrier)
        .any(|p| {
            p.regex
                .find(number)
                .is_some_and(|m| m.as_str() == number)
        })
}

/// Enumerate every carrier-format match in `text` with a carrier guess.
pub fn extract_regex(text: &str) -> Vec<TrackingCandidate> {
    let mut candidates: Vec<TrackingCandidate> = Vec::new();
    let mut seen: Vec<String> = Vec::new();

    for pattern in PATTERNS {
        for found in pattern.regex.find_iter(text) {
            let number = sanitize_tracking_number(found.as_str());
            if number.is_empty() || seen.contains(&number) {
                continue;
            }
            seen.push(number.clone());
            candidates.push(TrackingCandidate {
                tracking_number: number,
                carrier: pattern.carrier,
                description: None,
                merchant: None,
                confidence: 1.0,
                source: CandidateSource::Regex,
            });
        }
    }
    candidates
}

/// One entry of the LLM's JSON-array answer.
#[derive(Debug, serde::Deserialize)]
struct LlmCandidate {
    tracking_number: String,
    carrier: Option<String>,
    #[serde(default)]
    confidence: f64,
    description: Option<String>,
    merchant: Option<String>,
}

/// Parse the model's reply leniently: take the outermost JSON array,
/// tolerate prose around it, and drop entries that do not deserialize.
pub fn parse_llm_candidates(reply: &str) -> Vec<TrackingCandidate> {
    let start = reply.find('[');
    let end = reply.rfind(']');
    let (Some(start), Some(end)) = (start, end) else {
        return Vec::new();
    };
    if start >= end {
        return Vec::new();
    }

    let parsed: Vec<serde_json::Value> =
        match serde_json::from_str(&reply[start..=end]) {
            Ok(values) => values,
            Err(_) => return Vec::new(),
        };

    parsed
        .into_iter()
        .filter_map(|value| {
            let entry: LlmCandidate =
                serde_json::from_value(value).ok()?;
            let number =
                sanitize_tracking_number(&entry.tracking_number);
            if number.is_empty() {
                return None;
            }
            let carrier =
                Carrier::from_str(entry.carrier.as_deref()?).ok()?;
            Some(TrackingCandidate {
                tracking_number: number,
                carrier,
                description: entry
                    .description
                    .filter(|d| !d.trim().is_empty()),
                merchant: entry
                    .merchant
                    .filter(|m| !m.trim().is_empty()),
                confidence: entry.confidence,
                source: CandidateSource::Llm,
            })
        })
        .collect()
}

/// Merge the two extractors' output.
///
/// Regex wins on number and carrier. An LLM entry for the same number
/// enriches it with description and merchant when its confidence clears
/// the floor. LLM-only numbers are kept only when they clear the floor
/// AND match their claimed carrier's format, which keeps the regex
/// patterns authoritative over values.
pub fn merge_candidates(
    regex_candidates: Vec<TrackingCandidate>,
    llm_candidates: Vec<TrackingCandidate>,
) -> Vec<TrackingCandidate> {
    let mut merged: Vec<TrackingCandidate> = Vec::new();

    for mut candidate in regex_candidates {
        if let Some(llm) = llm_candidates
            .iter()
            .find(|l| l.tracking_number == candidate.tracking_number)
            && llm.confidence >= LLM_CONFIDENCE_FLOOR
        {
            candidate.description = llm.description.clone();
            candidate.merchant = llm.merchant.clone();
            candidate.confidence = llm.confidence;
            candidate.source = CandidateSource::Merged;
        }
        merged.push(candidate);
    }

    for llm in llm_candidates {
        let duplicate = merged.iter().any(|m| {
            m.tracking_number == llm.tracking_number
                && m.carrier == llm.carrier
        });
        if duplicate
            || llm.confidence < LLM_CONFIDENCE_FLOOR
            || !matches_carrier_format(
                &llm.tracking_number,
                llm.carrier,
            )
        {
            continue;
        }
        merged.push(llm);
    }

    merged
}
