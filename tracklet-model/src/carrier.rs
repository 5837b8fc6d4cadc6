use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// A shipping company whose tracking system Tracklet queries.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Carrier {
    Ups,
    Usps,
    Fedex,
    Dhl,
}

impl Carrier {
    /// Every carrier Tracklet knows how to query, in scheduler order.
    pub const ALL: [Carrier; 4] =
        [Carrier::Ups, Carrier::Usps, Carrier::Fedex, Carrier::Dhl];

    pub fn as_str(&self) -> &'static str {
        match self {
            Carrier::Ups => "ups",
            Carrier::Usps => "usps",
            Carrier::Fedex => "fedex",
            Carrier::Dhl => "dhl",
        }
    }

    /// Human-facing carrier name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Carrier::Ups => "UPS",
            Carrier::Usps => "USPS",
            Carrier::Fedex => "FedEx",
            Carrier::Dhl => "DHL",
        }
    }

    /// Whether the carrier's API accepts multiple tracking numbers per call.
    ///
    /// Only the USPS tracking API supports batching; everyone else is
    /// strictly one number per request.
    pub fn supports_batch(&self) -> bool {
        matches!(self, Carrier::Usps)
    }

    /// Upper bound on tracking numbers per batched request.
    pub fn batch_ceiling(&self) -> usize {
        if self.supports_batch() { 10 } else { 1 }
    }
}

impl fmt::Display for Carrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Carrier {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ups" => Ok(Carrier::Ups),
            "usps" => Ok(Carrier::Usps),
            "fedex" => Ok(Carrier::Fedex),
            "dhl" => Ok(Carrier::Dhl),
            other => Err(ModelError::UnknownCarrier(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_codes_case_insensitively() {
        assert_eq!("UPS".parse::<Carrier>().unwrap(), Carrier::Ups);
        assert_eq!(" fedex ".parse::<Carrier>().unwrap(), Carrier::Fedex);
        assert!("pigeon".parse::<Carrier>().is_err());
    }

    #[test]
    fn round_trips_through_as_str() {
        for carrier in Carrier::ALL {
            assert_eq!(carrier.as_str().parse::<Carrier>().unwrap(), carrier);
        }
    }

    #[test]
    fn only_usps_batches() {
        assert_eq!(Carrier::Usps.batch_ceiling(), 10);
        assert_eq!(Carrier::Ups.batch_ceiling(), 1);
        assert!(!Carrier::Dhl.supports_batch());
    }
}
