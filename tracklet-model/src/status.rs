use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Derived delivery state of a shipment.
///
/// The status is recomputed from the most recent tracking event on every
/// refresh; `Delivered` latches and is never left again.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ShipmentStatus {
    Pending,
    PreShip,
    InTransit,
    OutForDelivery,
    Delivered,
    Exception,
    Returned,
}

impl ShipmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShipmentStatus::Pending => "pending",
            ShipmentStatus::PreShip => "pre_ship",
            ShipmentStatus::InTransit => "in_transit",
            ShipmentStatus::OutForDelivery => "out_for_delivery",
            ShipmentStatus::Delivered => "delivered",
            ShipmentStatus::Exception => "exception",
            ShipmentStatus::Returned => "returned",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ShipmentStatus::Delivered)
    }

    /// Classify a free-form carrier status string.
    ///
    /// Carriers do not share a vocabulary; this maps the phrases seen across
    /// UPS, USPS, FedEx, and DHL feeds onto our enum, defaulting to
    /// `InTransit` for anything that merely looks like movement.
    pub fn from_carrier_status(raw: &str) -> Self {
        let lowered = raw.to_lowercase();
        if lowered.contains("delivered") {
            ShipmentStatus::Delivered
        } else if lowered.contains("out for delivery") {
            ShipmentStatus::OutForDelivery
        } else if lowered.contains("return") {
            ShipmentStatus::Returned
        } else if lowered.contains("exception")
            || lowered.contains("alert")
            || lowered.contains("failed")
            || lowered.contains("undeliverable")
        {
            ShipmentStatus::Exception
        } else if lowered.contains("label created")
            || lowered.contains("pre-shipment")
            || lowered.contains("shipping label")
            || lowered.contains("order processed")
        {
            ShipmentStatus::PreShip
        } else if lowered.contains("transit")
            || lowered.contains("departed")
            || lowered.contains("arrived")
            || lowered.contains("picked up")
            || lowered.contains("accepted")
            || lowered.contains("in progress")
            || lowered.contains("on its way")
        {
            ShipmentStatus::InTransit
        } else {
            ShipmentStatus::Pending
        }
    }
}

impl Default for ShipmentStatus {
    fn default() -> Self {
        ShipmentStatus::Pending
    }
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShipmentStatus {
    type Err = crate::error::ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ShipmentStatus::Pending),
            "pre_ship" => Ok(ShipmentStatus::PreShip),
            "in_transit" => Ok(ShipmentStatus::InTransit),
            "out_for_delivery" => Ok(ShipmentStatus::OutForDelivery),
            "delivered" => Ok(ShipmentStatus::Delivered),
            "exception" => Ok(ShipmentStatus::Exception),
            "returned" => Ok(ShipmentStatus::Returned),
            other => Err(crate::error::ModelError::InvalidField {
                field: "status",
                reason: format!("unknown status: {other}"),
            }),
        }
    }
}
