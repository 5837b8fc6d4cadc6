use thiserror::Error;

use crate::carriers::CarrierError;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("validation error: {0}")]
    Validation(#[from] tracklet_model::ModelError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unknown tracking number: {0}")]
    UnknownTracking(String),

    #[error("shipment {0} is already delivered")]
    AlreadyDelivered(i64),

    #[error(
        "refresh rate limited, retry in {remaining_secs} seconds"
    )]
    RateLimited { remaining_secs: i64 },

    #[error(transparent)]
    Carrier(#[from] CarrierError),

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TrackerError {
    /// Whether the scheduler should retry this failure on a later tick.
    ///
    /// Transient and carrier-side rate-limit failures retry; auth and
    /// permanent carrier failures only burn down the retry budget, and
    /// domain errors (unknown tracking, already delivered) never retry.
    pub fn is_transient(&self) -> bool {
        match self {
            TrackerError::Carrier(e) => e.is_retryable(),
            TrackerError::Database(_) | TrackerError::Io(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;
