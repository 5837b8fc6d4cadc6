use thiserror::Error;

/// Validation failures raised while constructing model values.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("unknown carrier code: {0}")]
    UnknownCarrier(String),

    #[error("invalid tracking number: {0}")]
    InvalidTrackingNumber(String),

    #[error("invalid field {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, ModelError>;
