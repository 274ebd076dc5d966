//! WolfCare Error Types

use axum::http::StatusCode;
use thiserror::Error;

/// Result type alias for WolfCare operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfCare error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Envelope errors
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Unsupported action-object type combination: {action} with {object_type}")]
    UnsupportedOperation { object_type: String, action: String },

    // Record store errors
    #[error("Integrity violation on {object_type}: {reason}")]
    IntegrityViolation { object_type: String, reason: String },

    #[error("{object_type} {id} not found")]
    NotFound { object_type: String, id: String },

    #[error("Invalid record: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    // Delivery errors (dispatcher side only)
    #[error("Delivery to {peer} failed: {reason}")]
    DeliveryFailure { peer: String, reason: String },

    #[error("Peer {peer} rejected envelope with status {status}: {body}")]
    PeerRejected { peer: String, status: u16, body: String },

    #[error("Delivery to {0} timed out")]
    DeliveryTimeout(String),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if a failed delivery should be attempted again with the same envelope
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::DeliveryFailure { .. } | Error::DeliveryTimeout(_) => true,
            Error::PeerRejected { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// HTTP status used when this error crosses the API boundary
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::MalformedEnvelope(_)
            | Error::UnsupportedOperation { .. }
            | Error::Validation(_)
            | Error::Json(_) => StatusCode::BAD_REQUEST,
            Error::IntegrityViolation { .. } => StatusCode::CONFLICT,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::DeliveryFailure { .. }
            | Error::PeerRejected { .. }
            | Error::DeliveryTimeout(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for error responses
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) | Error::ConfigParse(_) => "CONFIG_ERROR",
            Error::MalformedEnvelope(_) => "MALFORMED_ENVELOPE",
            Error::UnsupportedOperation { .. } => "UNSUPPORTED_OPERATION",
            Error::IntegrityViolation { .. } => "INTEGRITY_VIOLATION",
            Error::NotFound { .. } => "NOT_FOUND",
            Error::Validation(_) | Error::Json(_) => "INVALID_REQUEST",
            Error::DeliveryFailure { .. }
            | Error::PeerRejected { .. }
            | Error::DeliveryTimeout(_) => "DELIVERY_FAILURE",
            Error::Storage(_) | Error::Io(_) | Error::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            Error::MalformedEnvelope("no data".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::UnsupportedOperation {
                object_type: "user".into(),
                action: "update".into(),
            }
            .status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::NotFound { object_type: "patient".into(), id: "7".into() }.status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(Error::Storage("disk".into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_retryable() {
        assert!(Error::DeliveryTimeout("http://node-2".into()).is_retryable());
        assert!(Error::PeerRejected { peer: "p".into(), status: 503, body: String::new() }.is_retryable());
        assert!(!Error::PeerRejected { peer: "p".into(), status: 409, body: String::new() }.is_retryable());
        assert!(!Error::MalformedEnvelope("x".into()).is_retryable());
    }
}
