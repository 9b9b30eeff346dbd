//! Error taxonomy for observation ingestion and validation
//!
//! Insufficient observers and degenerate geometry are not errors here: they
//! are reported as [`ValidationMethod`](crate::core::ValidationMethod) states
//! so callers decide policy.

use thiserror::Error;

use crate::core::TargetId;

/// Reasons a client observation is rejected at the boundary
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ObservationError {
    #[error("{field} contains a non-finite component")]
    NonFiniteComponent { field: &'static str },

    #[error("direction has zero length")]
    ZeroDirection,

    #[error("direction length {norm:.4} deviates more than {percent:.0}% from unit length",
            percent = .tolerance * 100.0)]
    DirectionNotNormalized { norm: f64, tolerance: f64 },

    #[error("distance must be finite and non-negative, got {0}")]
    InvalidDistance(f64),

    #[error("scale_factor must be finite and positive, got {0}")]
    InvalidScaleFactor(f64),

    #[error("timestamp must be finite, got {0}")]
    InvalidTimestamp(f64),

    #[error("observation targets {found}, expected {expected}")]
    TargetMismatch { expected: TargetId, found: TargetId },
}

/// Result alias for boundary checks
pub type ObservationResult<T> = std::result::Result<T, ObservationError>;

/// Failures surfaced by the consensus service to its clients
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Rejected per submission; other observers' data is unaffected
    #[error("Malformed observation: {0}")]
    MalformedObservation(#[from] ObservationError),

    /// Validation exceeded its deadline; the store is left untouched
    #[error("Validation exceeded deadline of {timeout_ms} ms")]
    InternalTimeout { timeout_ms: u64 },

    /// Request body could not be understood
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

impl ServiceError {
    /// Stable name for logs and statistics
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::MalformedObservation(_) => "MalformedObservation",
            ServiceError::InternalTimeout { .. } => "InternalTimeout",
            ServiceError::BadRequest(_) => "BadRequest",
            ServiceError::Internal(_) => "Internal",
        }
    }
}
