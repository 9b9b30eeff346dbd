//! Observation validation and error types

pub mod data;
pub mod error;

pub use data::{BatchValidation, CheckedObservation, ObservationValidator, ValidationConfig};
pub use error::{ObservationError, ObservationResult, ServiceError, ServiceResult};
