//! Validation service and its HTTP interface

pub mod http;
pub mod service;
pub mod types;

pub use service::{ConsensusService, ValidationRequest};
pub use types::{
    HealthResponse, ObservationPayload, StatsResponse, StatusResponse, ValidatePositionRequest,
    ValidatePositionResponse, ValidationResultPayload,
};
