//! Request and response bodies for the HTTP interface
//!
//! Vectors travel as `[x, y, z]` arrays and are converted to nalgebra types
//! at the boundary.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::core::{
    unix_time_secs, EntityId, Observation, ValidationMethod, ValidationOutcome, ValidationResult,
};
use crate::processing::StoreStats;
use crate::utils::PerformanceMetrics;

/// One observation as submitted by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationPayload {
    pub observer_id: EntityId,
    pub target_id: EntityId,
    pub observer_position: [f64; 3],
    pub direction: [f64; 3],
    pub distance: f64,
    #[serde(default = "default_scale_factor")]
    pub scale_factor: f64,
    /// Seconds since the Unix epoch; the service clock is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

fn default_scale_factor() -> f64 {
    1.0
}

impl From<ObservationPayload> for Observation {
    fn from(payload: ObservationPayload) -> Self {
        Observation {
            observer_id: payload.observer_id,
            target_id: payload.target_id,
            observer_position: Vector3::from(payload.observer_position),
            direction: Vector3::from(payload.direction),
            distance: payload.distance,
            scale_factor: payload.scale_factor,
            timestamp: payload.timestamp.unwrap_or_else(unix_time_secs),
        }
    }
}

impl From<&Observation> for ObservationPayload {
    fn from(observation: &Observation) -> Self {
        ObservationPayload {
            observer_id: observation.observer_id.clone(),
            target_id: observation.target_id.clone(),
            observer_position: observation.observer_position.into(),
            direction: observation.direction.into(),
            distance: observation.distance,
            scale_factor: observation.scale_factor,
            timestamp: Some(observation.timestamp),
        }
    }
}

/// Body of `POST /validate_position`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatePositionRequest {
    pub target_id: EntityId,
    /// Observations to use instead of the stored ones
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observations: Option<Vec<ObservationPayload>>,
    /// Per-request deadline override (milliseconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Generic `{success, message}` reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub success: bool,
    pub message: String,
}

/// Validation result as sent over the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResultPayload {
    pub target_id: EntityId,
    pub valid: bool,
    pub triangulated_position: [f64; 3],
    pub confidence: f64,
    pub observer_count: usize,
    /// `null` when no triangulation was possible
    pub geometric_error: Option<f64>,
    pub validation_method: ValidationMethod,
    pub outcome: ValidationOutcome,
    pub rejected_observations: usize,
}

impl From<ValidationResult> for ValidationResultPayload {
    fn from(result: ValidationResult) -> Self {
        ValidationResultPayload {
            target_id: result.target_id,
            valid: result.valid,
            triangulated_position: result.triangulated_position.into(),
            confidence: result.confidence,
            observer_count: result.observer_count,
            geometric_error: Some(result.geometric_error).filter(|e| e.is_finite()),
            validation_method: result.validation_method,
            outcome: result.outcome,
            rejected_observations: result.rejected_observations,
        }
    }
}

/// Body of a successful `POST /validate_position`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatePositionResponse {
    pub success: bool,
    pub data: ValidationResultPayload,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
}

/// `GET /stats` response
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub store: StoreStats,
    pub performance: PerformanceMetrics,
}
