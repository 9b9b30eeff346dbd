//! HTTP handlers
//!
//! Every failure is answered with a JSON body `{success: false, message, error}`.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::api::service::ValidationRequest;
use crate::api::types::{
    HealthResponse, ObservationPayload, StatsResponse, StatusResponse, ValidatePositionRequest,
    ValidatePositionResponse,
};
use crate::core::Observation;
use crate::processing::PutOutcome;
use crate::validation::ServiceError;
use crate::AppState;

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServiceError::MalformedObservation(_) | ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::InternalTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = json!({
            "success": false,
            "message": self.to_string(),
            "error": self.kind(),
        });

        (status, Json(body)).into_response()
    }
}

fn bad_request(rejection: JsonRejection) -> ServiceError {
    debug!(error = %rejection.body_text(), "Unparsable request body");
    ServiceError::BadRequest(rejection.body_text())
}

/// POST /submit_observation
pub async fn submit_observation(
    State(state): State<AppState>,
    payload: Result<Json<ObservationPayload>, JsonRejection>,
) -> Result<Json<StatusResponse>, ServiceError> {
    let Json(payload) = payload.map_err(bad_request)?;
    let observation = Observation::from(payload);
    let observer_id = observation.observer_id.clone();
    let target_id = observation.target_id.clone();

    let receipt = state.service.submit(observation)?;

    let mut message = match receipt.outcome {
        PutOutcome::Inserted => format!("Stored observation of {} from {}", target_id, observer_id),
        PutOutcome::Replaced => format!("Replaced observation of {} from {}", target_id, observer_id),
    };
    if receipt.renormalized {
        message.push_str(" (direction renormalized)");
    }

    Ok(Json(StatusResponse {
        success: true,
        message,
    }))
}

/// POST /validate_position
pub async fn validate_position(
    State(state): State<AppState>,
    payload: Result<Json<ValidatePositionRequest>, JsonRejection>,
) -> Result<Json<ValidatePositionResponse>, ServiceError> {
    let Json(payload) = payload.map_err(bad_request)?;

    let request = ValidationRequest {
        target_id: payload.target_id,
        observations: payload
            .observations
            .map(|list| list.into_iter().map(Observation::from).collect()),
        timeout: payload.timeout_ms.map(Duration::from_millis),
    };

    let result = Arc::clone(&state.service).validate(request).await.map_err(|err| {
        if !matches!(err, ServiceError::InternalTimeout { .. }) {
            warn!(error = %err, "Validation failed");
        }
        err
    })?;

    Ok(Json(ValidatePositionResponse {
        success: true,
        data: result.into(),
    }))
}

/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        module: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /stats
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        store: state.service.store_stats(),
        performance: state.service.performance_metrics(),
    })
}
