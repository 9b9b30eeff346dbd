//! Observer Consensus Service
//!
//! Independent observers submit direction-and-range measurements of tracked
//! targets. The service triangulates a consensus position from whatever
//! observations it holds and scores confidence by the number of agreeing
//! witnesses.

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod core;
pub mod algorithms;
pub mod processing;
pub mod validation;
pub mod utils;
pub mod api;

// Re-export commonly used types
pub use crate::core::{EntityId, Observation, ObserverId, TargetId, ValidationMethod, ValidationOutcome, ValidationResult};
pub use crate::algorithms::{ConfidenceScorer, RayTriangulator, Triangulation};
pub use crate::processing::ObservationStore;
pub use crate::validation::{ObservationError, ObservationValidator, ServiceError, ServiceResult};
pub use crate::utils::{ConfigError, PerformanceMonitor, ServiceConfig};
pub use crate::api::{ConsensusService, ValidationRequest};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ConsensusService>,
}

impl AppState {
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            service: Arc::new(ConsensusService::new(config)),
        }
    }

    pub fn with_service(service: Arc<ConsensusService>) -> Self {
        Self { service }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/submit_observation", post(api::http::submit_observation))
        .route("/validate_position", post(api::http::validate_position))
        .route("/health", get(api::http::health_check))
        .route("/stats", get(api::http::stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
