//! Validation service orchestration
//!
//! Each validation request moves through `Collecting → Scoring → outcome`:
//! the observation set is taken from the request (when non-empty) or from a
//! store snapshot, triangulated, scored and mapped to
//! [`ValidationOutcome`]. Validation only reads the store.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::algorithms::{ConfidenceScorer, RayTriangulator};
use crate::core::{Observation, TargetId, ValidationMethod, ValidationOutcome, ValidationResult};
use crate::processing::{ObservationStore, PutReceipt, StoreStats};
use crate::utils::{PerformanceMetrics, PerformanceMonitor, PerformanceThresholds, ServiceConfig};
use crate::validation::{ObservationValidator, ServiceError, ServiceResult};

/// A validation request after parsing
#[derive(Debug, Clone)]
pub struct ValidationRequest {
    pub target_id: TargetId,
    /// Request-supplied observations; empty or absent means use the store
    pub observations: Option<Vec<Observation>>,
    /// Overrides the service's default deadline
    pub timeout: Option<Duration>,
}

impl ValidationRequest {
    pub fn for_target(target_id: impl Into<TargetId>) -> Self {
        Self {
            target_id: target_id.into(),
            observations: None,
            timeout: None,
        }
    }

    pub fn with_observations(mut self, observations: Vec<Observation>) -> Self {
        self.observations = Some(observations);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Owns the store, the algorithms and the latency monitor
pub struct ConsensusService {
    store: ObservationStore,
    triangulator: RayTriangulator,
    scorer: ConfidenceScorer,
    monitor: PerformanceMonitor,
    request_timeout: Duration,
    degraded_observer_cap: usize,
}

impl Default for ConsensusService {
    fn default() -> Self {
        Self::new(&ServiceConfig::default())
    }
}

impl ConsensusService {
    pub fn new(config: &ServiceConfig) -> Self {
        let validator = ObservationValidator::with_config(config.validation_config());
        let thresholds = PerformanceThresholds {
            latency_slo_ms: config.performance.latency_slo_ms,
            ..PerformanceThresholds::default()
        };

        Self {
            store: ObservationStore::with_config(config.store.shard_count, validator),
            triangulator: RayTriangulator::with_config(config.triangulation_config()),
            scorer: ConfidenceScorer::with_config(config.scoring_config()),
            monitor: PerformanceMonitor::with_thresholds(thresholds, config.performance.history_size),
            request_timeout: Duration::from_millis(config.server.request_timeout_ms),
            degraded_observer_cap: config.performance.degraded_observer_cap.max(2),
        }
    }

    pub fn store(&self) -> &ObservationStore {
        &self.store
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Store a client observation, replacing that observer's previous one
    pub fn submit(&self, observation: Observation) -> ServiceResult<PutReceipt> {
        let result = self.store.put(observation);
        self.monitor.record_submission(result.is_ok());
        result.map_err(ServiceError::from)
    }

    /// Run one validation under its deadline on the blocking pool.
    ///
    /// On timeout the computation is abandoned; since validation never
    /// writes to the store nothing needs undoing.
    pub async fn validate(self: Arc<Self>, request: ValidationRequest) -> ServiceResult<ValidationResult> {
        let deadline = request.timeout.unwrap_or(self.request_timeout);
        let target_id = request.target_id.clone();
        let started = Instant::now();

        let service = Arc::clone(&self);
        let task = tokio::task::spawn_blocking(move || service.evaluate(request));

        match tokio::time::timeout(deadline, task).await {
            Ok(Ok(result)) => {
                self.monitor.record_validation(started.elapsed());
                Ok(result)
            }
            Ok(Err(join_error)) => {
                warn!(target_id = %target_id, error = %join_error, "Validation task failed");
                Err(ServiceError::Internal(format!("validation task failed: {}", join_error)))
            }
            Err(_) => {
                self.monitor.record_timeout(deadline);
                warn!(
                    target_id = %target_id,
                    timeout_ms = deadline.as_millis() as u64,
                    "Validation exceeded deadline"
                );
                Err(ServiceError::InternalTimeout {
                    timeout_ms: deadline.as_millis() as u64,
                })
            }
        }
    }

    /// Synchronous validation without deadline or latency accounting.
    ///
    /// While degraded the observation set is capped to the closest
    /// `degraded_observer_cap` observers, the per-observer residual breakdown
    /// is skipped and dropped observations are not logged individually.
    pub fn evaluate(&self, request: ValidationRequest) -> ValidationResult {
        let target_id = request.target_id;
        let degraded = self.is_degraded();

        // Collecting
        let (mut observations, rejected_observations) = match request.observations {
            Some(inline) if !inline.is_empty() => {
                let batch = self.store.validator().check_batch(&target_id, inline);
                if !degraded {
                    for (observation, err) in &batch.rejected {
                        debug!(
                            target_id = %target_id,
                            observer = %observation.observer_id,
                            error = %err,
                            "Dropped request observation"
                        );
                    }
                }
                (batch.accepted, batch.rejected.len())
            }
            _ => (self.store.get(&target_id), 0),
        };

        // Scoring
        let triangulation = if degraded {
            self.monitor.record_degraded_validation();
            if observations.len() > self.degraded_observer_cap {
                self.cap_observations(&mut observations);
            }
            self.triangulator.triangulate_summary(&observations)
        } else {
            self.triangulator.triangulate(&observations)
        };
        let assessment = self.scorer.assess(&triangulation);

        let outcome = if triangulation.method == ValidationMethod::Insufficient
            || triangulation.observer_count < self.scorer.config().min_observers
        {
            ValidationOutcome::Insufficient
        } else if assessment.valid {
            ValidationOutcome::Accepted
        } else {
            ValidationOutcome::Rejected
        };

        debug!(
            target_id = %target_id,
            observers = triangulation.observer_count,
            method = ?triangulation.method,
            residual = triangulation.residual,
            confidence = assessment.confidence,
            outcome = ?outcome,
            degraded,
            "Validated position"
        );

        ValidationResult {
            target_id,
            valid: assessment.valid,
            triangulated_position: triangulation.position,
            confidence: assessment.confidence,
            observer_count: triangulation.observer_count,
            geometric_error: triangulation.residual,
            validation_method: triangulation.method,
            outcome,
            rejected_observations,
        }
    }

    /// Keep the closest observers, preserving observer order
    fn cap_observations(&self, observations: &mut Vec<Observation>) {
        observations.sort_by(|a, b| {
            a.effective_distance()
                .partial_cmp(&b.effective_distance())
                .unwrap_or(Ordering::Equal)
        });
        observations.truncate(self.degraded_observer_cap);
        observations.sort_by(|a, b| a.observer_id.cmp(&b.observer_id));
    }

    pub fn is_degraded(&self) -> bool {
        self.monitor.is_degraded()
    }

    pub fn store_stats(&self) -> StoreStats {
        self.store.stats()
    }

    pub fn performance_metrics(&self) -> PerformanceMetrics {
        self.monitor.metrics()
    }

    pub fn performance_report(&self) -> String {
        self.monitor.generate_report()
    }

    /// Feed a latency sample to the monitor directly
    pub fn record_latency(&self, latency: Duration) {
        self.monitor.record_validation(latency);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EntityId;
    use crate::validation::ObservationError;
    use nalgebra::Vector3;

    fn observers() -> Vec<Vector3<f64>> {
        vec![
            Vector3::new(50.0, 0.0, 0.0),
            Vector3::new(-50.0, 0.0, 0.0),
            Vector3::new(0.0, 50.0, 10.0),
            Vector3::new(0.0, -50.0, -10.0),
        ]
    }

    fn submit_all(service: &ConsensusService, target_id: i64, target: Vector3<f64>) {
        for (i, p) in observers().into_iter().enumerate() {
            service
                .submit(Observation::looking_at(i as i64, target_id, p, target))
                .unwrap();
        }
    }

    #[test]
    fn test_submit_then_evaluate_accepts() {
        let service = ConsensusService::default();
        let target = Vector3::new(3.0, 4.0, 5.0);
        submit_all(&service, 1, target);

        let result = service.evaluate(ValidationRequest::for_target(1));
        assert!(result.valid);
        assert_eq!(result.outcome, ValidationOutcome::Accepted);
        assert_eq!(result.validation_method, ValidationMethod::Triangulated);
        assert_eq!(result.observer_count, 4);
        assert!((result.confidence - 0.875).abs() < 1e-6);
        assert!((result.triangulated_position - target).norm() < 1e-3);
    }

    #[test]
    fn test_unknown_target_is_insufficient() {
        let service = ConsensusService::default();
        let result = service.evaluate(ValidationRequest::for_target("nobody"));
        assert_eq!(result.outcome, ValidationOutcome::Insufficient);
        assert_eq!(result.confidence, 0.0);
        assert!(!result.valid);
        assert!(result.geometric_error.is_infinite());
    }

    #[test]
    fn test_inline_observations_override_store() {
        let service = ConsensusService::default();
        submit_all(&service, 1, Vector3::new(100.0, 100.0, 100.0));

        let target = Vector3::new(-7.0, 2.0, 9.0);
        let mut inline: Vec<Observation> = observers()
            .into_iter()
            .enumerate()
            .map(|(i, p)| Observation::looking_at(i as i64, 1, p, target))
            .collect();
        inline.push(Observation::new(9, 2, Vector3::zeros(), Vector3::x(), 1.0));
        inline.push(Observation::new(10, 1, Vector3::zeros(), Vector3::x(), -1.0));

        let result = service.evaluate(ValidationRequest::for_target(1).with_observations(inline));
        assert_eq!(result.rejected_observations, 2);
        assert_eq!(result.observer_count, 4);
        assert!((result.triangulated_position - target).norm() < 1e-3);
        // Store is untouched
        assert_eq!(service.store().observer_count(&EntityId::from(1)), 4);
    }

    #[test]
    fn test_empty_inline_falls_back_to_store() {
        let service = ConsensusService::default();
        submit_all(&service, 5, Vector3::new(1.0, 1.0, 1.0));

        let result = service.evaluate(ValidationRequest::for_target(5).with_observations(Vec::new()));
        assert_eq!(result.observer_count, 4);
        assert!(result.valid);
    }

    #[test]
    fn test_malformed_submission_reported() {
        let service = ConsensusService::default();
        let err = service
            .submit(Observation::new(1, 1, Vector3::zeros(), Vector3::new(0.0, 3.0, 0.0), 1.0))
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::MalformedObservation(ObservationError::DirectionNotNormalized { .. })
        ));
        assert_eq!(service.performance_metrics().rejected_submissions, 1);
    }

    #[test]
    fn test_degraded_mode_caps_observers() {
        let mut config = ServiceConfig::default();
        config.performance.degraded_observer_cap = 3;
        let service = ConsensusService::new(&config);

        let target = Vector3::new(0.0, 0.0, 0.0);
        for i in 0..6 {
            let angle = i as f64;
            let p = Vector3::new(angle.cos(), angle.sin(), 0.3 * angle) * (10.0 + i as f64 * 10.0);
            service.submit(Observation::looking_at(i as i64, 1, p, target)).unwrap();
        }

        for _ in 0..20 {
            service.record_latency(Duration::from_millis(400));
        }
        assert!(service.is_degraded());

        let result = service.evaluate(ValidationRequest::for_target(1));
        assert_eq!(result.observer_count, 3);
        assert_eq!(service.performance_metrics().degraded_validations, 1);
    }

    #[test]
    fn test_degraded_mode_applies_below_cap() {
        let service = ConsensusService::default();
        let target = Vector3::new(3.0, 4.0, 5.0);
        submit_all(&service, 1, target);

        for _ in 0..20 {
            service.record_latency(Duration::from_millis(250));
        }
        assert!(service.is_degraded());

        let result = service.evaluate(ValidationRequest::for_target(1));
        assert_eq!(result.observer_count, 4);
        assert_eq!(result.outcome, ValidationOutcome::Accepted);
        assert!((result.triangulated_position - target).norm() < 1e-3);
        assert_eq!(service.performance_metrics().degraded_validations, 1);
    }

    #[tokio::test]
    async fn test_validate_records_latency() {
        let service = Arc::new(ConsensusService::default());
        submit_all(&service, 3, Vector3::new(1.0, 2.0, 3.0));

        let result = Arc::clone(&service)
            .validate(ValidationRequest::for_target(3))
            .await
            .unwrap();
        assert!(result.valid);

        let metrics = service.performance_metrics();
        assert_eq!(metrics.validations, 1);
        assert_eq!(metrics.timeouts, 0);
    }

    #[tokio::test]
    async fn test_zero_deadline_times_out() {
        let service = Arc::new(ConsensusService::default());
        submit_all(&service, 3, Vector3::new(1.0, 2.0, 3.0));

        // Large enough that the blocking task cannot finish before the first poll
        let target = Vector3::new(1.0, 2.0, 3.0);
        let inline: Vec<Observation> = (0..50_000)
            .map(|i| {
                let p = Vector3::new((i % 97) as f64, (i % 89) as f64 - 40.0, (i % 83) as f64 + 10.0);
                Observation::looking_at(i as i64, 3, p, target)
            })
            .collect();

        let err = Arc::clone(&service)
            .validate(
                ValidationRequest::for_target(3)
                    .with_observations(inline)
                    .with_timeout(Duration::ZERO),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InternalTimeout { timeout_ms: 0 }));
        assert_eq!(service.performance_metrics().timeouts, 1);
        assert_eq!(service.store().observer_count(&EntityId::from(3)), 4);
    }

    #[tokio::test]
    async fn test_repeated_timeouts_degrade_service() {
        let service = Arc::new(ConsensusService::default());
        let target = Vector3::new(1.0, 2.0, 3.0);
        submit_all(&service, 3, target);

        let inline: Vec<Observation> = (0..50_000)
            .map(|i| {
                let p = Vector3::new((i % 97) as f64, (i % 89) as f64 - 40.0, (i % 83) as f64 + 10.0);
                Observation::looking_at(i as i64, 3, p, target)
            })
            .collect();

        for _ in 0..10 {
            let err = Arc::clone(&service)
                .validate(
                    ValidationRequest::for_target(3)
                        .with_observations(inline.clone())
                        .with_timeout(Duration::ZERO),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, ServiceError::InternalTimeout { .. }));
        }
        assert!(service.is_degraded());

        // Degraded, not failing: a normal request is still served
        let result = Arc::clone(&service)
            .validate(ValidationRequest::for_target(3))
            .await
            .unwrap();
        assert!(result.valid);
        assert_eq!(result.observer_count, 4);

        let metrics = service.performance_metrics();
        assert_eq!(metrics.timeouts, 10);
        assert_eq!(metrics.validations, 11);
        // Abandoned computations may also have started in degraded mode
        assert!(metrics.degraded_validations >= 1);
    }
}
