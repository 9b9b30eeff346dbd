use nalgebra::Vector3;
use std::collections::BTreeMap;
use tracing::debug;

use crate::core::{Observation, TargetId, DIRECTION_TOLERANCE};
use crate::validation::error::{ObservationError, ObservationResult};

/// Configuration for observation boundary checks
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Allowed relative deviation of |direction| from 1.0 before rejection
    pub direction_tolerance: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            direction_tolerance: DIRECTION_TOLERANCE,
        }
    }
}

/// An observation that passed boundary checks
#[derive(Debug, Clone, PartialEq)]
pub struct CheckedObservation {
    pub observation: Observation,
    /// Whether the direction had to be rescaled to unit length
    pub renormalized: bool,
}

/// Outcome of checking a batch of request-supplied observations
#[derive(Debug, Clone, Default)]
pub struct BatchValidation {
    pub accepted: Vec<Observation>,
    pub rejected: Vec<(Observation, ObservationError)>,
}

/// Boundary validator for client observations
#[derive(Debug, Clone, Default)]
pub struct ObservationValidator {
    config: ValidationConfig,
}

impl ObservationValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Check one observation, renormalizing a slightly-off direction.
    ///
    /// Never panics on client input; every defect maps to an
    /// [`ObservationError`].
    pub fn check(&self, mut observation: Observation) -> ObservationResult<CheckedObservation> {
        ensure_finite("observer_position", &observation.observer_position)?;
        ensure_finite("direction", &observation.direction)?;

        let norm = observation.direction.norm();
        if norm == 0.0 {
            return Err(ObservationError::ZeroDirection);
        }
        let deviation = (norm - 1.0).abs();
        if deviation >= self.config.direction_tolerance {
            return Err(ObservationError::DirectionNotNormalized {
                norm,
                tolerance: self.config.direction_tolerance,
            });
        }
        // Rescale even inside the tolerance band
        let renormalized = deviation > 1e-9;
        observation.direction /= norm;

        if !observation.distance.is_finite() || observation.distance < 0.0 {
            return Err(ObservationError::InvalidDistance(observation.distance));
        }
        if !observation.scale_factor.is_finite() || observation.scale_factor <= 0.0 {
            return Err(ObservationError::InvalidScaleFactor(observation.scale_factor));
        }
        // Both factors finite does not make the claimed point finite
        if !observation.projected_point().iter().all(|c| c.is_finite()) {
            return Err(ObservationError::InvalidDistance(observation.effective_distance()));
        }
        if !observation.timestamp.is_finite() {
            return Err(ObservationError::InvalidTimestamp(observation.timestamp));
        }

        if renormalized {
            debug!(
                target_id = %observation.target_id,
                observer = %observation.observer_id,
                norm,
                "Renormalized observation direction"
            );
        }

        Ok(CheckedObservation {
            observation,
            renormalized,
        })
    }

    /// Check a request-supplied observation set for `target_id`.
    ///
    /// Malformed entries are set aside without affecting the rest. When an
    /// observer appears more than once the last entry wins, and the accepted
    /// set is ordered by observer id.
    pub fn check_batch(&self, target_id: &TargetId, observations: Vec<Observation>) -> BatchValidation {
        let mut accepted = BTreeMap::new();
        let mut rejected = Vec::new();

        for observation in observations {
            if &observation.target_id != target_id {
                let err = ObservationError::TargetMismatch {
                    expected: target_id.clone(),
                    found: observation.target_id.clone(),
                };
                rejected.push((observation, err));
                continue;
            }

            match self.check(observation.clone()) {
                Ok(checked) => {
                    accepted.insert(checked.observation.observer_id.clone(), checked.observation);
                }
                Err(err) => rejected.push((observation, err)),
            }
        }

        BatchValidation {
            accepted: accepted.into_values().collect(),
            rejected,
        }
    }
}

fn ensure_finite(field: &'static str, v: &Vector3<f64>) -> ObservationResult<()> {
    if v.iter().all(|c| c.is_finite()) {
        Ok(())
    } else {
        Err(ObservationError::NonFiniteComponent { field })
    }
}
