use tracing::debug;

use crate::algorithms::triangulation::Triangulation;
use crate::core::{ValidationMethod, DEFAULT_RESIDUAL_SCALE, WITNESS_EXPONENT};

/// Scoring thresholds
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    pub min_observers: usize,
    pub confidence_threshold: f64,
    /// Divisor of the residual in `exp(-residual / scale)`; see
    /// [`DEFAULT_RESIDUAL_SCALE`] for the default
    pub residual_scale: f64,
    /// Multiplier applied to degenerate-geometry confidence
    pub degenerate_penalty: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            min_observers: 2,
            confidence_threshold: 0.5,
            residual_scale: DEFAULT_RESIDUAL_SCALE,
            degenerate_penalty: 0.25,
        }
    }
}

/// Confidence verdict for one triangulation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assessment {
    pub confidence: f64,
    pub valid: bool,
}

/// Maps observer count and geometric residual to a confidence in `[0, 1]`
#[derive(Debug, Clone, Default)]
pub struct ConfidenceScorer {
    config: ScoringConfig,
}

impl ConfidenceScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Witness law: `1 - 1/N^1.5`, zero with no observers
    pub fn base_confidence(observer_count: usize) -> f64 {
        if observer_count == 0 {
            return 0.0;
        }
        1.0 - (observer_count as f64).powf(-WITNESS_EXPONENT)
    }

    /// Score an observer count and residual, returning `(confidence, valid)`.
    ///
    /// Non-finite or negative residuals are treated as infinite.
    pub fn score(&self, observer_count: usize, residual: f64) -> (f64, bool) {
        let base = Self::base_confidence(observer_count);
        let attenuation = if residual.is_finite() && residual >= 0.0 {
            (-residual / self.config.residual_scale).exp()
        } else {
            0.0
        };
        let confidence = (base * attenuation).clamp(0.0, 1.0);
        let valid = observer_count >= self.config.min_observers
            && confidence >= self.config.confidence_threshold;
        (confidence, valid)
    }

    /// Score a triangulation, applying the policy for its method
    pub fn assess(&self, triangulation: &Triangulation) -> Assessment {
        match triangulation.method {
            ValidationMethod::Insufficient => Assessment {
                confidence: 0.0,
                valid: false,
            },
            ValidationMethod::Degenerate => {
                let (confidence, _) =
                    self.score(triangulation.observer_count, triangulation.residual);
                let confidence = (confidence * self.config.degenerate_penalty).clamp(0.0, 1.0);
                debug!(
                    observers = triangulation.observer_count,
                    confidence, "Degenerate geometry, confidence penalized"
                );
                Assessment {
                    confidence,
                    valid: false,
                }
            }
            ValidationMethod::Triangulated => {
                let (confidence, valid) =
                    self.score(triangulation.observer_count, triangulation.residual);
                Assessment { confidence, valid }
            }
        }
    }
}
