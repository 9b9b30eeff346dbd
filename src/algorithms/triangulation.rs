//! Least-squares triangulation of a target from observer rays
//!
//! Each observation defines a ray `P_i + t·d_i` (`t ≥ 0`). The consensus
//! point minimizes the summed squared perpendicular distance to every ray:
//!
//! ```text
//! X = (Σ (I − d_i d_iᵀ))⁻¹ · Σ (I − d_i d_iᵀ) P_i
//! ```
//!
//! Range claims are not used to place the point. They are checked against it
//! afterwards, so an observer that points correctly but lies about distance
//! (or the reverse) still inflates the residual.

use nalgebra::{Matrix3, Vector3};
use std::cmp::Ordering;
use tracing::debug;

use crate::core::{Observation, ObserverId, ValidationMethod, DEGENERATE_DETERMINANT_EPSILON};

/// Triangulation tuning parameters
#[derive(Debug, Clone)]
pub struct TriangulationConfig {
    /// Determinant of the per-observer-averaged normal matrix below which the
    /// ray set is treated as parallel. Two rays at angle θ give `sin²θ / 4`.
    pub degenerate_determinant_epsilon: f64,
}

impl Default for TriangulationConfig {
    fn default() -> Self {
        Self {
            degenerate_determinant_epsilon: DEGENERATE_DETERMINANT_EPSILON,
        }
    }
}

/// How far one observer's claim is from the consensus point
#[derive(Debug, Clone, PartialEq)]
pub struct RayError {
    pub observer_id: ObserverId,
    /// Distance from the point to the observer's ray (half-line)
    pub perpendicular: f64,
    /// `|X − P| − claimed distance`, signed
    pub range: f64,
}

/// Output of a triangulation attempt. Always produced, never an error.
#[derive(Debug, Clone, PartialEq)]
pub struct Triangulation {
    pub position: Vector3<f64>,
    /// `rms(perpendicular) + rms(range)`; infinite when no triangulation ran
    pub residual: f64,
    pub method: ValidationMethod,
    pub observer_count: usize,
    /// Determinant of `(1/N)·Σ(I − d dᵀ)`; in `[0, 1]`
    pub normalized_determinant: f64,
    pub ray_errors: Vec<RayError>,
}

/// Multi-ray triangulation engine
#[derive(Debug, Clone, Default)]
pub struct RayTriangulator {
    config: TriangulationConfig,
}

impl RayTriangulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TriangulationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TriangulationConfig {
        &self.config
    }

    /// Triangulate a consensus position from a set of observations.
    ///
    /// Inputs are expected to have passed
    /// [`ObservationValidator`](crate::validation::ObservationValidator);
    /// directions are still renormalized here.
    pub fn triangulate(&self, observations: &[Observation]) -> Triangulation {
        let mut triangulation = self.triangulate_summary(observations);
        if triangulation.method != ValidationMethod::Insufficient {
            triangulation.ray_errors = ray_errors(observations, &triangulation.position);
        }
        triangulation
    }

    /// Same position, method and residual as [`triangulate`](Self::triangulate),
    /// without the per-observer breakdown; `ray_errors` is left empty.
    pub fn triangulate_summary(&self, observations: &[Observation]) -> Triangulation {
        let n = observations.len();

        if n < 2 {
            return Triangulation {
                position: projected_centroid(observations),
                residual: f64::INFINITY,
                method: ValidationMethod::Insufficient,
                observer_count: n,
                normalized_determinant: 0.0,
                ray_errors: Vec::new(),
            };
        }

        // Accumulate normal equations
        let mut normal = Matrix3::zeros();
        let mut rhs = Vector3::zeros();
        for obs in observations {
            let projector = orthogonal_projector(&unit_direction(obs));
            normal += projector;
            rhs += projector * obs.observer_position;
        }

        let scale = 1.0 / n as f64;
        let averaged = normal * scale;
        let determinant = averaged.determinant();

        let solution = if determinant >= self.config.degenerate_determinant_epsilon {
            averaged.try_inverse().map(|inverse| inverse * (rhs * scale))
        } else {
            None
        };

        let (position, method) = match solution {
            Some(position) if position.iter().all(|c| c.is_finite()) => {
                (position, ValidationMethod::Triangulated)
            }
            _ => {
                debug!(
                    observers = n,
                    determinant,
                    epsilon = self.config.degenerate_determinant_epsilon,
                    "Ray set is near-parallel, using nearest observer's estimate"
                );
                (nearest_projection(observations), ValidationMethod::Degenerate)
            }
        };

        Triangulation {
            position,
            residual: streaming_residual(observations, &position),
            method,
            observer_count: n,
            normalized_determinant: determinant,
            ray_errors: Vec::new(),
        }
    }
}

/// Deviation of a candidate point from one observer's claim
pub fn ray_error(obs: &Observation, point: &Vector3<f64>) -> RayError {
    let offset = point - obs.observer_position;
    let d = unit_direction(obs);
    let along = offset.dot(&d);
    // Points behind the observer are measured to the ray origin
    let perpendicular = if along >= 0.0 {
        (offset - d * along).norm()
    } else {
        offset.norm()
    };
    RayError {
        observer_id: obs.observer_id.clone(),
        perpendicular,
        range: offset.norm() - obs.effective_distance(),
    }
}

/// Per-observer deviation of a candidate point from each claim
pub fn ray_errors(observations: &[Observation], point: &Vector3<f64>) -> Vec<RayError> {
    observations.iter().map(|obs| ray_error(obs, point)).collect()
}

/// Aggregate geometric error: RMS ray distance plus RMS range mismatch
pub fn residual(errors: &[RayError]) -> f64 {
    if errors.is_empty() {
        return f64::INFINITY;
    }
    let n = errors.len() as f64;
    let perpendicular = (errors.iter().map(|e| e.perpendicular.powi(2)).sum::<f64>() / n).sqrt();
    let range = (errors.iter().map(|e| e.range.powi(2)).sum::<f64>() / n).sqrt();
    perpendicular + range
}

fn streaming_residual(observations: &[Observation], point: &Vector3<f64>) -> f64 {
    if observations.is_empty() {
        return f64::INFINITY;
    }
    let (perpendicular, range) = observations.iter().fold((0.0, 0.0), |(p, r), obs| {
        let error = ray_error(obs, point);
        (p + error.perpendicular.powi(2), r + error.range.powi(2))
    });
    let n = observations.len() as f64;
    (perpendicular / n).sqrt() + (range / n).sqrt()
}

fn unit_direction(obs: &Observation) -> Vector3<f64> {
    obs.direction
        .try_normalize(f64::EPSILON)
        .unwrap_or_else(Vector3::zeros)
}

fn orthogonal_projector(d: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::identity() - d * d.transpose()
}

fn projected_centroid(observations: &[Observation]) -> Vector3<f64> {
    if observations.is_empty() {
        return Vector3::zeros();
    }
    observations
        .iter()
        .fold(Vector3::zeros(), |acc, obs| acc + obs.projected_point())
        / observations.len() as f64
}

fn nearest_projection(observations: &[Observation]) -> Vector3<f64> {
    observations
        .iter()
        .min_by(|a, b| {
            a.effective_distance()
                .partial_cmp(&b.effective_distance())
                .unwrap_or(Ordering::Equal)
        })
        .map(Observation::projected_point)
        .unwrap_or_else(Vector3::zeros)
}
