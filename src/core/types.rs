//! Core data types for the observer consensus service

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifier for an observer or a target.
///
/// Clients send either JSON integers or strings; both are accepted and kept
/// distinct. Integers order before strings so snapshots are deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Number(i64),
    Name(String),
}

pub type ObserverId = EntityId;
pub type TargetId = EntityId;

impl Ord for EntityId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (EntityId::Number(a), EntityId::Number(b)) => a.cmp(b),
            (EntityId::Name(a), EntityId::Name(b)) => a.cmp(b),
            (EntityId::Number(_), EntityId::Name(_)) => Ordering::Less,
            (EntityId::Name(_), EntityId::Number(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for EntityId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Number(n) => write!(f, "{}", n),
            EntityId::Name(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        EntityId::Number(value)
    }
}

impl From<i32> for EntityId {
    fn from(value: i32) -> Self {
        EntityId::Number(value as i64)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        EntityId::Name(value.to_string())
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        EntityId::Name(value)
    }
}

/// One observer's measurement of one target at one instant
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub observer_id: ObserverId,
    pub target_id: TargetId,
    /// World position of the observer at measurement time
    pub observer_position: Vector3<f64>,
    /// Unit vector from observer toward target
    pub direction: Vector3<f64>,
    /// Observer's range estimate, in observer units
    pub distance: f64,
    /// Multiplier converting the observer's distance into world units
    pub scale_factor: f64,
    /// Measurement time in seconds since the Unix epoch
    pub timestamp: f64,
}

impl Observation {
    pub fn new(
        observer_id: impl Into<ObserverId>,
        target_id: impl Into<TargetId>,
        observer_position: Vector3<f64>,
        direction: Vector3<f64>,
        distance: f64,
    ) -> Self {
        Self {
            observer_id: observer_id.into(),
            target_id: target_id.into(),
            observer_position,
            direction,
            distance,
            scale_factor: 1.0,
            timestamp: unix_time_secs(),
        }
    }

    pub fn with_scale_factor(mut self, scale_factor: f64) -> Self {
        self.scale_factor = scale_factor;
        self
    }

    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Build a noiseless observation of `target` as seen from `observer_position`.
    pub fn looking_at(
        observer_id: impl Into<ObserverId>,
        target_id: impl Into<TargetId>,
        observer_position: Vector3<f64>,
        target: Vector3<f64>,
    ) -> Self {
        let offset = target - observer_position;
        let distance = offset.norm();
        let direction = if distance > 0.0 {
            offset / distance
        } else {
            Vector3::x()
        };
        Self::new(observer_id, target_id, observer_position, direction, distance)
    }

    /// Range estimate converted to world units
    pub fn effective_distance(&self) -> f64 {
        self.distance * self.scale_factor
    }

    /// The point this observer claims the target is at
    pub fn projected_point(&self) -> Vector3<f64> {
        self.observer_position + self.direction * self.effective_distance()
    }
}

/// Method used to produce a triangulated position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationMethod {
    /// Fewer than two observations; no triangulation attempted
    Insufficient,
    /// Least-squares ray intersection succeeded
    Triangulated,
    /// Rays too close to parallel for a stable solve
    Degenerate,
}

/// Terminal state of a validation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationOutcome {
    Accepted,
    Rejected,
    Insufficient,
}

/// Consensus verdict for one target, derived on demand and never stored
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub target_id: TargetId,
    pub valid: bool,
    pub triangulated_position: Vector3<f64>,
    pub confidence: f64,
    pub observer_count: usize,
    pub geometric_error: f64,
    pub validation_method: ValidationMethod,
    pub outcome: ValidationOutcome,
    /// Request-supplied observations dropped as malformed
    pub rejected_observations: usize,
}

/// Current wall-clock time in seconds since the Unix epoch
pub fn unix_time_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
