//! Core consensus algorithms

pub mod confidence;
pub mod triangulation;

pub use confidence::{Assessment, ConfidenceScorer, ScoringConfig};
pub use triangulation::{RayError, RayTriangulator, Triangulation, TriangulationConfig};
