//! Numeric defaults shared across the service

/// Relative deviation from unit length a direction may have before rejection
pub const DIRECTION_TOLERANCE: f64 = 0.05;

/// Minimum normalized determinant of the ray normal matrix for a stable solve
pub const DEGENERATE_DETERMINANT_EPSILON: f64 = 1e-4;

/// Default residual scale, `1/ln 2`: every unit of residual halves confidence
pub const DEFAULT_RESIDUAL_SCALE: f64 = 1.0 / std::f64::consts::LN_2;

/// Observer count exponent of the witness law `1 - 1/N^k`
pub const WITNESS_EXPONENT: f64 = 1.5;

/// Latency objective for a validation round trip (milliseconds)
pub const LATENCY_SLO_MS: f64 = 250.0;

/// Default deadline for one validation (milliseconds). Kept well above
/// [`LATENCY_SLO_MS`] so a breach degrades the service before requests fail.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 1000;
