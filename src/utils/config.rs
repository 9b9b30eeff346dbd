//! Service configuration
//!
//! Settings come from three layers, highest priority first:
//! 1. Command-line flags (and their environment fallbacks) in the server binary
//! 2. TOML configuration file (`--config`)
//! 3. Built-in defaults
//!
//! Every section is optional in the file; missing sections and keys take
//! their defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

use crate::algorithms::{ScoringConfig, TriangulationConfig};
use crate::core::{
    DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_RESIDUAL_SCALE, DEGENERATE_DETERMINANT_EPSILON,
    DIRECTION_TOLERANCE, LATENCY_SLO_MS,
};
use crate::processing::DEFAULT_SHARD_COUNT;
use crate::validation::ValidationConfig;

/// Top-level service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub triangulation: TriangulationSettings,
    pub scoring: ScoringSettings,
    pub performance: PerformanceSettings,
}

/// HTTP listener and request deadline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Deadline for one validation (milliseconds)
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Lock shards for the target map; rounded up to a power of two
    pub shard_count: usize,
    /// Relative deviation of |direction| from 1.0 tolerated before rejection
    pub direction_tolerance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriangulationSettings {
    pub degenerate_determinant_epsilon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringSettings {
    pub min_observers: usize,
    pub confidence_threshold: f64,
    pub residual_scale: f64,
    pub degenerate_penalty: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceSettings {
    /// p95 validation latency at or above which the service degrades (milliseconds)
    pub latency_slo_ms: f64,
    /// Number of recent latencies kept for statistics
    pub history_size: usize,
    /// Maximum observations used per validation while degraded
    pub degraded_observer_cap: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8765,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            shard_count: DEFAULT_SHARD_COUNT,
            direction_tolerance: DIRECTION_TOLERANCE,
        }
    }
}

impl Default for TriangulationSettings {
    fn default() -> Self {
        Self {
            degenerate_determinant_epsilon: DEGENERATE_DETERMINANT_EPSILON,
        }
    }
}

impl Default for ScoringSettings {
    fn default() -> Self {
        let defaults = ScoringConfig::default();
        Self {
            min_observers: defaults.min_observers,
            confidence_threshold: defaults.confidence_threshold,
            residual_scale: DEFAULT_RESIDUAL_SCALE,
            degenerate_penalty: defaults.degenerate_penalty,
        }
    }
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self {
            latency_slo_ms: LATENCY_SLO_MS,
            history_size: 1000,
            degraded_observer_cap: 8,
        }
    }
}

/// Configuration loading and validation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value {value} for {parameter}: {reason}")]
    InvalidParameter {
        parameter: String,
        value: String,
        reason: String,
    },

    #[error("Configuration I/O error: {message}")]
    IoError { message: String },

    #[error("Configuration format error: {message}")]
    SerializationError { message: String },
}

/// Result of checking a configuration
#[derive(Debug, Default)]
pub struct ConfigValidation {
    pub is_valid: bool,
    pub errors: Vec<ConfigError>,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
}

impl ServiceConfig {
    /// Read, parse and validate a TOML configuration file.
    ///
    /// Warnings are logged; the first error aborts the load.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::IoError {
            message: format!("Failed to read config file '{}': {}", path_str, e),
        })?;

        let config: ServiceConfig =
            toml::from_str(&content).map_err(|e| ConfigError::SerializationError {
                message: format!("Failed to parse config file '{}': {}", path_str, e),
            })?;

        config.ensure_valid()?;
        Ok(config)
    }

    /// Write the configuration as TOML
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::SerializationError {
            message: format!("Failed to serialize config: {}", e),
        })?;

        fs::write(&path, content).map_err(|e| ConfigError::IoError {
            message: format!("Failed to write config file '{}': {}", path_str, e),
        })
    }

    /// Validate, log any warnings, and return the first error if there is one
    pub fn ensure_valid(&self) -> Result<(), ConfigError> {
        let report = self.validate();
        for warning in &report.warnings {
            warn!(warning = %warning, "Configuration warning");
        }
        match report.errors.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Check every section for invalid or questionable values
    pub fn validate(&self) -> ConfigValidation {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut suggestions = Vec::new();

        // Server
        if self.server.host.trim().is_empty() {
            errors.push(invalid("server.host", &self.server.host, "Host must not be empty"));
        }
        if self.server.request_timeout_ms == 0 {
            errors.push(invalid(
                "server.request_timeout_ms",
                self.server.request_timeout_ms,
                "Request timeout must be positive",
            ));
        } else if self.server.request_timeout_ms as f64 <= self.performance.latency_slo_ms {
            warnings.push(format!(
                "Request timeout {} ms is not above the {} ms latency objective; \
                 requests fail before latency can trigger degraded mode",
                self.server.request_timeout_ms, self.performance.latency_slo_ms
            ));
            suggestions.push("Set server.request_timeout_ms well above performance.latency_slo_ms".to_string());
        }

        // Store
        if self.store.shard_count == 0 {
            errors.push(invalid("store.shard_count", self.store.shard_count, "Shard count must be positive"));
        } else if !self.store.shard_count.is_power_of_two() {
            warnings.push(format!(
                "Shard count {} will be rounded up to {}",
                self.store.shard_count,
                self.store.shard_count.max(2).next_power_of_two()
            ));
        }
        if !(self.store.direction_tolerance > 0.0 && self.store.direction_tolerance < 1.0) {
            errors.push(invalid(
                "store.direction_tolerance",
                self.store.direction_tolerance,
                "Direction tolerance must be between 0 and 1",
            ));
        } else if self.store.direction_tolerance > 0.2 {
            warnings.push("Loose direction tolerance lets badly scaled directions through".to_string());
        }

        // Triangulation
        let eps = self.triangulation.degenerate_determinant_epsilon;
        if !(eps > 0.0 && eps < 1.0) {
            errors.push(invalid(
                "triangulation.degenerate_determinant_epsilon",
                eps,
                "Epsilon must be between 0 and 1",
            ));
        }

        // Scoring
        if self.scoring.min_observers < 2 {
            errors.push(invalid(
                "scoring.min_observers",
                self.scoring.min_observers,
                "At least two observers are needed to triangulate",
            ));
        }
        if !(0.0..=1.0).contains(&self.scoring.confidence_threshold) {
            errors.push(invalid(
                "scoring.confidence_threshold",
                self.scoring.confidence_threshold,
                "Threshold must be between 0 and 1",
            ));
        } else {
            // 1 - N^-1.5 for the minimum count is the best a perfect set can score
            let ceiling = 1.0 - (self.scoring.min_observers.max(1) as f64).powf(-1.5);
            if self.scoring.confidence_threshold > ceiling {
                warnings.push(format!(
                    "Threshold {} is unreachable with {} observers",
                    self.scoring.confidence_threshold, self.scoring.min_observers
                ));
                suggestions.push("Raise min_observers or lower confidence_threshold".to_string());
            }
        }
        if !(self.scoring.residual_scale.is_finite() && self.scoring.residual_scale > 0.0) {
            errors.push(invalid(
                "scoring.residual_scale",
                self.scoring.residual_scale,
                "Residual scale must be finite and positive",
            ));
        }
        if !(0.0..=1.0).contains(&self.scoring.degenerate_penalty) {
            errors.push(invalid(
                "scoring.degenerate_penalty",
                self.scoring.degenerate_penalty,
                "Penalty must be between 0 and 1",
            ));
        }

        // Performance
        if !(self.performance.latency_slo_ms.is_finite() && self.performance.latency_slo_ms > 0.0) {
            errors.push(invalid(
                "performance.latency_slo_ms",
                self.performance.latency_slo_ms,
                "Latency objective must be positive",
            ));
        }
        if self.performance.history_size == 0 {
            errors.push(invalid(
                "performance.history_size",
                self.performance.history_size,
                "History size must be positive",
            ));
        } else if self.performance.history_size < 20 {
            warnings.push("Small latency history makes p95 noisy".to_string());
        }
        if self.performance.degraded_observer_cap < self.scoring.min_observers {
            errors.push(invalid(
                "performance.degraded_observer_cap",
                self.performance.degraded_observer_cap,
                "Cap must not be below scoring.min_observers",
            ));
        }

        ConfigValidation {
            is_valid: errors.is_empty(),
            errors,
            warnings,
            suggestions,
        }
    }

    pub fn validation_config(&self) -> ValidationConfig {
        ValidationConfig {
            direction_tolerance: self.store.direction_tolerance,
        }
    }

    pub fn triangulation_config(&self) -> TriangulationConfig {
        TriangulationConfig {
            degenerate_determinant_epsilon: self.triangulation.degenerate_determinant_epsilon,
        }
    }

    pub fn scoring_config(&self) -> ScoringConfig {
        ScoringConfig {
            min_observers: self.scoring.min_observers,
            confidence_threshold: self.scoring.confidence_threshold,
            residual_scale: self.scoring.residual_scale,
            degenerate_penalty: self.scoring.degenerate_penalty,
        }
    }
}

fn invalid(parameter: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidParameter {
        parameter: parameter.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServiceConfig::default();
        let report = config.validate();
        assert!(report.is_valid, "{:?}", report.errors);
        assert!(report.warnings.is_empty());
        assert_eq!(config.server.port, 8765);
        assert_eq!(config.server.request_timeout_ms, 1000);
        assert_eq!(config.performance.degraded_observer_cap, 8);
        assert_eq!(config.scoring.min_observers, 2);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 9000\n\n[scoring]\nconfidence_threshold = 0.6").unwrap();

        let config = ServiceConfig::from_file(file.path()).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.scoring.confidence_threshold, 0.6);
        assert_eq!(config.scoring.min_observers, 2);
        assert_eq!(config.store, StoreConfig::default());
    }

    #[test]
    fn test_save_and_reload() {
        let mut config = ServiceConfig::default();
        config.performance.degraded_observer_cap = 12;
        config.store.shard_count = 16;

        let file = NamedTempFile::new().unwrap();
        config.save_to_file(file.path()).unwrap();
        let loaded = ServiceConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = ServiceConfig::default();
        config.scoring.min_observers = 1;
        config.scoring.confidence_threshold = 1.5;
        config.store.direction_tolerance = 0.0;

        let report = config.validate();
        assert!(!report.is_valid);
        assert_eq!(report.errors.len(), 3);
        assert!(config.ensure_valid().is_err());
    }

    #[test]
    fn test_unreachable_threshold_warns() {
        let mut config = ServiceConfig::default();
        config.scoring.confidence_threshold = 0.7;

        let report = config.validate();
        assert!(report.is_valid);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.suggestions.len(), 1);
    }

    #[test]
    fn test_deadline_at_objective_warns() {
        let mut config = ServiceConfig::default();
        config.server.request_timeout_ms = 250;

        let report = config.validate();
        assert!(report.is_valid);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].starts_with("Request timeout 250 ms"));

        config.server.request_timeout_ms = 251;
        assert!(config.validate().warnings.is_empty());
    }

    #[test]
    fn test_malformed_file_reports_format_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[server\nport = ").unwrap();
        assert!(matches!(
            ServiceConfig::from_file(file.path()),
            Err(ConfigError::SerializationError { .. })
        ));
        assert!(matches!(
            ServiceConfig::from_file("/nonexistent/consensus.toml"),
            Err(ConfigError::IoError { .. })
        ));
    }

    #[test]
    fn test_component_configs_follow_settings() {
        let mut config = ServiceConfig::default();
        config.scoring.degenerate_penalty = 0.1;
        config.triangulation.degenerate_determinant_epsilon = 1e-3;

        assert_eq!(config.scoring_config().degenerate_penalty, 0.1);
        assert_eq!(config.triangulation_config().degenerate_determinant_epsilon, 1e-3);
        assert_eq!(config.validation_config().direction_tolerance, 0.05);
    }
}
