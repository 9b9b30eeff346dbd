//! Utility modules for configuration and monitoring

pub mod config;
pub mod monitor;

pub use config::{ConfigError, ConfigValidation, ServiceConfig};
pub use monitor::{AlertSeverity, PerformanceAlert, PerformanceMetrics, PerformanceMonitor, PerformanceThresholds};
