use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::core::LATENCY_SLO_MS;

/// Latency and throughput monitoring for the validation path.
///
/// Counters and the degraded flag are atomics; only the latency window sits
/// behind a lock, and the degradation decision is re-evaluated every
/// `evaluation_interval` samples rather than on each one.
pub struct PerformanceMonitor {
    window: Mutex<LatencyWindow>,
    /// Maximum history size
    max_history_size: usize,
    thresholds: PerformanceThresholds,
    validations: AtomicU64,
    timeouts: AtomicU64,
    submissions: AtomicU64,
    rejected_submissions: AtomicU64,
    degraded_validations: AtomicU64,
    degraded: AtomicBool,
    started: Instant,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    latency_ms: f64,
    timed_out: bool,
}

#[derive(Debug, Default)]
struct LatencyWindow {
    /// Recent validations, oldest first
    samples: VecDeque<Sample>,
    timeouts: usize,
    since_evaluation: usize,
}

/// Snapshot of monitored values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub validations: u64,
    pub timeouts: u64,
    pub submissions: u64,
    pub rejected_submissions: u64,
    /// Validations served while in degraded mode
    pub degraded_validations: u64,
    pub mean_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub max_latency_ms: f64,
    /// Number of latencies the statistics are computed over
    pub sample_count: usize,
    pub uptime_seconds: u64,
    pub degraded: bool,
}

/// Alert and degradation thresholds
#[derive(Debug, Clone)]
pub struct PerformanceThresholds {
    /// p95 validation latency objective (milliseconds)
    pub latency_slo_ms: f64,
    /// Samples required before degradation can trigger
    pub min_samples: usize,
    /// Fraction of recent validations allowed to time out
    pub max_timeout_rate: f64,
    /// Samples between degradation decisions once `min_samples` is reached
    pub evaluation_interval: usize,
}

impl Default for PerformanceThresholds {
    fn default() -> Self {
        Self {
            latency_slo_ms: LATENCY_SLO_MS,
            min_samples: 10,
            max_timeout_rate: 0.05,
            evaluation_interval: 8,
        }
    }
}

/// Performance alert with severity level
#[derive(Debug, Clone)]
pub struct PerformanceAlert {
    pub message: String,
    pub severity: AlertSeverity,
    pub timestamp: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::with_thresholds(PerformanceThresholds::default(), 1000)
    }
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thresholds(thresholds: PerformanceThresholds, history_size: usize) -> Self {
        let max_history_size = history_size.max(1);
        Self {
            window: Mutex::new(LatencyWindow {
                samples: VecDeque::with_capacity(max_history_size),
                ..LatencyWindow::default()
            }),
            max_history_size,
            thresholds,
            validations: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            submissions: AtomicU64::new(0),
            rejected_submissions: AtomicU64::new(0),
            degraded_validations: AtomicU64::new(0),
            degraded: AtomicBool::new(false),
            started: Instant::now(),
        }
    }

    pub fn thresholds(&self) -> &PerformanceThresholds {
        &self.thresholds
    }

    /// Record a completed validation
    pub fn record_validation(&self, latency: Duration) {
        self.validations.fetch_add(1, Ordering::Relaxed);
        self.push_sample(Sample {
            latency_ms: latency.as_secs_f64() * 1000.0,
            timed_out: false,
        });
    }

    /// Record a validation that hit its deadline.
    ///
    /// The deadline counts as the observed latency, and the timeout counts
    /// toward degradation whatever the deadline was.
    pub fn record_timeout(&self, deadline: Duration) {
        self.validations.fetch_add(1, Ordering::Relaxed);
        self.timeouts.fetch_add(1, Ordering::Relaxed);
        self.push_sample(Sample {
            latency_ms: deadline.as_secs_f64() * 1000.0,
            timed_out: true,
        });
    }

    pub fn record_submission(&self, accepted: bool) {
        self.submissions.fetch_add(1, Ordering::Relaxed);
        if !accepted {
            self.rejected_submissions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_degraded_validation(&self) {
        self.degraded_validations.fetch_add(1, Ordering::Relaxed);
    }

    /// True while recent latency or timeouts breach the objective
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    fn window(&self) -> MutexGuard<'_, LatencyWindow> {
        self.window.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push_sample(&self, sample: Sample) {
        let snapshot = {
            let mut window = self.window();
            if window.samples.len() >= self.max_history_size {
                if let Some(evicted) = window.samples.pop_front() {
                    if evicted.timed_out {
                        window.timeouts -= 1;
                    }
                }
            }
            window.samples.push_back(sample);
            if sample.timed_out {
                window.timeouts += 1;
            }
            window.since_evaluation += 1;

            let due = window.samples.len() <= self.thresholds.min_samples
                || window.since_evaluation >= self.thresholds.evaluation_interval.max(1);
            if !due {
                return;
            }
            window.since_evaluation = 0;
            let latencies: Vec<f64> = window.samples.iter().map(|s| s.latency_ms).collect();
            (latencies, window.timeouts)
        };

        // Sort outside the lock
        let (mut latencies, timeouts) = snapshot;
        latencies.sort_by(|a, b| a.total_cmp(b));
        self.update_mode(&latencies, timeouts);
    }

    fn update_mode(&self, sorted_latencies: &[f64], timeouts: usize) {
        let n = sorted_latencies.len();
        let p95 = percentile(sorted_latencies, 0.95);
        let timeout_rate = if n == 0 { 0.0 } else { timeouts as f64 / n as f64 };

        let degraded = n >= self.thresholds.min_samples
            && (p95 >= self.thresholds.latency_slo_ms || timeout_rate > self.thresholds.max_timeout_rate);

        if self.degraded.swap(degraded, Ordering::Relaxed) != degraded {
            if degraded {
                warn!(
                    p95_ms = p95,
                    timeout_rate,
                    slo_ms = self.thresholds.latency_slo_ms,
                    "Latency objective breached, entering degraded mode"
                );
            } else {
                info!(
                    p95_ms = p95,
                    timeout_rate,
                    slo_ms = self.thresholds.latency_slo_ms,
                    "Latency back within objective, leaving degraded mode"
                );
            }
        }
    }

    /// Current metrics snapshot
    pub fn metrics(&self) -> PerformanceMetrics {
        let mut latencies: Vec<f64> = self.window().samples.iter().map(|s| s.latency_ms).collect();
        latencies.sort_by(|a, b| a.total_cmp(b));
        let n = latencies.len();
        let (mean, max) = if n == 0 {
            (0.0, 0.0)
        } else {
            (latencies.iter().sum::<f64>() / n as f64, latencies[n - 1])
        };

        PerformanceMetrics {
            validations: self.validations.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            submissions: self.submissions.load(Ordering::Relaxed),
            rejected_submissions: self.rejected_submissions.load(Ordering::Relaxed),
            degraded_validations: self.degraded_validations.load(Ordering::Relaxed),
            mean_latency_ms: mean,
            p95_latency_ms: percentile(&latencies, 0.95),
            max_latency_ms: max,
            sample_count: n,
            uptime_seconds: self.started.elapsed().as_secs(),
            degraded: self.is_degraded(),
        }
    }

    /// Check for performance alerts
    pub fn check_alerts(&self) -> Vec<PerformanceAlert> {
        let metrics = self.metrics();
        let mut alerts = Vec::new();

        if metrics.p95_latency_ms >= self.thresholds.latency_slo_ms {
            alerts.push(PerformanceAlert {
                message: format!(
                    "p95 validation latency ({:.1} ms) at or above objective ({:.1} ms)",
                    metrics.p95_latency_ms, self.thresholds.latency_slo_ms
                ),
                severity: AlertSeverity::Critical,
                timestamp: Instant::now(),
            });
        }

        if metrics.mean_latency_ms > self.thresholds.latency_slo_ms {
            alerts.push(PerformanceAlert {
                message: format!(
                    "Mean validation latency ({:.1} ms) exceeds objective ({:.1} ms)",
                    metrics.mean_latency_ms, self.thresholds.latency_slo_ms
                ),
                severity: AlertSeverity::Warning,
                timestamp: Instant::now(),
            });
        }

        if metrics.validations > 0 {
            let timeout_rate = metrics.timeouts as f64 / metrics.validations as f64;
            if timeout_rate > self.thresholds.max_timeout_rate {
                alerts.push(PerformanceAlert {
                    message: format!(
                        "Timeout rate ({:.1}%) above limit ({:.1}%)",
                        timeout_rate * 100.0,
                        self.thresholds.max_timeout_rate * 100.0
                    ),
                    severity: AlertSeverity::Warning,
                    timestamp: Instant::now(),
                });
            }
        }

        if metrics.submissions > 0 && metrics.rejected_submissions * 2 > metrics.submissions {
            alerts.push(PerformanceAlert {
                message: format!(
                    "{} of {} submissions rejected as malformed",
                    metrics.rejected_submissions, metrics.submissions
                ),
                severity: AlertSeverity::Info,
                timestamp: Instant::now(),
            });
        }

        alerts
    }

    /// Human-readable summary for shutdown logs
    pub fn generate_report(&self) -> String {
        let metrics = self.metrics();
        let mut report = String::new();

        report.push_str("=== OBSERVER CONSENSUS PERFORMANCE REPORT ===\n\n");
        report.push_str(&format!("Uptime: {} seconds\n", metrics.uptime_seconds));
        report.push_str(&format!(
            "Submissions: {} ({} rejected)\n",
            metrics.submissions, metrics.rejected_submissions
        ));
        report.push_str(&format!(
            "Validations: {} ({} timed out, {} degraded)\n\n",
            metrics.validations, metrics.timeouts, metrics.degraded_validations
        ));

        report.push_str("LATENCY:\n");
        report.push_str(&format!("Mean: {:.2} ms\n", metrics.mean_latency_ms));
        report.push_str(&format!("p95: {:.2} ms\n", metrics.p95_latency_ms));
        report.push_str(&format!("Max: {:.2} ms\n", metrics.max_latency_ms));
        report.push_str(&format!("Objective: {:.0} ms\n", self.thresholds.latency_slo_ms));

        let alerts = self.check_alerts();
        if !alerts.is_empty() {
            report.push_str("\nALERTS:\n");
            for alert in &alerts {
                report.push_str(&format!(
                    "[{}] {}\n",
                    match alert.severity {
                        AlertSeverity::Info => "INFO",
                        AlertSeverity::Warning => "WARNING",
                        AlertSeverity::Critical => "CRITICAL",
                    },
                    alert.message
                ));
            }
        }

        report
    }

    pub fn reset(&mut self) {
        let window = self.window.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner());
        window.samples.clear();
        window.timeouts = 0;
        window.since_evaluation = 0;
        for counter in [
            &self.validations,
            &self.timeouts,
            &self.submissions,
            &self.rejected_submissions,
            &self.degraded_validations,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.degraded.store(false, Ordering::Relaxed);
        self.started = Instant::now();
    }
}

/// Nearest-rank percentile of an ascending slice
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = ((sorted.len() as f64 * p).ceil() as usize).saturating_sub(1);
    sorted[index.min(sorted.len() - 1)]
}
