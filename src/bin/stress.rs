//! Load generator for the consensus service
//!
//! For every simulated target a random ground-truth position and four
//! surrounding observers are drawn. Each observer's measurement is submitted,
//! the target is validated, and the triangulated position is compared with
//! ground truth. Exits non-zero when latency or accuracy checks fail.

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use futures::stream::{self, StreamExt};
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use observer_consensus::api::{
    ObservationPayload, StatusResponse, ValidatePositionRequest, ValidatePositionResponse,
};
use observer_consensus::{EntityId, Observation};

const OBSERVERS_PER_TARGET: usize = 4;

#[derive(Parser, Debug)]
#[command(name = "consensus-stress")]
#[command(about = "Concurrent load and accuracy check against a running consensus server")]
#[command(version)]
struct Args {
    /// Server base URL
    #[arg(long, default_value = "http://127.0.0.1:8765", env = "CONSENSUS_URL")]
    url: String,

    /// Number of simulated targets
    #[arg(short, long, default_value_t = 1000)]
    targets: usize,

    /// Targets processed concurrently
    #[arg(short, long, default_value_t = 64)]
    concurrency: usize,

    /// Standard deviation of angular noise applied to directions (radians)
    #[arg(long, default_value_t = 0.0)]
    angular_noise: f64,

    /// Maximum allowed distance between triangulated and true position
    #[arg(long, default_value_t = 1.0)]
    tolerance: f64,

    /// Latency objective for mean and p95 (milliseconds)
    #[arg(long, default_value_t = 250.0)]
    slo_ms: f64,

    /// Attempts per HTTP call before giving up
    #[arg(long, default_value_t = 4)]
    max_attempts: u32,

    /// RNG seed for reproducible scenarios
    #[arg(long, default_value_t = 7)]
    seed: u64,
}

/// One target with its ground truth and observer measurements
struct Scenario {
    target_id: EntityId,
    truth: Vector3<f64>,
    observations: Vec<ObservationPayload>,
}

#[derive(Debug)]
struct TargetReport {
    latency: Duration,
    error: f64,
    valid: bool,
}

fn random_unit(rng: &mut StdRng) -> Vector3<f64> {
    loop {
        let v = Vector3::new(
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
        );
        let norm = v.norm();
        if norm > 0.1 && norm <= 1.0 {
            return v / norm;
        }
    }
}

fn build_scenarios(args: &Args) -> Vec<Scenario> {
    let mut rng = StdRng::seed_from_u64(args.seed);

    (0..args.targets)
        .map(|t| {
            let target_id = EntityId::from(format!("stress-{}", t));
            let truth = Vector3::new(
                rng.gen_range(-500.0..500.0),
                rng.gen_range(-500.0..500.0),
                rng.gen_range(-50.0..150.0),
            );

            let observations = (0..OBSERVERS_PER_TARGET)
                .map(|o| {
                    let position = truth + random_unit(&mut rng) * rng.gen_range(20.0..200.0);
                    let mut observation =
                        Observation::looking_at(o as i64, target_id.clone(), position, truth);
                    if args.angular_noise > 0.0 {
                        let jitter = random_unit(&mut rng) * rng.gen_range(0.0..args.angular_noise);
                        observation.direction = (observation.direction + jitter).normalize();
                    }
                    ObservationPayload::from(&observation)
                })
                .collect();

            Scenario {
                target_id,
                truth,
                observations,
            }
        })
        .collect()
}

/// POST with retry and exponential backoff on transport errors and 5xx
async fn post_with_retry<B, R>(client: &Client, url: &str, body: &B, max_attempts: u32) -> Result<R>
where
    B: Serialize + ?Sized,
    R: DeserializeOwned,
{
    let mut backoff = Duration::from_millis(20);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let outcome = client.post(url).json(body).send().await;

        let retryable = match outcome {
            Ok(response) if response.status().is_success() => {
                return response
                    .json::<R>()
                    .await
                    .with_context(|| format!("Unexpected response body from {}", url));
            }
            Ok(response) if response.status().is_server_error() => {
                format!("server returned {}", response.status())
            }
            Ok(response) => {
                let status: StatusCode = response.status();
                let text = response.text().await.unwrap_or_default();
                bail!("{} rejected request with {}: {}", url, status, text);
            }
            Err(e) => e.to_string(),
        };

        if attempt >= max_attempts {
            bail!("{} failed after {} attempts: {}", url, attempt, retryable);
        }

        debug!(url, attempt, error = %retryable, backoff_ms = backoff.as_millis() as u64, "Retrying request");
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(Duration::from_millis(1000));
    }
}

async fn run_scenario(client: &Client, args: &Args, scenario: Scenario) -> Result<TargetReport> {
    let submit_url = format!("{}/submit_observation", args.url);
    for observation in &scenario.observations {
        let _: StatusResponse = post_with_retry(client, &submit_url, observation, args.max_attempts).await?;
    }

    let request = ValidatePositionRequest {
        target_id: scenario.target_id.clone(),
        observations: None,
        timeout_ms: None,
    };
    let validate_url = format!("{}/validate_position", args.url);

    let started = Instant::now();
    let response: ValidatePositionResponse =
        post_with_retry(client, &validate_url, &request, args.max_attempts).await?;
    let latency = started.elapsed();

    let position = Vector3::from(response.data.triangulated_position);
    let error = (position - scenario.truth).norm();
    if error > args.tolerance {
        warn!(
            target_id = %scenario.target_id,
            error,
            method = ?response.data.validation_method,
            "Triangulated position outside tolerance"
        );
    }

    Ok(TargetReport {
        latency,
        error,
        valid: response.data.valid,
    })
}

fn percentile_ms(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = ((sorted.len() as f64 * p).ceil() as usize).saturating_sub(1);
    sorted[index.min(sorted.len() - 1)]
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "consensus_stress=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let client = Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")?;

    let scenarios = build_scenarios(&args);
    info!(
        targets = scenarios.len(),
        concurrency = args.concurrency,
        url = %args.url,
        "Starting stress run"
    );

    let started = Instant::now();
    let results: Vec<Result<TargetReport>> = stream::iter(scenarios)
        .map(|scenario| run_scenario(&client, &args, scenario))
        .buffer_unordered(args.concurrency.max(1))
        .collect()
        .await;
    let elapsed = started.elapsed();

    let mut reports = Vec::with_capacity(results.len());
    let mut failures = 0usize;
    for result in results {
        match result {
            Ok(report) => reports.push(report),
            Err(e) => {
                failures += 1;
                warn!(error = %e, "Target run failed");
            }
        }
    }

    let mut latencies: Vec<f64> = reports.iter().map(|r| r.latency.as_secs_f64() * 1000.0).collect();
    latencies.sort_by(|a, b| a.total_cmp(b));
    let mean_ms = if latencies.is_empty() {
        0.0
    } else {
        latencies.iter().sum::<f64>() / latencies.len() as f64
    };
    let p95_ms = percentile_ms(&latencies, 0.95);
    let inaccurate = reports.iter().filter(|r| r.error > args.tolerance).count();
    let invalid = reports.iter().filter(|r| !r.valid).count();
    let worst_error = reports.iter().map(|r| r.error).fold(0.0, f64::max);

    info!(
        completed = reports.len(),
        failures,
        inaccurate,
        invalid,
        worst_error,
        mean_ms,
        p95_ms,
        elapsed_ms = elapsed.as_millis() as u64,
        "Stress run finished"
    );

    let mut problems = Vec::new();
    if failures > 0 {
        problems.push(format!("{} targets failed", failures));
    }
    if inaccurate > 0 {
        problems.push(format!("{} targets outside {} units", inaccurate, args.tolerance));
    }
    if mean_ms > args.slo_ms || p95_ms > args.slo_ms {
        problems.push(format!(
            "latency mean {:.1} ms / p95 {:.1} ms exceeds {:.0} ms",
            mean_ms, p95_ms, args.slo_ms
        ));
    }

    if !problems.is_empty() {
        bail!("Stress run failed: {}", problems.join("; "));
    }
    Ok(())
}
