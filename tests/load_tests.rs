//! Concurrency tests: many targets submitted and validated at once

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use nalgebra::Vector3;
use serde_json::{json, Value};
use tower::util::ServiceExt;

use observer_consensus::{
    build_router, AppState, ConsensusService, EntityId, Observation, ServiceConfig, ValidationOutcome,
    ValidationRequest,
};

fn truth_for(target: usize) -> Vector3<f64> {
    let t = target as f64;
    Vector3::new(t * 3.0 - 200.0, (t * 7.0) % 150.0, (t * 11.0) % 90.0 - 45.0)
}

fn observers_for(target: usize) -> Vec<Vector3<f64>> {
    let truth = truth_for(target);
    let r = 40.0 + (target % 13) as f64 * 5.0;
    vec![
        truth + Vector3::new(r, 0.0, r * 0.2),
        truth + Vector3::new(-r, r * 0.1, 0.0),
        truth + Vector3::new(0.0, r, -r * 0.3),
        truth + Vector3::new(r * 0.2, -r, r * 0.4),
    ]
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_targets_do_not_mix() {
    let service = Arc::new(ConsensusService::default());
    let targets = 200;

    let mut handles = Vec::new();
    for target in 0..targets {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            for (i, p) in observers_for(target).into_iter().enumerate() {
                service
                    .submit(Observation::looking_at(i as i64, target as i64, p, truth_for(target)))
                    .unwrap();
            }
            Arc::clone(&service)
                .validate(ValidationRequest::for_target(target as i64).with_timeout(Duration::from_secs(5)))
                .await
                .unwrap()
        }));
    }

    for (target, handle) in handles.into_iter().enumerate() {
        let result = handle.await.unwrap();
        assert_eq!(result.target_id, EntityId::from(target as i64));
        assert_eq!(result.observer_count, 4);
        assert_eq!(result.outcome, ValidationOutcome::Accepted);
        assert!((result.triangulated_position - truth_for(target)).norm() < 1e-3);
    }

    assert_eq!(service.store().target_count(), targets);
    assert_eq!(service.store().observation_count(), targets * 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_interleaved_resubmission_keeps_one_per_observer() {
    let service = Arc::new(ConsensusService::default());

    let mut handles = Vec::new();
    for round in 0..20 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            for target in 0..10usize {
                for (i, p) in observers_for(target).into_iter().enumerate() {
                    // Alternate between two consistent truths per round
                    let truth = truth_for(target) + Vector3::new(0.0, 0.0, (round % 2) as f64);
                    service
                        .submit(Observation::looking_at(i as i64, target as i64, p, truth))
                        .unwrap();
                }
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for target in 0..10usize {
        let snapshot = service.store().get(&EntityId::from(target as i64));
        assert_eq!(snapshot.len(), 4);
        assert!(snapshot.iter().all(|o| o.target_id == EntityId::from(target as i64)));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_http_load_meets_latency_objective() {
    let state = AppState::new(&ServiceConfig::default());
    let app = build_router(state.clone());
    let targets = 100;

    let mut handles = Vec::new();
    for target in 0..targets {
        let app = app.clone();
        handles.push(tokio::spawn(async move {
            for (i, p) in observers_for(target).into_iter().enumerate() {
                let obs = Observation::looking_at(i as i64, target as i64, p, truth_for(target));
                let body = json!({
                    "observer_id": i,
                    "target_id": target,
                    "observer_position": [p.x, p.y, p.z],
                    "direction": [obs.direction.x, obs.direction.y, obs.direction.z],
                    "distance": obs.distance,
                });
                let request = Request::builder()
                    .method("POST")
                    .uri("/submit_observation")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap();
                let response = app.clone().oneshot(request).await.unwrap();
                assert_eq!(response.status(), StatusCode::OK);
            }

            let request = Request::builder()
                .method("POST")
                .uri("/validate_position")
                .header("content-type", "application/json")
                .body(Body::from(json!({ "target_id": target }).to_string()))
                .unwrap();
            let response = app.oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let body: Value = serde_json::from_slice(&bytes).unwrap();
            body["data"]["valid"].as_bool().unwrap()
        }));
    }

    for handle in handles {
        assert!(handle.await.unwrap());
    }

    let metrics = state.service.performance_metrics();
    assert_eq!(metrics.validations, targets as u64);
    assert_eq!(metrics.timeouts, 0);
    assert!(metrics.mean_latency_ms <= 250.0);
    assert!(metrics.p95_latency_ms <= 250.0);
}
