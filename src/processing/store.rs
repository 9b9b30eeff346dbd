use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::core::{Observation, ObserverId, TargetId};
use crate::validation::{ObservationResult, ObservationValidator};

/// Default number of lock shards for the target map
pub const DEFAULT_SHARD_COUNT: usize = 64;

/// Whether a `put` created a new entry or overwrote an observer's previous one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PutOutcome {
    Inserted,
    Replaced,
}

/// Receipt for an accepted observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutReceipt {
    pub outcome: PutOutcome,
    /// Direction was rescaled to unit length on the way in
    pub renormalized: bool,
    /// Store-wide arrival sequence number
    pub sequence: u64,
}

/// Store occupancy snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub targets: usize,
    pub observations: usize,
}

#[derive(Debug, Clone)]
struct StoredObservation {
    observation: Observation,
    received_at: Instant,
    sequence: u64,
}

/// Latest observation per `(target, observer)` pair.
///
/// Targets are spread across independently locked shards so submissions and
/// validations for different targets rarely contend. Within a target the
/// last observation to reach the store wins; client timestamps play no part
/// in ordering.
pub struct ObservationStore {
    targets: DashMap<TargetId, BTreeMap<ObserverId, StoredObservation>>,
    validator: ObservationValidator,
    sequence: AtomicU64,
}

impl Default for ObservationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObservationStore {
    pub fn new() -> Self {
        Self::with_config(DEFAULT_SHARD_COUNT, ObservationValidator::new())
    }

    /// Create a store with `shard_count` lock shards.
    ///
    /// The count is rounded up to a power of two, minimum 2.
    pub fn with_config(shard_count: usize, validator: ObservationValidator) -> Self {
        let shards = shard_count.max(2).next_power_of_two();
        Self {
            targets: DashMap::with_shard_amount(shards),
            validator,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn validator(&self) -> &ObservationValidator {
        &self.validator
    }

    /// Validate and store an observation, overwriting the observer's previous one.
    pub fn put(&self, observation: Observation) -> ObservationResult<PutReceipt> {
        let target_id = observation.target_id.clone();
        let observer_id = observation.observer_id.clone();

        let checked = match self.validator.check(observation) {
            Ok(checked) => checked,
            Err(err) => {
                warn!(target_id = %target_id, observer = %observer_id, error = %err, "Rejected observation");
                return Err(err);
            }
        };

        let mut observers = self.targets.entry(target_id.clone()).or_default();
        // Sequence is taken under the shard lock so it matches arrival order
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let previous = observers.insert(
            observer_id.clone(),
            StoredObservation {
                observation: checked.observation,
                received_at: Instant::now(),
                sequence,
            },
        );
        drop(observers);

        let outcome = match previous {
            Some(prev) => {
                debug!(
                    target_id = %target_id,
                    observer = %observer_id,
                    replaced_sequence = prev.sequence,
                    sequence,
                    "Replaced observation"
                );
                PutOutcome::Replaced
            }
            None => PutOutcome::Inserted,
        };

        Ok(PutReceipt {
            outcome,
            renormalized: checked.renormalized,
            sequence,
        })
    }

    /// Snapshot of a target's observations, ordered by observer id
    pub fn get(&self, target_id: &TargetId) -> Vec<Observation> {
        self.targets
            .get(target_id)
            .map(|observers| observers.values().map(|s| s.observation.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of distinct observers currently holding an observation of a target
    pub fn observer_count(&self, target_id: &TargetId) -> usize {
        self.targets.get(target_id).map(|o| o.len()).unwrap_or(0)
    }

    /// Drop everything known about a target, returning how many observations went
    pub fn remove_target(&self, target_id: &TargetId) -> usize {
        self.targets
            .remove(target_id)
            .map(|(_, observers)| observers.len())
            .unwrap_or(0)
    }

    /// Remove observations that arrived more than `max_age` ago.
    ///
    /// The store never calls this on its own; expiry policy belongs to the caller.
    pub fn prune_older_than(&self, max_age: Duration) -> usize {
        let mut removed = 0;
        self.targets.retain(|_, observers| {
            let before = observers.len();
            observers.retain(|_, stored| stored.received_at.elapsed() <= max_age);
            removed += before - observers.len();
            !observers.is_empty()
        });
        if removed > 0 {
            debug!(removed, max_age_ms = max_age.as_millis() as u64, "Pruned observations");
        }
        removed
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    pub fn observation_count(&self) -> usize {
        self.targets.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            targets: self.target_count(),
            observations: self.observation_count(),
        }
    }

    pub fn clear(&self) {
        self.targets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EntityId;
    use crate::validation::ObservationError;
    use nalgebra::Vector3;
    use std::sync::Arc;
    use std::thread;

    fn obs(observer: i64, target: i64, distance: f64) -> Observation {
        Observation::new(observer, target, Vector3::new(observer as f64, 0.0, 0.0), Vector3::z(), distance)
    }

    #[test]
    fn test_resubmission_overwrites() {
        let store = ObservationStore::new();
        let first = store.put(obs(1, 7, 10.0)).unwrap();
        let second = store.put(obs(1, 7, 12.0)).unwrap();

        assert_eq!(first.outcome, PutOutcome::Inserted);
        assert_eq!(second.outcome, PutOutcome::Replaced);
        assert!(second.sequence > first.sequence);

        let snapshot = store.get(&EntityId::from(7));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].distance, 12.0);
        assert_eq!(store.observation_count(), 1);
    }

    #[test]
    fn test_last_arrival_wins_over_timestamp() {
        let store = ObservationStore::new();
        store.put(obs(1, 7, 10.0).with_timestamp(2_000.0)).unwrap();
        // Older client timestamp, later arrival
        store.put(obs(1, 7, 20.0).with_timestamp(1_000.0)).unwrap();

        let snapshot = store.get(&EntityId::from(7));
        assert_eq!(snapshot[0].distance, 20.0);
        assert_eq!(snapshot[0].timestamp, 1_000.0);
    }

    #[test]
    fn test_snapshot_ordered_by_observer() {
        let store = ObservationStore::new();
        for observer in [5, 2, 9, 1] {
            store.put(obs(observer, 3, 1.0)).unwrap();
        }
        store
            .put(Observation::new("zulu", 3, Vector3::zeros(), Vector3::x(), 1.0))
            .unwrap();

        let ids: Vec<EntityId> = store
            .get(&EntityId::from(3))
            .into_iter()
            .map(|o| o.observer_id)
            .collect();
        assert_eq!(
            ids,
            vec![
                EntityId::from(1),
                EntityId::from(2),
                EntityId::from(5),
                EntityId::from(9),
                EntityId::from("zulu"),
            ]
        );
    }

    #[test]
    fn test_rejection_leaves_other_data_intact() {
        let store = ObservationStore::new();
        store.put(obs(1, 4, 8.0)).unwrap();

        let err = store.put(obs(1, 4, -3.0)).unwrap_err();
        assert_eq!(err, ObservationError::InvalidDistance(-3.0));

        let err = store
            .put(Observation::new(2, 4, Vector3::zeros(), Vector3::new(2.0, 0.0, 0.0), 1.0))
            .unwrap_err();
        assert!(matches!(err, ObservationError::DirectionNotNormalized { .. }));

        let snapshot = store.get(&EntityId::from(4));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].distance, 8.0);
    }

    #[test]
    fn test_stored_direction_is_normalized() {
        let store = ObservationStore::new();
        let receipt = store
            .put(Observation::new(1, 1, Vector3::zeros(), Vector3::new(0.0, 0.98, 0.0), 1.0))
            .unwrap();
        assert!(receipt.renormalized);
        let stored = &store.get(&EntityId::from(1))[0];
        assert!((stored.direction.norm() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_target_is_empty() {
        let store = ObservationStore::new();
        assert!(store.get(&EntityId::from("ghost")).is_empty());
        assert_eq!(store.observer_count(&EntityId::from("ghost")), 0);
    }

    #[test]
    fn test_remove_and_prune() {
        let store = ObservationStore::new();
        store.put(obs(1, 1, 1.0)).unwrap();
        store.put(obs(2, 1, 1.0)).unwrap();
        store.put(obs(1, 2, 1.0)).unwrap();

        assert_eq!(store.remove_target(&EntityId::from(1)), 2);
        assert_eq!(store.target_count(), 1);

        assert_eq!(store.prune_older_than(Duration::from_secs(60)), 0);
        thread::sleep(Duration::from_millis(5));
        assert_eq!(store.prune_older_than(Duration::ZERO), 1);
        assert_eq!(store.stats(), StoreStats { targets: 0, observations: 0 });
    }

    #[test]
    fn test_shard_count_rounded_to_power_of_two() {
        // Would panic inside DashMap if passed through unchanged
        let store = ObservationStore::with_config(3, ObservationValidator::new());
        store.put(obs(1, 1, 1.0)).unwrap();
        assert_eq!(store.target_count(), 1);
    }

    #[test]
    fn test_concurrent_submissions_do_not_mix_targets() {
        let store = Arc::new(ObservationStore::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for round in 0..50 {
                        for observer in 0..4 {
                            store.put(obs(observer, t, (t * 100 + round) as f64)).unwrap();
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.target_count(), 8);
        for t in 0..8i64 {
            let snapshot = store.get(&EntityId::from(t));
            assert_eq!(snapshot.len(), 4);
            for o in snapshot {
                assert_eq!(o.target_id, EntityId::from(t));
                assert_eq!(o.distance, (t * 100 + 49) as f64);
            }
        }
    }
}
