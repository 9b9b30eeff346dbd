//! Shared observation state

pub mod store;

pub use store::{ObservationStore, PutOutcome, PutReceipt, StoreStats, DEFAULT_SHARD_COUNT};
