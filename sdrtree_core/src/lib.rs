use std::time::Duration;

// Number of node evaluations allowed to query the provider at once
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;

pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(50);
pub const DEFAULT_MAX_RETRY_BACKOFF: Duration = Duration::from_secs(2);

// Entries kept by the distinct value cache (one per table/column pair)
pub const DEFAULT_DISTINCT_CACHE_SIZE: u64 = 1024;

pub const ALGORITHM_NAME: &str = "decision_tree";

pub mod core;

pub mod configuration;
pub mod ledger;
