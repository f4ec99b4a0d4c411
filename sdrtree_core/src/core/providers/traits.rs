use std::future::Future;

use crate::core::{context::FilterPredicate, error::Result, value::Value};

/// Target aggregates over one partition. `mean` is absent when no row
/// matched, `stddev` when fewer than two target values did.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NodeStats {
    pub mean: Option<f64>,
    pub stddev: Option<f64>,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnReduction {
    pub column: String,
    pub reduction: f64,
}

/// Source of the group-wise aggregates the tree builder runs on. Any store
/// that can compute mean/stddev/count per filtered group can back it.
pub trait StatsProvider: Send + Sync + 'static {
    fn node_stats(
        &self,
        table: &str,
        filter: &FilterPredicate,
        bindings: &[Value],
        target: &str,
    ) -> impl Future<Output = Result<NodeStats>> + Send;

    /// Standard deviation reduction of splitting the partition on each
    /// candidate, sorted by descending reduction.
    fn column_variance_reduction(
        &self,
        table: &str,
        filter: &FilterPredicate,
        bindings: &[Value],
        target: &str,
        candidates: &[String],
        prior_stddev: f64,
    ) -> impl Future<Output = Result<Vec<ColumnReduction>>> + Send;

    /// Every value observed for `column` in the whole table, ignoring filters.
    fn distinct_values(
        &self,
        table: &str,
        column: &str,
    ) -> impl Future<Output = Result<Vec<Value>>> + Send;
}
