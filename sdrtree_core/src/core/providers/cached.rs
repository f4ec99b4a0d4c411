use std::sync::Arc;

use crc::{CRC_64_ECMA_182, Crc};
use log::trace;
use moka::sync::Cache;

use super::traits::{ColumnReduction, NodeStats, StatsProvider};
use crate::core::{context::FilterPredicate, error::Result, value::Value};

const CRC_64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

/// Wraps a provider and remembers `distinct_values` per table/column. Every
/// branch splitting on the same column asks for the same whole-table values.
pub struct CachedStatsProvider<P: StatsProvider> {
    inner: P,
    distinct: Cache<u64, Arc<Vec<Value>>>,
}

impl<P: StatsProvider> CachedStatsProvider<P> {
    pub fn new(inner: P, capacity: u64) -> Self {
        Self {
            inner,
            distinct: Cache::new(capacity),
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    fn key(table: &str, column: &str) -> u64 {
        let mut digest = CRC_64.digest();
        digest.update(table.as_bytes());
        digest.update(&[0u8]);
        digest.update(column.as_bytes());
        digest.finalize()
    }
}

impl<P: StatsProvider> StatsProvider for CachedStatsProvider<P> {
    async fn node_stats(
        &self,
        table: &str,
        filter: &FilterPredicate,
        bindings: &[Value],
        target: &str,
    ) -> Result<NodeStats> {
        self.inner.node_stats(table, filter, bindings, target).await
    }

    async fn column_variance_reduction(
        &self,
        table: &str,
        filter: &FilterPredicate,
        bindings: &[Value],
        target: &str,
        candidates: &[String],
        prior_stddev: f64,
    ) -> Result<Vec<ColumnReduction>> {
        self.inner
            .column_variance_reduction(table, filter, bindings, target, candidates, prior_stddev)
            .await
    }

    async fn distinct_values(&self, table: &str, column: &str) -> Result<Vec<Value>> {
        let key = Self::key(table, column);

        if let Some(values) = self.distinct.get(&key) {
            trace!("Distinct values of {}.{} served from cache", table, column);
            return Ok(values.as_ref().clone());
        }

        let values = self.inner.distinct_values(table, column).await?;
        self.distinct.insert(key, Arc::new(values.clone()));
        Ok(values)
    }
}
