use std::{
    sync::{
        Mutex,
        atomic::{AtomicU32, AtomicUsize, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;

use super::traits::{ColumnReduction, NodeStats, StatsProvider};
use crate::core::{
    context::FilterPredicate,
    error::{Result, TreeError},
    value::Value,
};

/// Test-only provider answering from scripted tables keyed by partition
/// bindings. Records every call and the peak number of concurrent calls.
#[derive(Default)]
pub struct ScriptedStatsProvider {
    stats: DashMap<Vec<Value>, NodeStats>,
    default_stats: Mutex<Option<NodeStats>>,
    reductions: DashMap<String, f64>,
    distinct: DashMap<String, Vec<Value>>,
    node_failures: DashMap<Vec<Value>, u32>,
    reduction_failures: DashMap<Vec<Value>, u32>,
    distinct_failures: AtomicU32,
    hanging: DashMap<Vec<Value>, ()>,
    delay: Mutex<Duration>,
    calls: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    NodeStats(Vec<Value>),
    Reduction { bindings: Vec<Value>, candidates: Vec<String> },
    Distinct(String),
}

struct InFlight<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::AcqRel) + 1;
        peak.fetch_max(now, Ordering::AcqRel);
        Self { counter }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ScriptedStatsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_stats(&self, bindings: &[Value], stats: NodeStats) {
        self.stats.insert(bindings.to_vec(), stats);
    }

    /// Answer for partitions without scripted stats. Unset means "no rows".
    pub fn set_default_stats(&self, stats: NodeStats) {
        *self.default_stats.lock().unwrap() = Some(stats);
    }

    pub fn set_reduction(&self, column: &str, reduction: f64) {
        self.reductions.insert(column.to_string(), reduction);
    }

    pub fn set_distinct(&self, column: &str, values: Vec<Value>) {
        self.distinct.insert(column.to_string(), values);
    }

    /// `node_stats` for these bindings fails the next `times` calls.
    pub fn fail_node_stats(&self, bindings: &[Value], times: u32) {
        self.node_failures.insert(bindings.to_vec(), times);
    }

    /// `column_variance_reduction` for these bindings fails the next `times` calls.
    pub fn fail_reductions(&self, bindings: &[Value], times: u32) {
        self.reduction_failures.insert(bindings.to_vec(), times);
    }

    pub fn fail_distinct_times(&self, times: u32) {
        self.distinct_failures.store(times, Ordering::Release);
    }

    /// `node_stats` for these bindings never completes.
    pub fn hang_node_stats(&self, bindings: &[Value]) {
        self.hanging.insert(bindings.to_vec(), ());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn node_stats_calls(&self) -> usize {
        self.count_calls(|c| matches!(c, Call::NodeStats(_)))
    }

    pub fn reduction_calls(&self) -> usize {
        self.count_calls(|c| matches!(c, Call::Reduction { .. }))
    }

    pub fn distinct_calls(&self) -> usize {
        self.count_calls(|c| matches!(c, Call::Distinct(_)))
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Acquire)
    }

    fn count_calls(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| predicate(c)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

fn take_failure(failures: &DashMap<Vec<Value>, u32>, bindings: &[Value]) -> bool {
    match failures.get_mut(bindings) {
        Some(mut remaining) if *remaining > 0 => {
            *remaining -= 1;
            true
        }
        _ => false,
    }
}

impl StatsProvider for ScriptedStatsProvider {
    async fn node_stats(
        &self,
        _table: &str,
        _filter: &FilterPredicate,
        bindings: &[Value],
        _target: &str,
    ) -> Result<NodeStats> {
        let _in_flight = InFlight::enter(&self.in_flight, &self.peak_in_flight);
        self.record(Call::NodeStats(bindings.to_vec()));
        self.pause().await;

        if self.hanging.contains_key(bindings) {
            std::future::pending::<()>().await;
        }

        if take_failure(&self.node_failures, bindings) {
            return Err(TreeError::QueryFailed {
                query: "node_stats",
                message: "scripted failure".to_string(),
            });
        }

        let stats = match self.stats.get(bindings) {
            Some(stats) => *stats,
            None => self.default_stats.lock().unwrap().unwrap_or_default(),
        };

        Ok(stats)
    }

    async fn column_variance_reduction(
        &self,
        _table: &str,
        _filter: &FilterPredicate,
        bindings: &[Value],
        _target: &str,
        candidates: &[String],
        _prior_stddev: f64,
    ) -> Result<Vec<ColumnReduction>> {
        let _in_flight = InFlight::enter(&self.in_flight, &self.peak_in_flight);
        self.record(Call::Reduction {
            bindings: bindings.to_vec(),
            candidates: candidates.to_vec(),
        });
        self.pause().await;

        if take_failure(&self.reduction_failures, bindings) {
            return Err(TreeError::QueryFailed {
                query: "column_variance_reduction",
                message: "scripted failure".to_string(),
            });
        }

        let mut ranked = candidates
            .iter()
            .map(|column| ColumnReduction {
                column: column.clone(),
                reduction: self.reductions.get(column).map(|r| *r).unwrap_or(0.0),
            })
            .collect::<Vec<_>>();

        ranked.sort_by(|a, b| b.reduction.total_cmp(&a.reduction));
        Ok(ranked)
    }

    async fn distinct_values(&self, _table: &str, column: &str) -> Result<Vec<Value>> {
        let _in_flight = InFlight::enter(&self.in_flight, &self.peak_in_flight);
        self.record(Call::Distinct(column.to_string()));
        self.pause().await;

        let failed = self
            .distinct_failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();

        if failed {
            return Err(TreeError::QueryFailed {
                query: "distinct_values",
                message: "scripted failure".to_string(),
            });
        }

        Ok(self.distinct.get(column).map(|v| v.clone()).unwrap_or_default())
    }
}
