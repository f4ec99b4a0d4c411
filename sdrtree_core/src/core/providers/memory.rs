use std::{collections::BTreeMap, sync::Arc};

use ahash::AHashMap;
use dashmap::DashMap;
use log::debug;

use super::traits::{ColumnReduction, NodeStats, StatsProvider};
use crate::core::{
    context::FilterPredicate,
    error::{Result, TreeError},
    value::Value,
};

/// Row-major in-memory table.
#[derive(Debug, Clone)]
pub struct MemoryTable {
    name: String,
    columns: Vec<String>,
    column_index: AHashMap<String, usize>,
    rows: Vec<Vec<Value>>,
}

impl MemoryTable {
    pub fn new(name: &str, columns: Vec<String>) -> Result<Self> {
        let mut column_index = AHashMap::with_capacity(columns.len());
        for (i, column) in columns.iter().enumerate() {
            if column_index.insert(column.clone(), i).is_some() {
                return Err(TreeError::Configuration(format!(
                    "duplicate column {} in table {}",
                    column, name
                )));
            }
        }

        Ok(Self {
            name: name.to_string(),
            columns,
            column_index,
            rows: Vec::new(),
        })
    }

    /// Builds a table from a JSON array of flat objects. Columns appear in
    /// first-seen order; keys missing from a row read as NULL.
    pub fn from_json_str(name: &str, json: &str) -> Result<Self> {
        let parsed: serde_json::Value = serde_json::from_str(json)?;
        match parsed {
            serde_json::Value::Array(rows) => Self::from_json_rows(name, &rows),
            _ => Err(TreeError::Configuration(
                "dataset must be a JSON array of objects".to_string(),
            )),
        }
    }

    pub fn from_json_rows(name: &str, rows: &[serde_json::Value]) -> Result<Self> {
        let mut columns: Vec<String> = Vec::new();
        let mut objects = Vec::with_capacity(rows.len());

        for (i, row) in rows.iter().enumerate() {
            let object = row.as_object().ok_or_else(|| {
                TreeError::Configuration(format!("dataset row {} is not a JSON object", i))
            })?;

            for key in object.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }

            objects.push(object);
        }

        let mut table = Self::new(name, columns)?;
        table.rows.reserve(objects.len());

        for object in objects {
            let row = table
                .columns
                .iter()
                .map(|column| match object.get(column) {
                    Some(value) => json_to_value(column, value),
                    None => Ok(Value::Null),
                })
                .collect::<Result<Vec<Value>>>()?;
            table.rows.push(row);
        }

        Ok(table)
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(TreeError::Configuration(format!(
                "row has {} values but table {} has {} columns",
                row.len(),
                self.name,
                self.columns.len()
            )));
        }

        self.rows.push(row);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn column_position(&self, column: &str) -> Result<usize> {
        self.column_index
            .get(column)
            .copied()
            .ok_or_else(|| TreeError::UnknownColumn(format!("{}.{}", self.name, column)))
    }

    fn matching_rows(&self, filter: &FilterPredicate, bindings: &[Value]) -> Result<Vec<&[Value]>> {
        if filter.len() != bindings.len() {
            return Err(TreeError::Configuration(format!(
                "filter {} expects {} bindings, got {}",
                filter,
                filter.len(),
                bindings.len()
            )));
        }

        let predicates = filter
            .columns()
            .iter()
            .zip(bindings)
            .map(|(column, binding)| Ok((self.column_position(column)?, binding)))
            .collect::<Result<Vec<(usize, &Value)>>>()?;

        Ok(self
            .rows
            .iter()
            .filter(|row| predicates.iter().all(|(pos, binding)| row[*pos].sql_eq(binding)))
            .map(|row| row.as_slice())
            .collect())
    }
}

fn json_to_value(column: &str, value: &serde_json::Value) -> Result<Value> {
    match value {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::Bool(v) => Ok(Value::Bool(*v)),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(Value::Int(i)),
            None => n
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| TreeError::Configuration(format!("column {} holds an unsupported number", column))),
        },
        serde_json::Value::String(s) => Ok(Value::Text(s.clone())),
        _ => Err(TreeError::Configuration(format!(
            "column {} holds a nested value, only scalars are supported",
            column
        ))),
    }
}

/// Streaming mean and sample variance (Welford).
#[derive(Debug, Default, Clone, Copy)]
struct Moments {
    n: u64,
    mean: f64,
    m2: f64,
}

impl Moments {
    #[inline]
    fn push(&mut self, x: f64) {
        self.n += 1;
        let delta = x - self.mean;
        self.mean += delta / self.n as f64;
        self.m2 += delta * (x - self.mean);
    }

    fn mean(&self) -> Option<f64> {
        (self.n > 0).then_some(self.mean)
    }

    fn sample_stddev(&self) -> Option<f64> {
        (self.n > 1).then(|| (self.m2 / (self.n - 1) as f64).sqrt())
    }
}

/// Statistics provider computing every aggregate over in-memory tables.
///
/// Target values that are not numeric are treated like SQL NULLs: they count
/// as rows but never enter mean or stddev.
#[derive(Clone, Default)]
pub struct MemoryStatsProvider {
    tables: Arc<DashMap<String, Arc<MemoryTable>>>,
}

impl MemoryStatsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_table(&self, table: MemoryTable) {
        debug!("Registering table {} with {} rows", table.name(), table.len());
        self.tables.insert(table.name().to_string(), Arc::new(table));
    }

    pub fn table(&self, name: &str) -> Result<Arc<MemoryTable>> {
        self.tables
            .get(name)
            .map(|t| Arc::clone(t.value()))
            .ok_or_else(|| TreeError::UnknownTable(name.to_string()))
    }
}

impl StatsProvider for MemoryStatsProvider {
    async fn node_stats(
        &self,
        table: &str,
        filter: &FilterPredicate,
        bindings: &[Value],
        target: &str,
    ) -> Result<NodeStats> {
        let table = self.table(table)?;
        let target_pos = table.column_position(target)?;
        let rows = table.matching_rows(filter, bindings)?;

        let mut moments = Moments::default();
        for row in rows.iter() {
            if let Some(y) = row[target_pos].as_f64() {
                moments.push(y);
            }
        }

        Ok(NodeStats {
            mean: moments.mean(),
            stddev: moments.sample_stddev(),
            count: rows.len() as u64,
        })
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
        let table = self.table(table)?;
        let target_pos = table.column_position(target)?;
        let rows = table.matching_rows(filter, bindings)?;
        let total = rows.len() as f64;

        let mut reductions = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let pos = table.column_position(candidate)?;

            // Ordered map keeps the floating point summation order stable between runs.
            // Keys are normalized so 1 and 1.0 land in one group, as in GROUP BY.
            let mut groups: BTreeMap<Value, (u64, Moments)> = BTreeMap::new();
            for row in rows.iter() {
                let key = row[pos].clone().normalized();
                let null = key.is_null();
                let entry = groups.entry(key).or_default();
                if !null {
                    entry.0 += 1;
                }
                if let Some(y) = row[target_pos].as_f64() {
                    entry.1.push(y);
                }
            }

            let weighted: f64 = groups
                .iter()
                .filter(|(key, _)| !key.is_null())
                .filter_map(|(_, (count, moments))| {
                    moments
                        .sample_stddev()
                        .map(|stddev| *count as f64 / total * stddev)
                })
                .sum();

            reductions.push(ColumnReduction {
                column: candidate.clone(),
                reduction: prior_stddev - weighted,
            });
        }

        reductions.sort_by(|a, b| b.reduction.total_cmp(&a.reduction));
        Ok(reductions)
    }

    async fn distinct_values(&self, table: &str, column: &str) -> Result<Vec<Value>> {
        let table = self.table(table)?;
        let pos = table.column_position(column)?;

        let mut values = table
            .rows
            .iter()
            .map(|row| row[pos].clone().normalized())
            .collect::<Vec<_>>();
        values.sort();
        values.dedup();
        Ok(values)
    }
}
