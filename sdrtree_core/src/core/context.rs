use std::{fmt, sync::Arc};

use itertools::Itertools;
use smallvec::SmallVec;

use super::{
    error::{Result, TreeError},
    parameters::TrainingParameters,
    value::Value,
};

/// Conjunction of `column = :n` equality predicates. The n-th conjunct binds
/// to the n-th entry of the partition's bindings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterPredicate {
    conjuncts: SmallVec<[String; 8]>,
}

impl FilterPredicate {
    /// The always-true predicate of the root partition.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn and_equals(&self, column: &str) -> Self {
        let mut conjuncts = self.conjuncts.clone();
        conjuncts.push(column.to_string());
        Self { conjuncts }
    }

    pub fn columns(&self) -> &[String] {
        &self.conjuncts
    }

    pub fn len(&self) -> usize {
        self.conjuncts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conjuncts.is_empty()
    }
}

impl fmt::Display for FilterPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "1=1")?;
        for (i, column) in self.conjuncts.iter().enumerate() {
            write!(f, " AND {} = :{}", column, i + 1)?;
        }
        Ok(())
    }
}

/// Everything one node evaluation needs. Built once by the parent and handed
/// over to the spawned child, never touched again afterwards.
#[derive(Debug, Clone)]
pub struct PartitionContext {
    pub table_name: Arc<str>,
    pub filter: FilterPredicate,
    pub bindings: SmallVec<[Value; 8]>,
    pub target: Arc<str>,
    pub remaining_columns: SmallVec<[String; 16]>,
    pub depth: u32,
    pub parameters: Arc<TrainingParameters>,
}

impl PartitionContext {
    pub fn root(
        table_name: &str,
        target: &str,
        columns: &[String],
        parameters: TrainingParameters,
    ) -> Result<Self> {
        if table_name.trim().is_empty() {
            return Err(TreeError::Configuration("table name must not be empty".to_string()));
        }

        if target.trim().is_empty() {
            return Err(TreeError::Configuration("target column must not be empty".to_string()));
        }

        if columns.iter().any(|c| c == target) {
            return Err(TreeError::Configuration(format!(
                "target column {} cannot also be a split column",
                target
            )));
        }

        parameters.validate()?;

        let remaining_columns = columns
            .iter()
            .filter(|c| !c.trim().is_empty())
            .unique()
            .cloned()
            .collect::<SmallVec<[String; 16]>>();

        Ok(Self {
            table_name: Arc::from(table_name),
            filter: FilterPredicate::all(),
            bindings: SmallVec::new(),
            target: Arc::from(target),
            remaining_columns,
            depth: 0,
            parameters: Arc::new(parameters),
        })
    }

    /// Context of the partition where `column` equals `value`.
    pub fn child(&self, column: &str, value: Value) -> Self {
        let mut bindings = self.bindings.clone();
        bindings.push(value);

        let remaining_columns = self
            .remaining_columns
            .iter()
            .filter(|c| c.as_str() != column)
            .cloned()
            .collect();

        Self {
            table_name: Arc::clone(&self.table_name),
            filter: self.filter.and_equals(column),
            bindings,
            target: Arc::clone(&self.target),
            remaining_columns,
            depth: self.depth + 1,
            parameters: Arc::clone(&self.parameters),
        }
    }
}
