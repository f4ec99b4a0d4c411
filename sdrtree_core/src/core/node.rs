use std::{collections::HashMap, hash::BuildHasher};

use serde_json::{Map, Value as JsonValue, json};

use super::{context::PartitionContext, value::Value};

/// Why a node stopped splitting.
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    MaxDepthReached { limit: u32, value: u32 },
    LastAttribute,
    BelowChildRecordCountLimit { limit: u64, value: u64 },
    BelowCvThreshold { limit: f64, value: String },
    /// The branch's queries kept failing; the leaf carries the parent's mean.
    QueryFailed,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::MaxDepthReached { .. } => "max_depth_reached",
            StopReason::LastAttribute => "last_attribute",
            StopReason::BelowChildRecordCountLimit { .. } => "below_child_record_count_limit",
            StopReason::BelowCvThreshold { .. } => "below_cv_threshold",
            StopReason::QueryFailed => "query_failed",
        }
    }

    pub fn detail(&self) -> Option<String> {
        match self {
            StopReason::MaxDepthReached { limit, value } => Some(format!("limit {}, value {}", limit, value)),
            StopReason::BelowChildRecordCountLimit { limit, value } => {
                Some(format!("limit {}, value {}", limit, value))
            }
            StopReason::BelowCvThreshold { limit, value } => Some(format!("limit {}, value {}", limit, value)),
            StopReason::LastAttribute | StopReason::QueryFailed => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitOperator {
    Eq,
}

impl SplitOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            SplitOperator::Eq => "=",
        }
    }
}

/// Cumulative filter of the partition a node was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterTrace {
    pub filter: String,
    pub bindings: Vec<Value>,
}

impl FilterTrace {
    pub fn of(context: &PartitionContext) -> Self {
        Self {
            filter: context.filter.to_string(),
            bindings: context.bindings.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TreeNode {
    Leaf {
        prediction: f64,
        stopped_on: Option<StopReason>,
        failure: Option<String>,
        trace: Option<FilterTrace>,
    },
    Branch {
        split_column: String,
        coefficient_of_variation: Option<String>,
        children: Vec<ChildEdge>,
        trace: Option<FilterTrace>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChildEdge {
    pub attribute: String,
    pub operator: SplitOperator,
    pub value: Value,
    pub subtree: TreeNode,
}

impl TreeNode {
    pub fn leaf(prediction: f64, stopped_on: StopReason, trace: Option<FilterTrace>) -> Self {
        TreeNode::Leaf {
            prediction,
            stopped_on: Some(stopped_on),
            failure: None,
            trace,
        }
    }

    /// Marker for a branch whose evaluation failed after retries.
    pub fn failed_leaf(prediction: f64, failure: String) -> Self {
        TreeNode::Leaf {
            prediction,
            stopped_on: Some(StopReason::QueryFailed),
            failure: Some(failure),
            trace: None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, TreeNode::Leaf { .. })
    }

    pub fn children(&self) -> &[ChildEdge] {
        match self {
            TreeNode::Leaf { .. } => &[],
            TreeNode::Branch { children, .. } => children,
        }
    }

    pub fn leaf_count(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 1,
            TreeNode::Branch { children, .. } => children.iter().map(|c| c.subtree.leaf_count()).sum(),
        }
    }

    /// Number of edges on the longest root-to-leaf path.
    pub fn depth(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 0,
            TreeNode::Branch { children, .. } => children
                .iter()
                .map(|c| c.subtree.depth() + 1)
                .max()
                .unwrap_or(0),
        }
    }

    /// Follows matching edges down to a leaf. `None` when the row carries a
    /// value the tree never saw at some branch.
    pub fn predict<S: BuildHasher>(&self, row: &HashMap<String, Value, S>) -> Option<f64> {
        let mut node = self;
        loop {
            match node {
                TreeNode::Leaf { prediction, .. } => return Some(*prediction),
                TreeNode::Branch { split_column, children, .. } => {
                    let value = row.get(split_column)?;
                    let edge = children.iter().find(|edge| edge.value.sql_eq(value))?;
                    node = &edge.subtree;
                }
            }
        }
    }

    /// Renders the model object. Without `debug` only predictions, the
    /// selection criteria and failure markers are emitted.
    pub fn to_json(&self, debug: bool) -> JsonValue {
        let mut object = Map::new();
        self.write_fields(&mut object, debug);
        JsonValue::Object(object)
    }

    fn write_fields(&self, object: &mut Map<String, JsonValue>, debug: bool) {
        match self {
            TreeNode::Leaf { prediction, stopped_on, failure, trace } => {
                object.insert("prediction".to_string(), json!(prediction));

                if let Some(failure) = failure {
                    object.insert("stoppedOn".to_string(), json!(StopReason::QueryFailed.as_str()));
                    object.insert("error".to_string(), json!(failure));
                } else if debug {
                    if let Some(reason) = stopped_on {
                        object.insert("stoppedOn".to_string(), json!(reason.as_str()));
                        if let Some(detail) = reason.detail() {
                            object.insert("stopDetail".to_string(), json!(detail));
                        }
                    }
                }

                if debug {
                    write_trace(object, trace.as_ref());
                }
            }
            TreeNode::Branch { split_column, coefficient_of_variation, children, trace } => {
                if debug {
                    object.insert("nextAttribute".to_string(), json!(split_column));
                    if let Some(cov) = coefficient_of_variation {
                        object.insert("coefficientOfVariation".to_string(), json!(cov));
                    }
                    write_trace(object, trace.as_ref());
                }

                let children = children
                    .iter()
                    .map(|edge| {
                        let mut child = Map::new();
                        child.insert("selectionCriteriaAttribute".to_string(), json!(edge.attribute));
                        child.insert("selectionCriteriaPredicate".to_string(), json!(edge.operator.as_str()));
                        child.insert("selectionCriteriaValue".to_string(), json!(edge.value));
                        edge.subtree.write_fields(&mut child, debug);
                        JsonValue::Object(child)
                    })
                    .collect::<Vec<_>>();

                object.insert("children".to_string(), JsonValue::Array(children));
            }
        }
    }
}

fn write_trace(object: &mut Map<String, JsonValue>, trace: Option<&FilterTrace>) {
    if let Some(trace) = trace {
        object.insert("cumulativeFilter".to_string(), json!(trace.filter));
        object.insert("cumulativeFilterBindings".to_string(), json!(trace.bindings));
    }
}
