use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use futures::{
    StreamExt,
    future::BoxFuture,
    stream,
};
use log::{debug, warn};

use super::{
    cancel::CancelSignal,
    context::PartitionContext,
    error::{Result, TreeError},
    node::{ChildEdge, SplitOperator, TreeNode},
    value::Value,
};

/// What one node evaluation produced.
#[derive(Debug)]
pub enum NodeOutcome {
    Built(TreeNode),
    /// No rows reached the node. The parent leaves it out.
    Pruned,
    /// `prediction` is the node's own rounded mean when its statistics were
    /// fetched before the failure.
    Failed {
        error: TreeError,
        prediction: Option<f64>,
    },
}

impl NodeOutcome {
    pub fn failed(error: TreeError) -> Self {
        NodeOutcome::Failed { error, prediction: None }
    }
}

/// Sorted, de-duplicated split values. `NULL` never satisfies an equality
/// predicate, so it would only produce an empty partition. Numerically equal
/// values select the same rows and collapse into one.
pub fn child_values(values: Vec<Value>) -> Vec<Value> {
    let mut values = values
        .into_iter()
        .filter(|v| !v.is_null())
        .map(Value::normalized)
        .collect::<Vec<_>>();
    values.sort();
    values.dedup();
    values
}

/// Spawns one evaluation per value of `split_column`, waits for every child
/// and assembles the edges in value order.
///
/// At most `width` children of this node are spawned at once; the rest wait
/// in value order until a running sibling reports.
///
/// A child failing with a transient error becomes a failed leaf predicting
/// its own mean when known, else the parent's. Any fatal child error fails
/// the whole fan-out, but only after all children have reported.
pub async fn fan_out<F>(
    parent: &PartitionContext,
    split_column: &str,
    values: Vec<Value>,
    parent_prediction: f64,
    width: usize,
    cancel: &CancelSignal,
    evaluate: F,
) -> Result<Vec<ChildEdge>>
where
    F: Fn(PartitionContext) -> BoxFuture<'static, NodeOutcome>,
{
    let values = child_values(values);
    let expected = values.len();
    let responders = Arc::new(AtomicUsize::new(0));

    debug!(
        "Depth {}: fanning out {} children on {} ({} at a time)",
        parent.depth,
        expected,
        split_column,
        width.max(1)
    );

    let results = stream::iter(values.iter().cloned())
        .map(|value: Value| {
            let evaluation = evaluate(parent.child(split_column, value));
            let responders = Arc::clone(&responders);

            tokio::spawn(async move {
                let outcome = evaluation.await;
                responders.fetch_add(1, Ordering::AcqRel);
                outcome
            })
        })
        .buffered(width.max(1))
        .collect::<Vec<_>>()
        .await;

    debug!(
        "Depth {}: {}/{} children responded on {}",
        parent.depth,
        responders.load(Ordering::Acquire),
        expected,
        split_column
    );

    let mut edges = Vec::with_capacity(expected);
    let mut fatal: Option<TreeError> = None;

    for (value, joined) in values.into_iter().zip(results) {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(join_error) => {
                cancel.cancel();
                NodeOutcome::failed(TreeError::TaskFailed(join_error.to_string()))
            }
        };

        match outcome {
            NodeOutcome::Built(subtree) => edges.push(ChildEdge {
                attribute: split_column.to_string(),
                operator: SplitOperator::Eq,
                value,
                subtree,
            }),
            NodeOutcome::Pruned => {}
            NodeOutcome::Failed { error: e, prediction } if e.is_transient() => {
                let prediction = prediction.unwrap_or(parent_prediction);
                warn!(
                    "Branch {} = {} at depth {} failed, predicting {}: {}",
                    split_column,
                    value,
                    parent.depth + 1,
                    prediction,
                    e
                );
                edges.push(ChildEdge {
                    attribute: split_column.to_string(),
                    operator: SplitOperator::Eq,
                    value,
                    subtree: TreeNode::failed_leaf(prediction, e.to_string()),
                });
            }
            NodeOutcome::Failed { error: e, .. } => {
                let replace = match &fatal {
                    None => true,
                    Some(TreeError::Cancelled) => !matches!(e, TreeError::Cancelled),
                    Some(_) => false,
                };
                if replace {
                    fatal = Some(e);
                }
            }
        }
    }

    match fatal {
        Some(e) => Err(e),
        None => Ok(edges),
    }
}
