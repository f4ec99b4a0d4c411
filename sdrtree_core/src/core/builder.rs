use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use futures::{FutureExt, future::BoxFuture};
use log::{debug, error, info};
use stopwatch::Stopwatch;
use tokio::sync::Semaphore;

use super::{
    cancel::CancelSignal,
    context::PartitionContext,
    error::{Result, TreeError},
    fanout::{self, NodeOutcome},
    node::{FilterTrace, TreeNode},
    providers::traits::StatsProvider,
    query, split_selector,
    stop_criteria::{self, StopDecision},
};
use crate::configuration::BuildOptions;

/// Counters collected over one build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub nodes_evaluated: u64,
    pub leaves: u64,
    pub branches: u64,
    pub pruned: u64,
    pub failed_branches: u64,
}

struct BuildShared<P: StatsProvider> {
    provider: Arc<P>,
    limiter: Semaphore,
    options: BuildOptions,
    cancel: CancelSignal,
    nodes_evaluated: AtomicU64,
    leaves: AtomicU64,
    branches: AtomicU64,
    pruned: AtomicU64,
    failed_branches: AtomicU64,
}

/// Grows a regression tree top-down. Every node is its own task; at most
/// `max_concurrency` of them query the provider at the same time.
pub struct TreeBuilder<P: StatsProvider> {
    shared: Arc<BuildShared<P>>,
}

impl<P: StatsProvider> TreeBuilder<P> {
    pub fn new(provider: Arc<P>, options: BuildOptions, cancel: CancelSignal) -> Self {
        let limiter = Semaphore::new(options.max_concurrency.max(1));

        Self {
            shared: Arc::new(BuildShared {
                provider,
                limiter,
                options,
                cancel,
                nodes_evaluated: AtomicU64::new(0),
                leaves: AtomicU64::new(0),
                branches: AtomicU64::new(0),
                pruned: AtomicU64::new(0),
                failed_branches: AtomicU64::new(0),
            }),
        }
    }

    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.shared.cancel
    }

    pub fn stats(&self) -> BuildStats {
        let shared = &self.shared;
        BuildStats {
            nodes_evaluated: shared.nodes_evaluated.load(Ordering::Acquire),
            leaves: shared.leaves.load(Ordering::Acquire),
            branches: shared.branches.load(Ordering::Acquire),
            pruned: shared.pruned.load(Ordering::Acquire),
            failed_branches: shared.failed_branches.load(Ordering::Acquire),
        }
    }

    /// Builds the tree rooted at `root`. Any failure at the root, and any
    /// fatal failure below it, fails the build.
    pub async fn build(&self, root: PartitionContext) -> Result<TreeNode> {
        let mut stopwatch = Stopwatch::start_new();

        info!(
            "Building tree on {} (target {}, {} columns, max concurrency {})",
            root.table_name,
            root.target,
            root.remaining_columns.len(),
            self.shared.options.max_concurrency
        );

        let outcome = evaluate_node(Arc::clone(&self.shared), root).await;
        stopwatch.stop();

        match outcome {
            NodeOutcome::Built(tree) => {
                let stats = self.stats();
                info!(
                    "Tree built in {:?}: {} nodes, {} leaves, {} pruned, {} failed branches, depth {}",
                    stopwatch.elapsed(),
                    stats.nodes_evaluated,
                    stats.leaves,
                    stats.pruned,
                    stats.failed_branches,
                    tree.depth()
                );
                Ok(tree)
            }
            NodeOutcome::Pruned => {
                error!("No rows matched the root partition");
                Err(TreeError::EmptyPartition)
            }
            NodeOutcome::Failed { error: e, .. } => {
                self.shared.cancel.cancel();
                error!("Tree build failed after {:?}: {}", stopwatch.elapsed(), e);
                Err(e)
            }
        }
    }
}

fn evaluate_node<P: StatsProvider>(
    shared: Arc<BuildShared<P>>,
    context: PartitionContext,
) -> BoxFuture<'static, NodeOutcome> {
    async move {
        shared.nodes_evaluated.fetch_add(1, Ordering::AcqRel);
        let depth = context.depth;
        let mut prediction = None;

        match expand(&shared, context, &mut prediction).await {
            Ok(Some(node)) => {
                if node.is_leaf() {
                    shared.leaves.fetch_add(1, Ordering::AcqRel);
                } else {
                    shared.branches.fetch_add(1, Ordering::AcqRel);
                }
                NodeOutcome::Built(node)
            }
            Ok(None) => {
                shared.pruned.fetch_add(1, Ordering::AcqRel);
                NodeOutcome::Pruned
            }
            Err(TreeError::Cancelled) => NodeOutcome::failed(TreeError::Cancelled),
            Err(e) if e.is_transient() => {
                shared.failed_branches.fetch_add(1, Ordering::AcqRel);
                NodeOutcome::Failed { error: e, prediction }
            }
            Err(e) => {
                error!("Fatal error at depth {}, cancelling build: {}", depth, e);
                shared.cancel.cancel();
                NodeOutcome::failed(e)
            }
        }
    }
    .boxed()
}

/// One node: stats, stop check, split selection, then fan-out. `None` means
/// the partition is empty. `known_prediction` is set once the node's own mean
/// is known, so a later failure can still predict it.
async fn expand<P: StatsProvider>(
    shared: &Arc<BuildShared<P>>,
    context: PartitionContext,
    known_prediction: &mut Option<f64>,
) -> Result<Option<TreeNode>> {
    let provider = &*shared.provider;
    let policy = &shared.options.query;
    let cancel = &shared.cancel;
    let parameters = Arc::clone(&context.parameters);

    let trace = if parameters.debug_messages {
        Some(FilterTrace::of(&context))
    } else {
        None
    };

    let (split_column, prediction, coefficient_text, values) = {
        // Held for this node's own queries only, never while waiting on children
        let _permit = query::acquire(&shared.limiter, cancel).await?;

        let table = &*context.table_name;
        let filter = &context.filter;
        let bindings = context.bindings.as_slice();
        let target = &*context.target;

        let stats = query::guarded(policy, cancel, "node_stats", move || {
            provider.node_stats(table, filter, bindings, target)
        })
        .await?;

        match stop_criteria::evaluate(&stats, context.depth, &context.remaining_columns, &parameters) {
            StopDecision::Prune => {
                debug!("Depth {}: no rows for {}", context.depth, context.filter);
                return Ok(None);
            }
            StopDecision::Leaf { prediction, reason } => {
                debug!(
                    "Depth {}: leaf {} ({}) for {}",
                    context.depth,
                    prediction,
                    reason.as_str(),
                    context.filter
                );
                return Ok(Some(TreeNode::leaf(prediction, reason, trace)));
            }
            StopDecision::Split { prediction, coefficient_text, .. } => {
                *known_prediction = Some(prediction);
                let prior_stddev = stop_criteria::validate_split_stage(&stats)?;
                let chosen =
                    split_selector::select_split(provider, &context, prior_stddev, policy, cancel).await?;

                let column = chosen.column.as_str();
                let values = query::guarded(policy, cancel, "distinct_values", move || {
                    provider.distinct_values(table, column)
                })
                .await?;

                (chosen.column, prediction, coefficient_text, values)
            }
        }
    };

    let width = shared.options.max_concurrency;
    let children = fanout::fan_out(&context, &split_column, values, prediction, width, cancel, |child| {
        evaluate_node(Arc::clone(shared), child)
    })
    .await?;

    if children.is_empty() {
        debug!("Depth {}: every child of {} was pruned", context.depth, split_column);
    }

    Ok(Some(TreeNode::Branch {
        split_column,
        coefficient_of_variation: Some(coefficient_text),
        children,
        trace,
    }))
}
