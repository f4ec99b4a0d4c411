use std::{sync::Arc, time::Duration};

use log::{error, info, warn};
use serde_json::Value as JsonValue;
use stopwatch::Stopwatch;

use super::{
    builder::{BuildStats, TreeBuilder},
    cancel::CancelSignal,
    context::PartitionContext,
    error::Result,
    node::TreeNode,
    parameters::TrainingParameters,
    providers::traits::StatsProvider,
};
use crate::{
    ALGORITHM_NAME,
    configuration::BuildOptions,
    ledger::{RunId, RunLedger},
};

#[derive(Debug, Clone)]
pub struct TrainingRequest {
    pub table_name: String,
    pub target: String,
    pub columns: Vec<String>,
    pub parameters: TrainingParameters,
}

#[derive(Debug)]
pub struct TrainingOutcome {
    pub run_id: RunId,
    pub tree: TreeNode,
    pub model_json: JsonValue,
    pub stats: BuildStats,
    pub elapsed: Duration,
}

/// One complete training run: opens a ledger record, builds the tree and
/// closes the record with the model or with the failure.
pub async fn train<P, L>(
    provider: Arc<P>,
    ledger: &L,
    request: TrainingRequest,
    options: BuildOptions,
    cancel: CancelSignal,
) -> Result<TrainingOutcome>
where
    P: StatsProvider,
    L: RunLedger,
{
    let mut stopwatch = Stopwatch::start_new();

    let run_id = ledger.create_run().await?;
    info!("Starting run {} on {}", run_id, request.table_name);

    let result = build_and_record(run_id, provider, ledger, request, options, cancel).await;
    stopwatch.stop();

    match result {
        Ok((tree, model_json, stats)) => {
            info!("Run {} finished in {:?}", run_id, stopwatch.elapsed());
            Ok(TrainingOutcome {
                run_id,
                tree,
                model_json,
                stats,
                elapsed: stopwatch.elapsed(),
            })
        }
        Err(e) => {
            error!("Run {} failed: {}", run_id, e);
            if let Err(ledger_error) = ledger.fail_run(run_id, &e.to_string()).await {
                warn!("Could not mark run {} as failed: {}", run_id, ledger_error);
            }
            Err(e)
        }
    }
}

async fn build_and_record<P, L>(
    run_id: RunId,
    provider: Arc<P>,
    ledger: &L,
    request: TrainingRequest,
    options: BuildOptions,
    cancel: CancelSignal,
) -> Result<(TreeNode, JsonValue, BuildStats)>
where
    P: StatsProvider,
    L: RunLedger,
{
    ledger
        .record_training_parameters(run_id, &request.table_name, ALGORITHM_NAME, &request.parameters)
        .await?;

    let debug = request.parameters.debug_messages;
    let root = PartitionContext::root(
        &request.table_name,
        &request.target,
        &request.columns,
        request.parameters,
    )?;

    let builder = TreeBuilder::new(provider, options, cancel);
    let tree = builder.build(root).await?;
    let model_json = tree.to_json(debug);

    ledger.finalize_run(run_id, &model_json).await?;

    Ok((tree, model_json, builder.stats()))
}
