use std::{io, sync::Arc};

use clap::Parser;
use log::{LevelFilter, info, warn};
use tokio::runtime::Builder;

use sdrtree_core::{
    configuration::{BuildOptions, Configuration},
    core::{
        cancel::CancelSignal,
        error::TreeError,
        providers::{
            cached::CachedStatsProvider,
            memory::{MemoryStatsProvider, MemoryTable},
        },
        trainer::{self, TrainingRequest},
    },
    ledger::{RunLedger, file::FileRunLedger, memory::MemoryRunLedger},
};

#[derive(Parser, Debug)]
#[command(name = "sdrtree_core", version, about = "Regression tree builder (standard deviation reduction)")]
struct Args {
    /// JSON file holding an array of row objects
    #[arg(long, value_name = "PATH")]
    data: String,

    /// Name the dataset is registered under (default: data file stem)
    #[arg(long, value_name = "NAME")]
    table: Option<String>,

    /// Numeric column to predict
    #[arg(long, value_name = "COLUMN")]
    target: String,

    /// Comma separated split columns, in declared order
    #[arg(long, value_delimiter = ',', value_name = "COLUMNS")]
    columns: Vec<String>,

    /// JSON file with training parameter overrides
    #[arg(long, value_name = "PATH")]
    params: Option<String>,

    /// Emit debug fields in the model (default: from params, else false)
    #[arg(long = "debug-messages", alias = "debug_messages", value_name = "BOOL")]
    debug_messages: Option<bool>,

    /// Node evaluations allowed to query at once (default: 16)
    #[arg(long = "max-concurrency", alias = "max_concurrency", value_name = "N")]
    max_concurrency: Option<usize>,

    /// Per query timeout in milliseconds (default: 30000)
    #[arg(long = "query-timeout-ms", alias = "query_timeout_ms", value_name = "MS")]
    query_timeout_ms: Option<u64>,

    /// Retries for a failed or timed out query (default: 3)
    #[arg(long = "max-retries", alias = "max_retries", value_name = "N")]
    max_retries: Option<u32>,

    /// Cached distinct value lists (default: 1024)
    #[arg(long = "distinct-cache-size", alias = "distinct_cache_size", value_name = "N")]
    distinct_cache_size: Option<u64>,

    /// Directory for run records (default: kept in memory)
    #[arg(long = "ledger-dir", alias = "ledger_dir", value_name = "PATH")]
    ledger_dir: Option<String>,

    /// Where to write the model JSON (default: stdout)
    #[arg(long, value_name = "PATH")]
    output: Option<String>,

    /// Logging level off, error, warn, info, debug, trace (default: info)
    #[arg(long = "log-level", alias = "log_level", value_name = "LEVEL")]
    log_level: Option<LevelFilter>,
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    let level = args.log_level.unwrap_or(LevelFilter::Info);

    let config = Configuration {
        data_path: args.data,
        table_name: args.table,
        target: args.target,
        columns: args.columns,
        parameters_path: args.params,
        debug_messages: args.debug_messages,
        max_concurrency: args.max_concurrency,
        query_timeout_ms: args.query_timeout_ms,
        max_retries: args.max_retries,
        distinct_cache_size: args.distinct_cache_size,
        ledger_dir: args.ledger_dir,
        output_path: args.output,
    };

    let rt = Builder::new_multi_thread().enable_all().build()?;

    rt.block_on(async {
        env_logger::Builder::new().filter_level(level).init();

        run(config).await.map_err(io::Error::other)
    })
}

async fn run(config: Configuration) -> Result<(), TreeError> {
    let options = config.build_options()?;
    let parameters = config.training_parameters().await?;
    let table_name = config.table_name();

    let json = tokio::fs::read_to_string(&config.data_path).await?;
    let table = MemoryTable::from_json_str(&table_name, &json)?;
    info!(
        "Loaded {} rows with {} columns from {}",
        table.len(),
        table.columns().len(),
        config.data_path
    );

    let memory = MemoryStatsProvider::new();
    memory.register_table(table);
    let provider = Arc::new(CachedStatsProvider::new(memory, config.distinct_cache_size()));

    let cancel = CancelSignal::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling build");
            on_interrupt.cancel();
        }
    });

    let request = TrainingRequest {
        table_name,
        target: config.target.clone(),
        columns: config.columns.clone(),
        parameters,
    };

    let model = match &config.ledger_dir {
        Some(directory) => {
            let ledger = FileRunLedger::open(directory).await?;
            train_with(provider, &ledger, request, options, cancel).await?
        }
        None => {
            let ledger = MemoryRunLedger::new();
            train_with(provider, &ledger, request, options, cancel).await?
        }
    };

    let rendered = serde_json::to_string_pretty(&model)?;
    match &config.output_path {
        Some(path) => {
            tokio::fs::write(path, rendered).await?;
            info!("Model written to {}", path);
        }
        None => println!("{}", rendered),
    }

    Ok(())
}

async fn train_with<L: RunLedger>(
    provider: Arc<CachedStatsProvider<MemoryStatsProvider>>,
    ledger: &L,
    request: TrainingRequest,
    options: BuildOptions,
    cancel: CancelSignal,
) -> Result<serde_json::Value, TreeError> {
    let outcome = trainer::train(provider, ledger, request, options, cancel).await?;

    info!(
        "Run {} produced {} leaves (depth {}) in {:?}",
        outcome.run_id,
        outcome.tree.leaf_count(),
        outcome.tree.depth(),
        outcome.elapsed
    );

    Ok(outcome.model_json)
}
