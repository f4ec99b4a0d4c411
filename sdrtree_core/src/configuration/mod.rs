use std::time::Duration;

use crate::{
    DEFAULT_DISTINCT_CACHE_SIZE, DEFAULT_MAX_CONCURRENCY, DEFAULT_MAX_RETRIES, DEFAULT_MAX_RETRY_BACKOFF,
    DEFAULT_QUERY_TIMEOUT, DEFAULT_RETRY_BACKOFF,
    core::{
        error::{Result, TreeError},
        parameters::TrainingParameters,
    },
};

/// Timeout and retry policy applied to every provider call.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for QueryPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_QUERY_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: DEFAULT_RETRY_BACKOFF,
            max_backoff: DEFAULT_MAX_RETRY_BACKOFF,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BuildOptions {
    pub max_concurrency: usize,
    pub query: QueryPolicy,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            query: QueryPolicy::default(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub data_path: String,
    pub table_name: Option<String>,
    pub target: String,
    pub columns: Vec<String>,
    pub parameters_path: Option<String>,
    pub debug_messages: Option<bool>,
    pub max_concurrency: Option<usize>,
    pub query_timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub distinct_cache_size: Option<u64>,
    pub ledger_dir: Option<String>,
    pub output_path: Option<String>,
}

impl Configuration {
    pub fn build_options(&self) -> Result<BuildOptions> {
        let mut options = BuildOptions::default();

        if let Some(max_concurrency) = self.max_concurrency {
            if max_concurrency == 0 {
                return Err(TreeError::Configuration(
                    "max concurrency must be at least 1".to_string(),
                ));
            }
            options.max_concurrency = max_concurrency;
        }

        if let Some(timeout_ms) = self.query_timeout_ms {
            if timeout_ms == 0 {
                return Err(TreeError::Configuration(
                    "query timeout must be at least 1ms".to_string(),
                ));
            }
            options.query.timeout = Duration::from_millis(timeout_ms);
        }

        if let Some(max_retries) = self.max_retries {
            options.query.max_retries = max_retries;
        }

        Ok(options)
    }

    pub fn distinct_cache_size(&self) -> u64 {
        self.distinct_cache_size.unwrap_or(DEFAULT_DISTINCT_CACHE_SIZE)
    }

    /// Name under which the dataset is registered, defaulting to the data
    /// file's stem.
    pub fn table_name(&self) -> String {
        if let Some(name) = &self.table_name {
            return name.clone();
        }

        std::path::Path::new(&self.data_path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("dataset")
            .to_string()
    }

    /// Defaults, overlaid by the parameters file, overlaid by the command line.
    pub async fn training_parameters(&self) -> Result<TrainingParameters> {
        let mut parameters = match &self.parameters_path {
            Some(path) => {
                let json = tokio::fs::read_to_string(path).await?;
                TrainingParameters::from_json_overrides(&json)?
            }
            None => TrainingParameters::default(),
        };

        if let Some(debug_messages) = self.debug_messages {
            parameters.debug_messages = debug_messages;
        }

        Ok(parameters)
    }
}
