use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TreeError {
    /// A provider contract was violated while building (zero count or zero
    /// stddev reaching the split stage, unusable reduction ranking).
    #[error("Validation failure: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Query '{query}' failed: {message}")]
    QueryFailed { query: &'static str, message: String },

    #[error("Query '{query}' timed out after {timeout:?}")]
    QueryTimeout { query: &'static str, timeout: Duration },

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Build cancelled")]
    Cancelled,

    #[error("Node evaluation task failed: {0}")]
    TaskFailed(String),

    #[error("No rows matched the root partition")]
    EmptyPartition,

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TreeError {
    /// Errors worth retrying. Anything else aborts the whole build.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TreeError::QueryFailed { .. } | TreeError::QueryTimeout { .. }
        )
    }

    pub fn is_fatal(&self) -> bool {
        !self.is_transient()
    }
}

pub type Result<T> = std::result::Result<T, TreeError>;
