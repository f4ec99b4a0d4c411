use std::{
    future::Future,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::core::{error::Result, parameters::TrainingParameters};

pub mod file;
pub mod memory;

pub type RunId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

/// Everything recorded about one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub table_name: Option<String>,
    pub algorithm: Option<String>,
    pub training_parameters: Option<TrainingParameters>,
    pub start_time_ms: u64,
    pub end_time_ms: Option<u64>,
    pub status: RunStatus,
    pub model: Option<JsonValue>,
    pub failure: Option<String>,
}

impl RunRecord {
    pub fn started(run_id: RunId) -> Self {
        Self {
            run_id,
            table_name: None,
            algorithm: None,
            training_parameters: None,
            start_time_ms: now_ms(),
            end_time_ms: None,
            status: RunStatus::Running,
            model: None,
            failure: None,
        }
    }

    pub(crate) fn succeed(&mut self, model: &JsonValue) {
        self.model = Some(model.clone());
        self.status = RunStatus::Succeeded;
        self.end_time_ms = Some(now_ms());
    }

    pub(crate) fn fail(&mut self, diagnostic: &str) {
        self.failure = Some(diagnostic.to_string());
        self.status = RunStatus::Failed;
        self.end_time_ms = Some(now_ms());
    }
}

/// Bookkeeping store for training runs: one record per run, created before
/// the build and closed once it succeeds or fails.
pub trait RunLedger: Send + Sync {
    fn create_run(&self) -> impl Future<Output = Result<RunId>> + Send;

    fn record_training_parameters(
        &self,
        run_id: RunId,
        table_name: &str,
        algorithm: &str,
        parameters: &TrainingParameters,
    ) -> impl Future<Output = Result<()>> + Send;

    fn finalize_run(&self, run_id: RunId, model: &JsonValue) -> impl Future<Output = Result<()>> + Send;

    fn fail_run(&self, run_id: RunId, diagnostic: &str) -> impl Future<Output = Result<()>> + Send;

    fn run(&self, run_id: RunId) -> impl Future<Output = Result<Option<RunRecord>>> + Send;
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
