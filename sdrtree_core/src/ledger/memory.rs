use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde_json::Value as JsonValue;

use super::{RunId, RunLedger, RunRecord};
use crate::core::{
    error::{Result, TreeError},
    parameters::TrainingParameters,
};

/// Ledger kept in process memory. Run ids start at 1.
#[derive(Default)]
pub struct MemoryRunLedger {
    runs: DashMap<RunId, RunRecord>,
    sequence: AtomicU64,
}

impl MemoryRunLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    fn update(&self, run_id: RunId, apply: impl FnOnce(&mut RunRecord)) -> Result<()> {
        match self.runs.get_mut(&run_id) {
            Some(mut record) => {
                apply(record.value_mut());
                Ok(())
            }
            None => Err(TreeError::Ledger(format!("unknown run {}", run_id))),
        }
    }
}

impl RunLedger for MemoryRunLedger {
    async fn create_run(&self) -> Result<RunId> {
        let run_id = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        self.runs.insert(run_id, RunRecord::started(run_id));
        Ok(run_id)
    }

    async fn record_training_parameters(
        &self,
        run_id: RunId,
        table_name: &str,
        algorithm: &str,
        parameters: &TrainingParameters,
    ) -> Result<()> {
        self.update(run_id, |record| {
            record.table_name = Some(table_name.to_string());
            record.algorithm = Some(algorithm.to_string());
            record.training_parameters = Some(parameters.clone());
        })
    }

    async fn finalize_run(&self, run_id: RunId, model: &JsonValue) -> Result<()> {
        self.update(run_id, |record| record.succeed(model))
    }

    async fn fail_run(&self, run_id: RunId, diagnostic: &str) -> Result<()> {
        self.update(run_id, |record| record.fail(diagnostic))
    }

    async fn run(&self, run_id: RunId) -> Result<Option<RunRecord>> {
        Ok(self.runs.get(&run_id).map(|r| r.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::RunStatus;

    #[tokio::test]
    async fn test_run_lifecycle() {
        let ledger = MemoryRunLedger::new();

        let first = ledger.create_run().await.unwrap();
        let second = ledger.create_run().await.unwrap();
        assert_eq!((first, second), (1, 2));

        ledger
            .record_training_parameters(first, "bikes", "decision_tree", &TrainingParameters::default())
            .await
            .unwrap();
        ledger.finalize_run(first, &serde_json::json!({ "prediction": 1.5 })).await.unwrap();
        ledger.fail_run(second, "Build cancelled").await.unwrap();

        let succeeded = ledger.run(first).await.unwrap().unwrap();
        assert_eq!(succeeded.status, RunStatus::Succeeded);
        assert_eq!(succeeded.table_name.as_deref(), Some("bikes"));
        assert_eq!(succeeded.model, Some(serde_json::json!({ "prediction": 1.5 })));
        assert!(succeeded.end_time_ms.unwrap() >= succeeded.start_time_ms);

        let failed = ledger.run(second).await.unwrap().unwrap();
        assert_eq!(failed.status, RunStatus::Failed);
        assert_eq!(failed.failure.as_deref(), Some("Build cancelled"));
        assert!(failed.model.is_none());
    }

    #[tokio::test]
    async fn test_unknown_run() {
        let ledger = MemoryRunLedger::new();
        assert!(matches!(
            ledger.fail_run(7, "nope").await,
            Err(TreeError::Ledger(_))
        ));
        assert!(ledger.run(7).await.unwrap().is_none());
        assert!(ledger.is_empty());
    }
}
