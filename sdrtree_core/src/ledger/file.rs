use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use log::{debug, info};
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;

use super::{RunId, RunLedger, RunRecord};
use crate::core::{
    error::{Result, TreeError},
    parameters::TrainingParameters,
};

/// Ledger persisted as one pretty-printed `run_<id>.json` per run. Reopening
/// a directory continues after the highest id found there.
pub struct FileRunLedger {
    directory: PathBuf,
    sequence: AtomicU64,
    write_lock: Mutex<()>,
}

impl FileRunLedger {
    pub async fn open(directory: impl AsRef<Path>) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&directory).await?;

        let mut highest = 0;
        let mut entries = tokio::fs::read_dir(&directory).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(run_id) = parse_run_id(&entry.file_name().to_string_lossy()) {
                highest = highest.max(run_id);
            }
        }

        info!(
            "Opened run ledger at {} (next run {})",
            directory.display(),
            highest + 1
        );

        Ok(Self {
            directory,
            sequence: AtomicU64::new(highest),
            write_lock: Mutex::new(()),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_of(&self, run_id: RunId) -> PathBuf {
        self.directory.join(format!("run_{}.json", run_id))
    }

    async fn load(&self, run_id: RunId) -> Result<Option<RunRecord>> {
        match tokio::fs::read_to_string(self.path_of(run_id)).await {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, record: &RunRecord) -> Result<()> {
        let json = serde_json::to_string_pretty(record)?;
        tokio::fs::write(self.path_of(record.run_id), json).await?;
        debug!("Stored run {} ({:?})", record.run_id, record.status);
        Ok(())
    }

    async fn update(&self, run_id: RunId, apply: impl FnOnce(&mut RunRecord) + Send) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut record = self
            .load(run_id)
            .await?
            .ok_or_else(|| TreeError::Ledger(format!("unknown run {}", run_id)))?;

        apply(&mut record);
        self.store(&record).await
    }
}

fn parse_run_id(file_name: &str) -> Option<RunId> {
    file_name
        .strip_prefix("run_")?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

impl RunLedger for FileRunLedger {
    async fn create_run(&self) -> Result<RunId> {
        let run_id = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;

        let _guard = self.write_lock.lock().await;
        self.store(&RunRecord::started(run_id)).await?;
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
        .await
    }

    async fn finalize_run(&self, run_id: RunId, model: &JsonValue) -> Result<()> {
        self.update(run_id, |record| record.succeed(model)).await
    }

    async fn fail_run(&self, run_id: RunId, diagnostic: &str) -> Result<()> {
        self.update(run_id, |record| record.fail(diagnostic)).await
    }

    async fn run(&self, run_id: RunId) -> Result<Option<RunRecord>> {
        self.load(run_id).await
    }
}
