use crate::args::{DatasetSpec, ModelSpec, TrainingConfig};
use crate::dataset::DatasetId;
use crate::error::{TrainingError, TrainingResult};
use crate::model::LoadedModel;
use crate::peft::LoraConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Identifier for a training job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrainingJobId(pub String);

impl TrainingJobId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for TrainingJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TrainingJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Everything a trainer backend needs for one run. Serialized as the job file
/// handed to the training worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingJobSpec {
    pub job_id: TrainingJobId,
    pub created_at: DateTime<Utc>,
    pub model: LoadedModel,
    /// Directory holding the prepared tokenizer files.
    pub tokenizer_dir: PathBuf,
    /// Formatted train split (JSON lines, one `dataset_text_field` per row).
    pub train_dataset: PathBuf,
    pub train_examples: usize,
    pub eval_dataset: Option<PathBuf>,
    pub eval_examples: Option<usize>,
    pub dataset_id: DatasetId,
    pub training: TrainingConfig,
    pub peft: Option<LoraConfig>,
    pub model_spec: ModelSpec,
    pub dataset_spec: DatasetSpec,
}

impl TrainingJobSpec {
    pub fn validate(&self) -> TrainingResult<()> {
        self.training.validate()?;
        if self.train_examples == 0 {
            return Err(TrainingError::InvalidSpec("train dataset has no formatted examples".to_string()));
        }
        if self.training.eval_enabled() && self.eval_dataset.is_none() {
            return Err(TrainingError::InvalidSpec(format!(
                "eval_strategy is {:?} but no eval dataset was prepared",
                self.training.eval_strategy
            )));
        }
        if self.model.weight_files.is_empty() {
            return Err(TrainingError::InvalidSpec("model has no weight files".to_string()));
        }
        Ok(())
    }

    pub fn write(&self, path: &Path) -> TrainingResult<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn read(path: &Path) -> TrainingResult<Self> {
        Ok(serde_json::from_slice(&std::fs::read(path)?)?)
    }
}
