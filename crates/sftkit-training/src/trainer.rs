use crate::artifacts::{TrainingManifest, TrainingMetrics};
use crate::error::TrainingResult;
use crate::job::TrainingJobSpec;
use crate::progress::ProgressSink;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Result of a completed training run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainOutcome {
    /// Directory holding the trained weights and config.
    pub final_dir: PathBuf,
    pub metrics: TrainingMetrics,
}

/// A training backend. The backend owns the optimization loop; callers only
/// hand it a fully prepared job and wait for completion.
#[async_trait]
pub trait Trainer: Send + Sync {
    fn id(&self) -> &'static str;

    /// Run training to completion.
    async fn train(&self, job: &TrainingJobSpec, progress: &dyn ProgressSink) -> TrainingResult<TrainOutcome>;

    /// Persist the trained model, tokenizer, model card and manifest into `output_dir`.
    async fn save_model(
        &self,
        job: &TrainingJobSpec,
        outcome: &TrainOutcome,
        output_dir: &Path,
    ) -> TrainingResult<TrainingManifest>;

    /// Publish `output_dir` to the hub, tagging the model card with
    /// `dataset_name`. Returns the repository URL.
    async fn push_to_hub(&self, job: &TrainingJobSpec, output_dir: &Path, dataset_name: &str) -> TrainingResult<String>;
}
