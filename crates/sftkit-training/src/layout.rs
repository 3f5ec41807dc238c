use crate::error::TrainingResult;
use crate::job::TrainingJobId;
use std::path::{Path, PathBuf};

/// Staging area for the jobs of one output directory.
///
/// Layout is `<output_dir>/.sftkit/<job_id>/...`
#[derive(Debug, Clone)]
pub struct JobLayout {
    root: PathBuf,
}

impl JobLayout {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn for_output_dir(output_dir: &Path) -> Self {
        Self::new(output_dir.join(".sftkit"))
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn job_dir(&self, job_id: &TrainingJobId) -> PathBuf {
        self.root.join(job_id.0.as_str())
    }

    #[must_use]
    pub fn job_file_path(&self, job_id: &TrainingJobId) -> PathBuf {
        self.job_dir(job_id).join("job.json")
    }

    #[must_use]
    pub fn train_jsonl_path(&self, job_id: &TrainingJobId) -> PathBuf {
        self.job_dir(job_id).join("train.jsonl")
    }

    #[must_use]
    pub fn eval_jsonl_path(&self, job_id: &TrainingJobId) -> PathBuf {
        self.job_dir(job_id).join("eval.jsonl")
    }

    #[must_use]
    pub fn tokenizer_dir(&self, job_id: &TrainingJobId) -> PathBuf {
        self.job_dir(job_id).join("tokenizer")
    }

    /// Where the worker writes the trained model.
    #[must_use]
    pub fn final_dir(&self, job_id: &TrainingJobId) -> PathBuf {
        self.job_dir(job_id).join("final")
    }

    pub fn ensure_job_dirs(&self, job_id: &TrainingJobId) -> TrainingResult<()> {
        std::fs::create_dir_all(self.tokenizer_dir(job_id))?;
        std::fs::create_dir_all(self.final_dir(job_id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let temp = TempDir::new().unwrap();
        let layout = JobLayout::for_output_dir(temp.path());
        let id = TrainingJobId("job-1".to_string());

        assert_eq!(layout.root(), temp.path().join(".sftkit"));
        assert_eq!(layout.job_file_path(&id), temp.path().join(".sftkit/job-1/job.json"));
        assert_eq!(layout.final_dir(&id), temp.path().join(".sftkit/job-1/final"));

        layout.ensure_job_dirs(&id).unwrap();
        assert!(layout.tokenizer_dir(&id).is_dir());
        assert!(layout.final_dir(&id).is_dir());
    }
}
