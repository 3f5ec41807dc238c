use crate::dataset::DatasetId;
use crate::error::{TrainingError, TrainingResult};
use crate::job::TrainingJobId;
use crate::registry::ModelFamily;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "training_manifest.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Weights,
    Adapter,
    Tokenizer,
    Config,
    ModelCard,
    Other,
}

impl ArtifactKind {
    /// Classify a saved file by name.
    #[must_use]
    pub fn from_file_name(name: &str) -> Self {
        match name {
            "tokenizer.json" | "tokenizer_config.json" | "special_tokens_map.json" | "tokenizer.model"
            | "vocab.json" | "merges.txt" => Self::Tokenizer,
            "README.md" => Self::ModelCard,
            _ if name.starts_with("adapter_") => Self::Adapter,
            _ if name.ends_with(".safetensors") || name.ends_with(".bin") => Self::Weights,
            _ if name.ends_with(".json") => Self::Config,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingArtifact {
    pub kind: ArtifactKind,
    /// Relative to the output directory.
    pub path: PathBuf,
    pub size: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TrainingMetrics {
    pub train_loss: Option<f64>,
    pub eval_loss: Option<f64>,
    pub steps: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingManifest {
    pub job_id: TrainingJobId,
    pub created_at: DateTime<Utc>,
    pub base_model: String,
    pub family: ModelFamily,
    pub dataset_name: String,
    pub dataset_id: DatasetId,
    pub adapter: bool,
    #[serde(default)]
    pub metrics: TrainingMetrics,
    pub artifacts: Vec<TrainingArtifact>,
}

impl TrainingManifest {
    pub fn write(&self, dir: &Path) -> TrainingResult<PathBuf> {
        let path = dir.join(MANIFEST_FILE);
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }
}

pub fn sha256_file(path: &Path) -> TrainingResult<String> {
    Ok(sftkit_hub::sha256_hex(path)?)
}

/// Describe `root/rel` as an artifact.
pub fn make_artifact(root: &Path, rel: &Path) -> TrainingResult<TrainingArtifact> {
    let path = root.join(rel);
    if !path.is_file() {
        return Err(TrainingError::Artifact(format!("artifact path does not exist: {}", path.display())));
    }

    let name = rel.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    Ok(TrainingArtifact {
        kind: ArtifactKind::from_file_name(&name),
        path: rel.to_path_buf(),
        size: std::fs::metadata(&path)?.len(),
        sha256: sha256_file(&path)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_artifact_hash_and_kind() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("model.safetensors"), b"abc").unwrap();

        let artifact = make_artifact(temp.path(), Path::new("model.safetensors")).unwrap();
        assert_eq!(artifact.kind, ArtifactKind::Weights);
        assert_eq!(artifact.size, 3);
        assert_eq!(artifact.sha256, "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");

        assert!(make_artifact(temp.path(), Path::new("missing.bin")).is_err());
    }

    #[test]
    fn test_kind_from_file_name() {
        assert_eq!(ArtifactKind::from_file_name("tokenizer_config.json"), ArtifactKind::Tokenizer);
        assert_eq!(ArtifactKind::from_file_name("adapter_model.safetensors"), ArtifactKind::Adapter);
        assert_eq!(ArtifactKind::from_file_name("generation_config.json"), ArtifactKind::Config);
        assert_eq!(ArtifactKind::from_file_name("README.md"), ArtifactKind::ModelCard);
        assert_eq!(ArtifactKind::from_file_name("training_args.txt"), ArtifactKind::Other);
    }
}
