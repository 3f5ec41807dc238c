//! Saving a finished run into its output directory and publishing it.

use crate::args::TrainingConfig;
use crate::artifacts::{ArtifactKind, MANIFEST_FILE, TrainingManifest, TrainingMetrics, make_artifact};
use crate::card::ModelCard;
use crate::error::{TrainingError, TrainingResult};
use crate::job::TrainingJobSpec;
use chrono::Utc;
use sftkit_hub::HubClient;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

/// Regular files under `dir` as relative paths, hidden entries skipped.
fn visible_files(dir: &Path) -> TrainingResult<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name().into_iter().filter_entry(|e| !is_hidden(e)) {
        let entry = entry.map_err(|e| TrainingError::Artifact(e.to_string()))?;
        if entry.file_type().is_file() {
            let rel = entry.path().strip_prefix(dir).map_err(|e| TrainingError::Artifact(e.to_string()))?;
            out.push(rel.to_path_buf());
        }
    }
    Ok(out)
}

fn copy_tree(from: &Path, to: &Path) -> TrainingResult<usize> {
    let files = visible_files(from)?;
    for rel in &files {
        let dest = to.join(rel);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(from.join(rel), &dest)?;
    }
    Ok(files.len())
}

/// Hash every file in `output_dir` and write the manifest next to them.
pub fn write_manifest(
    job: &TrainingJobSpec,
    output_dir: &Path,
    dataset_name: &str,
    metrics: &TrainingMetrics,
) -> TrainingResult<TrainingManifest> {
    let artifacts = visible_files(output_dir)?
        .into_iter()
        .filter(|rel| rel.as_path() != Path::new(MANIFEST_FILE))
        .map(|rel| make_artifact(output_dir, &rel))
        .collect::<TrainingResult<Vec<_>>>()?;

    let manifest = TrainingManifest {
        job_id: job.job_id.clone(),
        created_at: Utc::now(),
        base_model: job.model.name_or_path.clone(),
        family: job.model.family,
        dataset_name: dataset_name.to_string(),
        dataset_id: job.dataset_id.clone(),
        adapter: job.peft.is_some(),
        metrics: metrics.clone(),
        artifacts,
    };
    manifest.write(output_dir)?;
    Ok(manifest)
}

/// Copy the trained model and the prepared tokenizer into `output_dir`, then
/// write the model card and manifest.
pub fn save_outputs(
    job: &TrainingJobSpec,
    final_dir: &Path,
    output_dir: &Path,
    metrics: &TrainingMetrics,
) -> TrainingResult<TrainingManifest> {
    if !final_dir.is_dir() {
        return Err(TrainingError::Artifact(format!("trained model directory {} is missing", final_dir.display())));
    }
    let has_model = visible_files(final_dir)?.iter().any(|rel| {
        rel.file_name()
            .map(|name| ArtifactKind::from_file_name(&name.to_string_lossy()))
            .is_some_and(|kind| matches!(kind, ArtifactKind::Weights | ArtifactKind::Adapter))
    });
    if !has_model {
        return Err(TrainingError::Artifact(format!("trainer produced no weights in {}", final_dir.display())));
    }
    std::fs::create_dir_all(output_dir)?;

    let copied = copy_tree(final_dir, output_dir)?;
    let tokenizer_files = copy_tree(&job.tokenizer_dir, output_dir)?;
    debug!(copied, tokenizer_files, output_dir = %output_dir.display(), "copied model files");

    let dataset_name = &job.dataset_spec.dataset_name;
    ModelCard::for_job(job, dataset_name, metrics).write(output_dir)?;
    let manifest = write_manifest(job, output_dir, dataset_name, metrics)?;

    info!(
        output_dir = %output_dir.display(),
        artifacts = manifest.artifacts.len(),
        "saved model"
    );
    Ok(manifest)
}

/// Target repository: `hub_model_id`, else the output directory's name, put
/// under the token owner's namespace when no namespace is given.
pub async fn resolve_repo_id(hub: &HubClient, training: &TrainingConfig) -> TrainingResult<String> {
    let name = match &training.hub_model_id {
        Some(id) => id.clone(),
        None => training
            .output_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                TrainingError::InvalidSpec(format!(
                    "cannot derive a repository name from {}; set hub_model_id",
                    training.output_dir.display()
                ))
            })?,
    };

    if name.contains('/') {
        return Ok(name);
    }
    let user = hub.whoami().await?;
    Ok(format!("{user}/{name}"))
}

/// Publish `output_dir`, re-tagging the model card with `dataset_name`.
pub async fn push_output_dir(
    hub: &HubClient,
    job: &TrainingJobSpec,
    output_dir: &Path,
    dataset_name: &str,
) -> TrainingResult<String> {
    let manifest_path = output_dir.join(MANIFEST_FILE);
    let metrics = if manifest_path.is_file() {
        let manifest: TrainingManifest = serde_json::from_slice(&std::fs::read(&manifest_path)?)?;
        manifest.metrics
    } else {
        TrainingMetrics::default()
    };

    ModelCard::for_job(job, dataset_name, &metrics).write(output_dir)?;
    write_manifest(job, output_dir, dataset_name, &metrics)?;

    let repo_id = resolve_repo_id(hub, &job.training).await?;
    let url = hub.create_repo(&repo_id, job.training.hub_private_repo).await?;
    let commit = hub.upload_folder(&repo_id, output_dir, "End of training").await?;
    info!(repo_id, commit, "pushed model to hub");
    Ok(url)
}
