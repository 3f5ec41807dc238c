//! The SFT run: arguments in, saved (and optionally published) model out.

use crate::args::SftArguments;
use crate::artifacts::TrainingManifest;
use crate::dataset::{compute_dataset_id, load_split, write_text_jsonl};
use crate::error::{TrainingError, TrainingResult};
use crate::formatting::format_rows;
use crate::job::{TrainingJobId, TrainingJobSpec};
use crate::layout::JobLayout;
use crate::model::acquire_model;
use crate::peft::LoraConfig;
use crate::progress::ProgressSink;
use crate::registry::ArchitectureRegistry;
use crate::tokenizer::acquire_tokenizer;
use crate::trainer::Trainer;
use chrono::Utc;
use sftkit_hub::HubClient;
use std::path::Path;
use tracing::info;

/// Outcome of a full run.
#[derive(Debug, Clone)]
pub struct SftRun {
    pub job: TrainingJobSpec,
    pub manifest: TrainingManifest,
    /// Set when the model was pushed.
    pub hub_url: Option<String>,
}

async fn format_split(
    args: &SftArguments,
    split: &str,
    hub: &HubClient,
    path: &Path,
) -> TrainingResult<Vec<String>> {
    let raw = load_split(&args.dataset, split, hub).await?;
    let texts = format_rows(&raw.rows, args.dataset.chosen_layout)?;
    if texts.is_empty() {
        return Err(TrainingError::Dataset(format!("split '{split}' produced no formatted examples")));
    }
    write_text_jsonl(path, &args.training.dataset_text_field, &texts)?;
    info!(split, rows = raw.rows.len(), examples = texts.len(), "formatted dataset split");
    Ok(texts)
}

/// Resolve the model, tokenizer and datasets and stage them as a job
/// directory under `output_dir`.
pub async fn prepare_job(
    args: &SftArguments,
    hub: &HubClient,
    registry: &ArchitectureRegistry,
) -> TrainingResult<TrainingJobSpec> {
    args.validate()?;

    let job_id = TrainingJobId::new();
    let layout = JobLayout::for_output_dir(&args.training.output_dir);
    layout.ensure_job_dirs(&job_id)?;

    let model = acquire_model(&args.model, hub, registry).await?;
    let tokenizer = acquire_tokenizer(&args.model, hub).await?;
    let tokenizer_dir = layout.tokenizer_dir(&job_id);
    tokenizer.save(&tokenizer_dir)?;

    let train_path = layout.train_jsonl_path(&job_id);
    let train_texts = format_split(args, &args.dataset.dataset_train_split, hub, &train_path).await?;

    let (eval_dataset, eval_examples) = if args.training.eval_enabled() {
        let eval_path = layout.eval_jsonl_path(&job_id);
        let eval_texts = format_split(args, &args.dataset.dataset_test_split, hub, &eval_path).await?;
        (Some(eval_path), Some(eval_texts.len()))
    } else {
        (None, None)
    };

    let job = TrainingJobSpec {
        job_id,
        created_at: Utc::now(),
        model,
        tokenizer_dir,
        train_dataset: train_path,
        train_examples: train_texts.len(),
        eval_dataset,
        eval_examples,
        dataset_id: compute_dataset_id(&train_texts),
        training: args.training.clone(),
        peft: LoraConfig::from_spec(&args.model),
        model_spec: args.model.clone(),
        dataset_spec: args.dataset.clone(),
    };
    job.validate()?;
    job.write(&layout.job_file_path(&job.job_id))?;

    info!(job = %job.job_id, dir = %layout.job_dir(&job.job_id).display(), "staged training job");
    Ok(job)
}

/// Prepare, train, save, and push when `push_to_hub` is set.
pub async fn run_sft(
    args: &SftArguments,
    hub: &HubClient,
    registry: &ArchitectureRegistry,
    trainer: &dyn Trainer,
    progress: &dyn ProgressSink,
) -> TrainingResult<SftRun> {
    let job = prepare_job(args, hub, registry).await?;

    info!(job = %job.job_id, trainer = trainer.id(), "starting training");
    let outcome = trainer.train(&job, progress).await?;

    let output_dir = &args.training.output_dir;
    let manifest = trainer.save_model(&job, &outcome, output_dir).await?;

    let hub_url = if args.training.push_to_hub {
        Some(trainer.push_to_hub(&job, output_dir, &args.dataset.dataset_name).await?)
    } else {
        None
    };

    Ok(SftRun { job, manifest, hub_url })
}
