//! `sftkit sft` command implementation.

use crate::config;
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use serde_json::{Map, Value};
use sftkit_hub::HubClient;
use sftkit_training::{ArchitectureRegistry, ProcessTrainer, TracingProgressSink, prepare_job, run_sft};
use std::path::PathBuf;

/// Flags mirroring the argument records. Unset flags leave lower layers alone.
#[derive(Args, Debug, Default, Serialize)]
pub struct ArgOverrides {
    // Dataset
    /// Hub dataset id or local .jsonl/.json/.parquet file or directory
    #[arg(long, help_heading = "Dataset")]
    dataset_name: Option<String>,
    /// Dataset subset name
    #[arg(long, help_heading = "Dataset")]
    dataset_config: Option<String>,
    #[arg(long, help_heading = "Dataset")]
    dataset_train_split: Option<String>,
    #[arg(long, help_heading = "Dataset")]
    dataset_test_split: Option<String>,
    /// Shape of the `chosen` column (auto, flat_pair, pair_sequence)
    #[arg(long, help_heading = "Dataset")]
    chosen_layout: Option<String>,

    // Training
    #[arg(long, help_heading = "Training")]
    output_dir: Option<PathBuf>,
    #[arg(long, help_heading = "Training")]
    learning_rate: Option<f64>,
    #[arg(long, help_heading = "Training")]
    num_train_epochs: Option<f64>,
    #[arg(long, help_heading = "Training")]
    max_steps: Option<u64>,
    #[arg(long, help_heading = "Training")]
    per_device_train_batch_size: Option<u32>,
    #[arg(long, help_heading = "Training")]
    per_device_eval_batch_size: Option<u32>,
    #[arg(long, help_heading = "Training")]
    gradient_accumulation_steps: Option<u32>,
    #[arg(long, help_heading = "Training", num_args = 0..=1, default_missing_value = "true")]
    gradient_checkpointing: Option<bool>,
    #[arg(long, help_heading = "Training")]
    logging_steps: Option<u64>,
    /// no, steps or epoch
    #[arg(long, help_heading = "Training")]
    eval_strategy: Option<String>,
    #[arg(long, help_heading = "Training")]
    eval_steps: Option<u64>,
    /// no, steps or epoch
    #[arg(long, help_heading = "Training")]
    save_strategy: Option<String>,
    #[arg(long, help_heading = "Training")]
    save_steps: Option<u64>,
    #[arg(long, help_heading = "Training")]
    save_total_limit: Option<u32>,
    #[arg(long, help_heading = "Training")]
    seed: Option<u64>,
    #[arg(long, help_heading = "Training")]
    warmup_ratio: Option<f64>,
    #[arg(long, help_heading = "Training")]
    weight_decay: Option<f64>,
    #[arg(long, help_heading = "Training")]
    lr_scheduler_type: Option<String>,
    #[arg(long, help_heading = "Training")]
    max_seq_length: Option<u32>,
    #[arg(long, help_heading = "Training", num_args = 0..=1, default_missing_value = "true")]
    packing: Option<bool>,
    #[arg(long, help_heading = "Training")]
    dataset_text_field: Option<String>,
    #[arg(long, help_heading = "Training", num_args = 0..=1, default_missing_value = "true")]
    bf16: Option<bool>,
    #[arg(long, help_heading = "Training", num_args = 0..=1, default_missing_value = "true")]
    push_to_hub: Option<bool>,
    #[arg(long, help_heading = "Training")]
    hub_model_id: Option<String>,
    #[arg(long, help_heading = "Training", num_args = 0..=1, default_missing_value = "true")]
    hub_private_repo: Option<bool>,
    /// Training worker program and leading arguments
    #[arg(long, help_heading = "Training")]
    trainer_command: Option<String>,

    // Model
    /// Hub model id or local model directory
    #[arg(long, help_heading = "Model")]
    model_name_or_path: Option<String>,
    #[arg(long, help_heading = "Model")]
    model_revision: Option<String>,
    /// auto, bfloat16, float16 or float32
    #[arg(long, help_heading = "Model")]
    torch_dtype: Option<String>,
    #[arg(long, help_heading = "Model")]
    attn_implementation: Option<String>,
    #[arg(long, help_heading = "Model", num_args = 0..=1, default_missing_value = "true")]
    trust_remote_code: Option<bool>,
    #[arg(long, help_heading = "Model", num_args = 0..=1, default_missing_value = "true")]
    use_peft: Option<bool>,
    #[arg(long, help_heading = "Model")]
    lora_r: Option<u32>,
    #[arg(long, help_heading = "Model")]
    lora_alpha: Option<u32>,
    #[arg(long, help_heading = "Model")]
    lora_dropout: Option<f64>,
    #[arg(long, help_heading = "Model", value_delimiter = ',')]
    lora_target_modules: Option<Vec<String>>,
    #[arg(long, help_heading = "Model", value_delimiter = ',')]
    lora_modules_to_save: Option<Vec<String>>,
    #[arg(long, help_heading = "Model")]
    lora_task_type: Option<String>,
    #[arg(long, help_heading = "Model", num_args = 0..=1, default_missing_value = "true")]
    use_rslora: Option<bool>,
    #[arg(long, help_heading = "Model", num_args = 0..=1, default_missing_value = "true")]
    load_in_8bit: Option<bool>,
    #[arg(long, help_heading = "Model", num_args = 0..=1, default_missing_value = "true")]
    load_in_4bit: Option<bool>,
    /// nf4 or fp4
    #[arg(long, help_heading = "Model")]
    bnb_4bit_quant_type: Option<String>,
    #[arg(long, help_heading = "Model", num_args = 0..=1, default_missing_value = "true")]
    use_bnb_nested_quant: Option<bool>,
}

impl ArgOverrides {
    /// The flags that were given, keyed by field name.
    pub fn to_map(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(mut map) => {
                map.retain(|_, v| !v.is_null());
                Ok(map)
            }
            _ => Ok(Map::new()),
        }
    }
}

#[derive(Args, Debug)]
pub struct SftCommand {
    /// Config file (YAML, TOML or JSON) with argument values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Resolve and stage everything, print the job file, skip training
    #[arg(long)]
    dry_run: bool,

    /// Output results as JSON
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    overrides: ArgOverrides,
}

pub async fn execute(command: SftCommand) -> Result<()> {
    let overrides = command.overrides.to_map()?;
    let args = config::resolve(command.config.as_deref(), &overrides)?;

    let hub = HubClient::from_env().context("Failed to set up the hub client")?;
    let registry = ArchitectureRegistry::default();

    if command.dry_run {
        let job = prepare_job(&args, &hub, &registry).await.context("Failed to prepare training job")?;
        println!("{}", serde_json::to_string_pretty(&job)?);
        return Ok(());
    }

    let trainer = ProcessTrainer::new(hub.clone());
    let run = run_sft(&args, &hub, &registry, &trainer, &TracingProgressSink)
        .await
        .context("Fine-tuning failed")?;

    if command.json {
        println!("{}", serde_json::to_string_pretty(&run.manifest)?);
        return Ok(());
    }

    let metrics = &run.manifest.metrics;
    println!();
    println!("{}", "Fine-tuning complete".bold().green());
    println!("  Job:      {}", run.job.job_id.0.cyan());
    println!("  Model:    {}", run.manifest.base_model);
    println!("  Dataset:  {} ({} examples)", run.manifest.dataset_name, run.job.train_examples);
    if let Some(steps) = metrics.steps {
        println!("  Steps:    {steps}");
    }
    if let Some(loss) = metrics.train_loss {
        println!("  Loss:     {loss:.4}");
    }
    println!("  Saved to: {}", args.training.output_dir.display().to_string().dimmed());
    if let Some(url) = &run.hub_url {
        println!("  Pushed:   {}", url.cyan());
    }
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_given_flags_are_overrides() {
        let overrides = ArgOverrides {
            learning_rate: Some(1e-4),
            use_peft: Some(true),
            lora_target_modules: Some(vec!["q_proj".to_string()]),
            ..Default::default()
        };
        let map = overrides.to_map().unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map["use_peft"], Value::Bool(true));
        assert_eq!(map["lora_target_modules"], serde_json::json!(["q_proj"]));
    }

    #[test]
    fn test_every_flag_is_a_known_key() {
        let known = sftkit_training::SftArguments::known_keys().unwrap();
        let all = serde_json::to_value(ArgOverrides::default()).unwrap();
        for key in all.as_object().unwrap().keys() {
            assert!(known.contains(key), "flag {key} has no matching field");
        }
        assert_eq!(all.as_object().unwrap().len(), known.len());
    }
}
