//! `README.md` model card with hub metadata front matter.

use crate::artifacts::TrainingMetrics;
use crate::error::{TrainingError, TrainingResult};
use crate::job::TrainingJobSpec;
use crate::registry::ModelFamily;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

pub const MODEL_CARD_FILE: &str = "README.md";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardMetadata {
    pub base_model: String,
    pub datasets: Vec<String>,
    pub library_name: String,
    pub pipeline_tag: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ModelCard {
    pub title: String,
    pub metadata: CardMetadata,
    body: String,
}

fn looks_like_hub_id(name: &str) -> bool {
    !name.starts_with('/') && !name.starts_with('.') && !Path::new(name).exists()
}

impl ModelCard {
    /// Card for the model trained by `job` on `dataset_name`.
    #[must_use]
    pub fn for_job(job: &TrainingJobSpec, dataset_name: &str, metrics: &TrainingMetrics) -> Self {
        let title = job
            .training
            .hub_model_id
            .clone()
            .or_else(|| job.training.output_dir.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "model".to_string());

        let base = &job.model.name_or_path;
        let adapter = job.peft.is_some();
        let metadata = CardMetadata {
            base_model: base.clone(),
            datasets: vec![dataset_name.to_string()],
            library_name: if adapter { "peft" } else { "transformers" }.to_string(),
            pipeline_tag: match job.model.family {
                ModelFamily::CausalLm => "text-generation",
                ModelFamily::ImageTextToText => "image-text-to-text",
            }
            .to_string(),
            tags: ["sftkit", "sft", "generated_from_trainer"].map(str::to_string).to_vec(),
        };

        let link = |name: &str, prefix: &str| {
            if looks_like_hub_id(name) {
                format!("[{name}](https://huggingface.co/{prefix}{name})")
            } else {
                format!("`{name}`")
            }
        };

        let mut body = String::new();
        let _ = writeln!(
            body,
            "This model is a fine-tuned version of {} on the {} dataset.\n",
            link(base, ""),
            link(dataset_name, "datasets/")
        );
        if adapter {
            body.push_str("The weights are a LoRA adapter; load them on top of the base model.\n\n");
        }

        body.push_str("## Training procedure\n\n");
        body.push_str("Supervised fine-tuning on `### User:` / `### Assistant:` formatted conversations.\n\n");
        body.push_str("### Hyperparameters\n\n");
        let t = &job.training;
        let _ = writeln!(body, "- learning_rate: {}", t.learning_rate);
        match t.max_steps {
            Some(steps) => {
                let _ = writeln!(body, "- max_steps: {steps}");
            }
            None => {
                let _ = writeln!(body, "- num_train_epochs: {}", t.num_train_epochs);
            }
        }
        let _ = writeln!(body, "- per_device_train_batch_size: {}", t.per_device_train_batch_size);
        let _ = writeln!(body, "- gradient_accumulation_steps: {}", t.gradient_accumulation_steps);
        let _ = writeln!(body, "- lr_scheduler_type: {:?}", t.lr_scheduler_type);
        let _ = writeln!(body, "- max_seq_length: {}", t.max_seq_length);
        let _ = writeln!(body, "- seed: {}", t.seed);
        if let Some(lora) = &job.peft {
            let _ = writeln!(body, "- lora_r: {}", lora.r);
            let _ = writeln!(body, "- lora_alpha: {}", lora.lora_alpha);
        }

        if metrics.train_loss.is_some() || metrics.eval_loss.is_some() || metrics.steps.is_some() {
            body.push_str("\n### Results\n\n");
            if let Some(steps) = metrics.steps {
                let _ = writeln!(body, "- steps: {steps}");
            }
            if let Some(loss) = metrics.train_loss {
                let _ = writeln!(body, "- train_loss: {loss:.4}");
            }
            if let Some(loss) = metrics.eval_loss {
                let _ = writeln!(body, "- eval_loss: {loss:.4}");
            }
        }

        Self { title, metadata, body }
    }

    pub fn render(&self) -> TrainingResult<String> {
        let front = serde_yaml::to_string(&self.metadata)
            .map_err(|e| TrainingError::Artifact(format!("failed to render model card: {e}")))?;
        Ok(format!("---\n{front}---\n\n# {}\n\n{}", self.title, self.body))
    }

    pub fn write(&self, dir: &Path) -> TrainingResult<PathBuf> {
        let path = dir.join(MODEL_CARD_FILE);
        std::fs::write(&path, self.render()?)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::tests::sample_job;
    use crate::peft::LoraConfig;
    use tempfile::TempDir;

    fn front_matter(rendered: &str) -> CardMetadata {
        let yaml = rendered.trim_start_matches("---\n").split("\n---\n").next().unwrap();
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_card_lists_dataset_and_base_model() {
        let temp = TempDir::new().unwrap();
        let job = sample_job(temp.path());
        let card = ModelCard::for_job(&job, "trl-lib/Capybara", &TrainingMetrics::default());
        let rendered = card.render().unwrap();

        let meta = front_matter(&rendered);
        assert_eq!(meta.datasets, vec!["trl-lib/Capybara".to_string()]);
        assert_eq!(meta.base_model, "org/tiny-llama");
        assert_eq!(meta.pipeline_tag, "text-generation");
        assert_eq!(meta.library_name, "transformers");
        assert!(rendered.contains("# out\n"));
        assert!(rendered.contains("https://huggingface.co/datasets/trl-lib/Capybara"));
        assert!(!rendered.contains("### Results"));
    }

    #[test]
    fn test_adapter_card_and_results() {
        let temp = TempDir::new().unwrap();
        let mut job = sample_job(temp.path());
        job.peft = Some(LoraConfig::from_spec(&crate::args::ModelSpec { use_peft: true, ..Default::default() }).unwrap());
        let metrics = TrainingMetrics { train_loss: Some(1.23456), eval_loss: None, steps: Some(12) };

        let path = ModelCard::for_job(&job, "org/prefs", &metrics).write(temp.path()).unwrap();
        let rendered = std::fs::read_to_string(path).unwrap();
        assert_eq!(front_matter(&rendered).library_name, "peft");
        assert!(rendered.contains("- train_loss: 1.2346"));
        assert!(rendered.contains("- steps: 12"));
        assert!(rendered.contains("- lora_r: 16"));
    }
}
