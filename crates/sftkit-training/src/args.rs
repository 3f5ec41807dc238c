//! The three argument records of an SFT run.
//!
//! Every record deserializes from a flat key space (the field names below), so
//! a config file, the environment and CLI flags can all feed the same records.
//! Fields marked as policy are fixed at construction and never read from input.

use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// How the `chosen` column of an example is shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChosenLayout {
    /// Two turn objects are a flat pair; anything else is a sequence of pairs.
    #[default]
    Auto,
    /// `chosen` is `[user_turn, assistant_turn]`.
    FlatPair,
    /// `chosen` is `[[user_turn, assistant_turn], ...]`.
    PairSequence,
}

/// Which dataset to train on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetSpec {
    /// Hub dataset id or a local file/directory.
    pub dataset_name: String,
    /// Dataset subset (hub "config") name.
    pub dataset_config: Option<String>,
    pub dataset_train_split: String,
    pub dataset_test_split: String,
    pub chosen_layout: ChosenLayout,
}

impl Default for DatasetSpec {
    fn default() -> Self {
        Self {
            dataset_name: String::new(),
            dataset_config: None,
            dataset_train_split: "train".to_string(),
            dataset_test_split: "test".to_string(),
            chosen_layout: ChosenLayout::Auto,
        }
    }
}

impl DatasetSpec {
    pub fn validate(&self) -> TrainingResult<()> {
        if self.dataset_name.trim().is_empty() {
            return Err(TrainingError::InvalidSpec("dataset_name is required".to_string()));
        }
        if self.dataset_train_split.trim().is_empty() {
            return Err(TrainingError::InvalidSpec("dataset_train_split must not be empty".to_string()));
        }
        if self.dataset_test_split.trim().is_empty() {
            return Err(TrainingError::InvalidSpec("dataset_test_split must not be empty".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalStrategy {
    No,
    Steps,
    Epoch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerType {
    Linear,
    Cosine,
    CosineWithRestarts,
    Polynomial,
    Constant,
    ConstantWithWarmup,
}

/// Hyperparameters handed to the trainer backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub output_dir: PathBuf,
    pub learning_rate: f64,
    pub num_train_epochs: f64,
    /// Overrides `num_train_epochs` when set.
    pub max_steps: Option<u64>,
    pub per_device_train_batch_size: u32,
    pub per_device_eval_batch_size: u32,
    pub gradient_accumulation_steps: u32,
    pub gradient_checkpointing: bool,
    pub logging_steps: u64,
    pub eval_strategy: IntervalStrategy,
    /// Defaults to `logging_steps` when unset.
    pub eval_steps: Option<u64>,
    pub save_strategy: IntervalStrategy,
    pub save_steps: u64,
    pub save_total_limit: Option<u32>,
    pub seed: u64,
    pub warmup_ratio: f64,
    pub weight_decay: f64,
    pub lr_scheduler_type: SchedulerType,
    pub max_seq_length: u32,
    pub packing: bool,
    pub dataset_text_field: String,
    pub bf16: bool,
    pub push_to_hub: bool,
    /// Target repository; defaults to the `output_dir` name under the token's account.
    pub hub_model_id: Option<String>,
    pub hub_private_repo: bool,
    /// Program (and leading arguments) of the external training worker.
    pub trainer_command: String,
    /// Experiment-tracking integrations. Policy: always empty.
    #[serde(skip_deserializing)]
    pub report_to: Vec<String>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("trainer_output"),
            learning_rate: 2e-5,
            num_train_epochs: 3.0,
            max_steps: None,
            per_device_train_batch_size: 8,
            per_device_eval_batch_size: 8,
            gradient_accumulation_steps: 1,
            gradient_checkpointing: true,
            logging_steps: 10,
            eval_strategy: IntervalStrategy::No,
            eval_steps: None,
            save_strategy: IntervalStrategy::Steps,
            save_steps: 500,
            save_total_limit: None,
            seed: 42,
            warmup_ratio: 0.0,
            weight_decay: 0.0,
            lr_scheduler_type: SchedulerType::Linear,
            max_seq_length: 1024,
            packing: false,
            dataset_text_field: "text".to_string(),
            bf16: true,
            push_to_hub: false,
            hub_model_id: None,
            hub_private_repo: false,
            trainer_command: "sftkit-worker".to_string(),
            report_to: Vec::new(),
        }
    }
}

impl TrainingConfig {
    /// Keys fixed by policy; rejected when they appear in user input.
    pub const POLICY_KEYS: &'static [&'static str] = &["report_to"];

    pub fn validate(&self) -> TrainingResult<()> {
        if self.output_dir.as_os_str().is_empty() {
            return Err(TrainingError::InvalidSpec("output_dir must not be empty".to_string()));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(TrainingError::InvalidSpec("learning_rate must be > 0".to_string()));
        }
        if self.max_steps.is_none() && (!self.num_train_epochs.is_finite() || self.num_train_epochs <= 0.0) {
            return Err(TrainingError::InvalidSpec(
                "num_train_epochs must be > 0 when max_steps is not set".to_string(),
            ));
        }
        if self.max_steps == Some(0) {
            return Err(TrainingError::InvalidSpec("max_steps must be >= 1".to_string()));
        }
        if self.per_device_train_batch_size == 0 || self.per_device_eval_batch_size == 0 {
            return Err(TrainingError::InvalidSpec("batch sizes must be >= 1".to_string()));
        }
        if self.gradient_accumulation_steps == 0 {
            return Err(TrainingError::InvalidSpec("gradient_accumulation_steps must be >= 1".to_string()));
        }
        if self.logging_steps == 0 {
            return Err(TrainingError::InvalidSpec("logging_steps must be >= 1".to_string()));
        }
        if self.eval_steps == Some(0) {
            return Err(TrainingError::InvalidSpec("eval_steps must be >= 1".to_string()));
        }
        if self.save_strategy == IntervalStrategy::Steps && self.save_steps == 0 {
            return Err(TrainingError::InvalidSpec("save_steps must be >= 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.warmup_ratio) {
            return Err(TrainingError::InvalidSpec("warmup_ratio must be within [0, 1]".to_string()));
        }
        if self.max_seq_length == 0 {
            return Err(TrainingError::InvalidSpec("max_seq_length must be >= 1".to_string()));
        }
        if self.dataset_text_field.trim().is_empty() {
            return Err(TrainingError::InvalidSpec("dataset_text_field must not be empty".to_string()));
        }
        if self.trainer_argv().is_empty() {
            return Err(TrainingError::InvalidSpec("trainer_command must not be empty".to_string()));
        }
        if let Some(id) = &self.hub_model_id {
            if id.trim().is_empty() || id.split('/').count() > 2 {
                return Err(TrainingError::InvalidSpec(format!("invalid hub_model_id: '{id}'")));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn eval_enabled(&self) -> bool {
        self.eval_strategy != IntervalStrategy::No
    }

    #[must_use]
    pub fn effective_eval_steps(&self) -> u64 {
        self.eval_steps.unwrap_or(self.logging_steps)
    }

    /// `trainer_command` split on whitespace.
    #[must_use]
    pub fn trainer_argv(&self) -> Vec<String> {
        self.trainer_command.split_whitespace().map(str::to_string).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TorchDtype {
    Auto,
    Bfloat16,
    Float16,
    Float32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantType {
    Nf4,
    Fp4,
}

/// Which model to fine-tune and how to load it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSpec {
    /// Hub model id or a local directory.
    pub model_name_or_path: String,
    pub model_revision: String,
    pub torch_dtype: TorchDtype,
    pub attn_implementation: String,
    pub trust_remote_code: bool,
    pub use_peft: bool,
    pub lora_r: u32,
    pub lora_alpha: u32,
    pub lora_dropout: f64,
    pub lora_target_modules: Vec<String>,
    pub lora_modules_to_save: Vec<String>,
    pub lora_task_type: String,
    pub use_rslora: bool,
    pub load_in_8bit: bool,
    pub load_in_4bit: bool,
    pub bnb_4bit_quant_type: QuantType,
    pub use_bnb_nested_quant: bool,
    /// Activation cache during training. Policy: always disabled, independent
    /// of `gradient_checkpointing`.
    #[serde(skip_deserializing)]
    pub use_cache: bool,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            model_name_or_path: String::new(),
            model_revision: "main".to_string(),
            torch_dtype: TorchDtype::Bfloat16,
            attn_implementation: "flash_attention_2".to_string(),
            trust_remote_code: false,
            use_peft: false,
            lora_r: 16,
            lora_alpha: 32,
            lora_dropout: 0.05,
            lora_target_modules: Vec::new(),
            lora_modules_to_save: Vec::new(),
            lora_task_type: "CAUSAL_LM".to_string(),
            use_rslora: false,
            load_in_8bit: false,
            load_in_4bit: false,
            bnb_4bit_quant_type: QuantType::Nf4,
            use_bnb_nested_quant: false,
            use_cache: false,
        }
    }
}

impl ModelSpec {
    /// Keys fixed by policy; rejected when they appear in user input.
    pub const POLICY_KEYS: &'static [&'static str] = &["use_cache"];

    pub fn validate(&self) -> TrainingResult<()> {
        if self.model_name_or_path.trim().is_empty() {
            return Err(TrainingError::InvalidSpec("model_name_or_path is required".to_string()));
        }
        if self.model_revision.trim().is_empty() {
            return Err(TrainingError::InvalidSpec("model_revision must not be empty".to_string()));
        }
        if self.load_in_4bit && self.load_in_8bit {
            return Err(TrainingError::InvalidSpec(
                "load_in_4bit and load_in_8bit cannot both be set".to_string(),
            ));
        }
        if self.use_peft {
            if self.lora_r == 0 {
                return Err(TrainingError::InvalidSpec("lora_r must be >= 1".to_string()));
            }
            if !(0.0..1.0).contains(&self.lora_dropout) {
                return Err(TrainingError::InvalidSpec("lora_dropout must be within [0, 1)".to_string()));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn quantized(&self) -> bool {
        self.load_in_4bit || self.load_in_8bit
    }
}

/// All three records of one run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SftArguments {
    pub dataset: DatasetSpec,
    pub training: TrainingConfig,
    pub model: ModelSpec,
}

impl SftArguments {
    pub fn validate(&self) -> TrainingResult<()> {
        self.dataset.validate()?;
        self.training.validate()?;
        self.model.validate()?;
        Ok(())
    }

    /// Every key accepted from configuration input, across the three records.
    pub fn known_keys() -> TrainingResult<BTreeSet<String>> {
        let mut keys = BTreeSet::new();
        for value in [
            serde_json::to_value(DatasetSpec::default())?,
            serde_json::to_value(TrainingConfig::default())?,
            serde_json::to_value(ModelSpec::default())?,
        ] {
            if let serde_json::Value::Object(map) = value {
                keys.extend(map.into_iter().map(|(k, _)| k));
            }
        }
        for policy in TrainingConfig::POLICY_KEYS.iter().chain(ModelSpec::POLICY_KEYS) {
            keys.remove(*policy);
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_args() -> SftArguments {
        let mut args = SftArguments::default();
        args.dataset.dataset_name = "trl-lib/Capybara".to_string();
        args.model.model_name_or_path = "Qwen/Qwen2-0.5B".to_string();
        args
    }

    #[test]
    fn test_defaults_validate_once_required_fields_are_set() {
        assert!(SftArguments::default().validate().is_err());
        valid_args().validate().unwrap();
    }

    #[test]
    fn test_policy_fields_cannot_be_deserialized() {
        let training: TrainingConfig =
            serde_json::from_value(serde_json::json!({ "report_to": ["wandb"], "learning_rate": 1e-4 })).unwrap();
        assert!(training.report_to.is_empty());
        assert!((training.learning_rate - 1e-4).abs() < f64::EPSILON);

        let model: ModelSpec = serde_json::from_value(serde_json::json!({ "use_cache": true })).unwrap();
        assert!(!model.use_cache);
    }

    #[test]
    fn test_known_keys_cover_records_but_not_policy() {
        let keys = SftArguments::known_keys().unwrap();
        for key in ["dataset_name", "learning_rate", "lora_r", "load_in_4bit", "chosen_layout", "trainer_command"] {
            assert!(keys.contains(key), "missing {key}");
        }
        assert!(!keys.contains("report_to"));
        assert!(!keys.contains("use_cache"));
    }

    #[test]
    fn test_rejects_conflicting_quantization() {
        let mut args = valid_args();
        args.model.load_in_4bit = true;
        args.model.load_in_8bit = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_hyperparameters() {
        let mut args = valid_args();
        args.training.learning_rate = 0.0;
        assert!(args.validate().is_err());

        let mut args = valid_args();
        args.training.num_train_epochs = 0.0;
        assert!(args.validate().is_err());
        args.training.max_steps = Some(10);
        args.validate().unwrap();

        let mut args = valid_args();
        args.training.trainer_command = "   ".to_string();
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_eval_steps_fall_back_to_logging_steps() {
        let mut training = TrainingConfig { logging_steps: 25, ..Default::default() };
        assert!(!training.eval_enabled());
        assert_eq!(training.effective_eval_steps(), 25);
        training.eval_strategy = IntervalStrategy::Steps;
        training.eval_steps = Some(100);
        assert!(training.eval_enabled());
        assert_eq!(training.effective_eval_steps(), 100);
    }

    #[test]
    fn test_enum_values_use_flag_spelling() {
        let dataset: DatasetSpec =
            serde_json::from_value(serde_json::json!({ "chosen_layout": "pair_sequence" })).unwrap();
        assert_eq!(dataset.chosen_layout, ChosenLayout::PairSequence);
        let training: TrainingConfig = serde_json::from_value(serde_json::json!({
            "eval_strategy": "steps",
            "lr_scheduler_type": "cosine_with_restarts"
        }))
        .unwrap();
        assert_eq!(training.eval_strategy, IntervalStrategy::Steps);
        assert_eq!(training.lr_scheduler_type, SchedulerType::CosineWithRestarts);
    }
}
