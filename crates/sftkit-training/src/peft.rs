use crate::args::ModelSpec;
use serde::{Deserialize, Serialize};

/// LoRA adapter settings passed to the trainer backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoraConfig {
    pub task_type: String,
    pub r: u32,
    pub lora_alpha: u32,
    pub lora_dropout: f64,
    pub bias: String,
    /// Empty means the backend picks the default modules for the architecture.
    pub target_modules: Vec<String>,
    pub modules_to_save: Vec<String>,
    pub use_rslora: bool,
}

impl LoraConfig {
    /// `None` unless `use_peft` is set.
    #[must_use]
    pub fn from_spec(spec: &ModelSpec) -> Option<Self> {
        spec.use_peft.then(|| Self {
            task_type: spec.lora_task_type.clone(),
            r: spec.lora_r,
            lora_alpha: spec.lora_alpha,
            lora_dropout: spec.lora_dropout,
            bias: "none".to_string(),
            target_modules: spec.lora_target_modules.clone(),
            modules_to_save: spec.lora_modules_to_save.clone(),
            use_rslora: spec.use_rslora,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_adapter_without_use_peft() {
        assert!(LoraConfig::from_spec(&ModelSpec::default()).is_none());
    }

    #[test]
    fn test_adapter_copies_lora_fields() {
        let spec = ModelSpec {
            use_peft: true,
            lora_r: 32,
            lora_alpha: 16,
            lora_target_modules: vec!["q_proj".to_string(), "v_proj".to_string()],
            ..Default::default()
        };
        let lora = LoraConfig::from_spec(&spec).unwrap();
        assert_eq!(lora.r, 32);
        assert_eq!(lora.lora_alpha, 16);
        assert_eq!(lora.task_type, "CAUSAL_LM");
        assert_eq!(lora.bias, "none");
        assert_eq!(lora.target_modules.len(), 2);
    }
}
