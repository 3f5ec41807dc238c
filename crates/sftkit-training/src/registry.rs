use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Model family, decided by the architecture names a model declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    CausalLm,
    ImageTextToText,
}

/// Architectures loadable as image-text-to-text models.
const IMAGE_TEXT_TO_TEXT_ARCHITECTURES: &[&str] = &[
    "AriaForConditionalGeneration",
    "AyaVisionForConditionalGeneration",
    "BlipForConditionalGeneration",
    "Blip2ForConditionalGeneration",
    "ChameleonForConditionalGeneration",
    "Emu3ForConditionalGeneration",
    "FuyuForCausalLM",
    "Gemma3ForConditionalGeneration",
    "GitForCausalLM",
    "GotOcr2ForConditionalGeneration",
    "IdeficsForVisionText2Text",
    "Idefics2ForConditionalGeneration",
    "Idefics3ForConditionalGeneration",
    "InstructBlipForConditionalGeneration",
    "InternVLForConditionalGeneration",
    "Kosmos2ForConditionalGeneration",
    "Llama4ForConditionalGeneration",
    "LlavaForConditionalGeneration",
    "LlavaNextForConditionalGeneration",
    "LlavaNextVideoForConditionalGeneration",
    "LlavaOnevisionForConditionalGeneration",
    "Mistral3ForConditionalGeneration",
    "MllamaForConditionalGeneration",
    "PaliGemmaForConditionalGeneration",
    "Pix2StructForConditionalGeneration",
    "Qwen2VLForConditionalGeneration",
    "Qwen2_5_VLForConditionalGeneration",
    "SmolVLMForConditionalGeneration",
    "UdopForConditionalGeneration",
    "VipLlavaForConditionalGeneration",
    "VisionEncoderDecoderModel",
];

/// Maps declared architecture names to a model family. Names not in the
/// table are causal language models.
#[derive(Debug, Clone)]
pub struct ArchitectureRegistry {
    families: HashMap<String, ModelFamily>,
}

impl Default for ArchitectureRegistry {
    fn default() -> Self {
        let families = IMAGE_TEXT_TO_TEXT_ARCHITECTURES
            .iter()
            .map(|name| ((*name).to_string(), ModelFamily::ImageTextToText))
            .collect();
        Self { families }
    }
}

impl ArchitectureRegistry {
    /// Register (or override) the family of an architecture.
    #[must_use]
    pub fn with_architecture(mut self, name: impl Into<String>, family: ModelFamily) -> Self {
        self.families.insert(name.into(), family);
        self
    }

    #[must_use]
    pub fn family_of(&self, architecture: &str) -> ModelFamily {
        self.families.get(architecture).copied().unwrap_or(ModelFamily::CausalLm)
    }

    /// Family for a model declaring `architectures`: image-text-to-text if any
    /// declared name is one, causal LM otherwise (including an empty list).
    #[must_use]
    pub fn resolve(&self, architectures: &[String]) -> ModelFamily {
        if architectures.iter().any(|a| self.family_of(a) == ModelFamily::ImageTextToText) {
            ModelFamily::ImageTextToText
        } else {
            ModelFamily::CausalLm
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vision_architecture_resolves_to_image_text() {
        let registry = ArchitectureRegistry::default();
        let archs = vec!["Qwen2VLForConditionalGeneration".to_string()];
        assert_eq!(registry.resolve(&archs), ModelFamily::ImageTextToText);
    }

    #[test]
    fn test_unknown_and_empty_resolve_to_causal_lm() {
        let registry = ArchitectureRegistry::default();
        assert_eq!(registry.resolve(&["Qwen2ForCausalLM".to_string()]), ModelFamily::CausalLm);
        assert_eq!(registry.resolve(&[]), ModelFamily::CausalLm);
    }

    #[test]
    fn test_any_image_text_architecture_wins() {
        let registry = ArchitectureRegistry::default();
        let archs = vec!["LlamaForCausalLM".to_string(), "LlavaForConditionalGeneration".to_string()];
        assert_eq!(registry.resolve(&archs), ModelFamily::ImageTextToText);
    }

    #[test]
    fn test_custom_registration() {
        let registry = ArchitectureRegistry::default().with_architecture("MyVlm", ModelFamily::ImageTextToText);
        assert_eq!(registry.family_of("MyVlm"), ModelFamily::ImageTextToText);
    }
}
