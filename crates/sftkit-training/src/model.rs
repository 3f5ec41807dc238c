//! Model acquisition: resolve the architecture, pick a loader, fetch weights
//! and compute the load options the trainer backend applies.

use crate::args::{ModelSpec, QuantType, TorchDtype};
use crate::error::{TrainingError, TrainingResult};
use crate::registry::{ArchitectureRegistry, ModelFamily};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sftkit_hub::files::{self, WeightLayout};
use sftkit_hub::{HubClient, RepoRef};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Where the model files come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    Local(PathBuf),
    Hub(RepoRef),
}

impl ModelSource {
    /// An existing directory is used in place; anything else is a hub id.
    #[must_use]
    pub fn resolve(spec: &ModelSpec) -> Self {
        let path = Path::new(&spec.model_name_or_path);
        if path.is_dir() {
            Self::Local(path.to_path_buf())
        } else {
            Self::Hub(RepoRef::model(spec.model_name_or_path.clone(), Some(&spec.model_revision)))
        }
    }
}

/// The part of `config.json` that decides how a model is loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchitectureConfig {
    #[serde(default)]
    pub architectures: Option<Vec<String>>,
    #[serde(default)]
    pub model_type: Option<String>,
    #[serde(default)]
    pub auto_map: Option<serde_json::Value>,
}

impl ArchitectureConfig {
    pub fn from_file(path: &Path) -> TrainingResult<Self> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| TrainingError::Model(format!("invalid model config {}: {e}", path.display())))
    }

    #[must_use]
    pub fn architectures(&self) -> &[String] {
        self.architectures.as_deref().unwrap_or(&[])
    }
}

/// Weight placement across devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMap {
    /// Let the runtime spread weights over the available accelerators.
    Auto,
    /// Put the whole model on one device (`{"": index}`).
    SingleDevice(u32),
}

impl Serialize for DeviceMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Auto => serializer.serialize_str("auto"),
            Self::SingleDevice(index) => {
                let mut map = BTreeMap::new();
                map.insert("", *index);
                map.serialize(serializer)
            }
        }
    }
}

impl<'de> Deserialize<'de> for DeviceMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Name(String),
            Map(BTreeMap<String, u32>),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Name(name) if name == "auto" => Ok(Self::Auto),
            Repr::Name(name) => Err(serde::de::Error::custom(format!("unknown device map '{name}'"))),
            Repr::Map(map) => map
                .get("")
                .copied()
                .map(Self::SingleDevice)
                .ok_or_else(|| serde::de::Error::custom("device map must have a \"\" entry")),
        }
    }
}

/// Per-device placement for quantized weights: everything on the local
/// process's device, taken from `LOCAL_RANK`.
#[must_use]
pub fn kbit_device_map(local_rank: Option<&str>) -> DeviceMap {
    let index = local_rank.and_then(|r| r.trim().parse::<u32>().ok()).unwrap_or(0);
    DeviceMap::SingleDevice(index)
}

/// bitsandbytes-style quantization settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantizationConfig {
    pub load_in_4bit: bool,
    pub load_in_8bit: bool,
    pub bnb_4bit_compute_dtype: TorchDtype,
    pub bnb_4bit_quant_type: QuantType,
    pub bnb_4bit_use_double_quant: bool,
    pub bnb_4bit_quant_storage: TorchDtype,
}

impl QuantizationConfig {
    /// `None` unless 4- or 8-bit loading is requested.
    #[must_use]
    pub fn from_spec(spec: &ModelSpec) -> Option<Self> {
        if spec.load_in_4bit {
            Some(Self {
                load_in_4bit: true,
                load_in_8bit: false,
                bnb_4bit_compute_dtype: spec.torch_dtype,
                bnb_4bit_quant_type: spec.bnb_4bit_quant_type,
                bnb_4bit_use_double_quant: spec.use_bnb_nested_quant,
                bnb_4bit_quant_storage: spec.torch_dtype,
            })
        } else if spec.load_in_8bit {
            Some(Self {
                load_in_4bit: false,
                load_in_8bit: true,
                bnb_4bit_compute_dtype: spec.torch_dtype,
                bnb_4bit_quant_type: spec.bnb_4bit_quant_type,
                bnb_4bit_use_double_quant: false,
                bnb_4bit_quant_storage: spec.torch_dtype,
            })
        } else {
            None
        }
    }
}

/// Keyword options for materializing the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadOptions {
    pub revision: String,
    pub trust_remote_code: bool,
    pub attn_implementation: String,
    pub torch_dtype: TorchDtype,
    /// Absent for loaders that do not accept the option.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_cache: Option<bool>,
    pub device_map: DeviceMap,
    #[serde(default)]
    pub quantization_config: Option<QuantizationConfig>,
}

/// A loading path for one model family.
pub trait ModelLoader: Send + Sync {
    fn family(&self) -> ModelFamily;

    /// Whether the loading path accepts the activation-cache option.
    fn supports_activation_cache(&self) -> bool;

    fn load_options(&self, spec: &ModelSpec) -> LoadOptions {
        let quantization_config = QuantizationConfig::from_spec(spec);
        let device_map = if quantization_config.is_some() {
            kbit_device_map(std::env::var("LOCAL_RANK").ok().as_deref())
        } else {
            DeviceMap::Auto
        };

        LoadOptions {
            revision: spec.model_revision.clone(),
            trust_remote_code: spec.trust_remote_code,
            attn_implementation: spec.attn_implementation.clone(),
            torch_dtype: spec.torch_dtype,
            use_cache: self.supports_activation_cache().then_some(spec.use_cache),
            device_map,
            quantization_config,
        }
    }
}

#[derive(Debug, Default)]
pub struct CausalLmLoader;

impl ModelLoader for CausalLmLoader {
    fn family(&self) -> ModelFamily {
        ModelFamily::CausalLm
    }

    fn supports_activation_cache(&self) -> bool {
        true
    }
}

#[derive(Debug, Default)]
pub struct ImageTextToTextLoader;

impl ModelLoader for ImageTextToTextLoader {
    fn family(&self) -> ModelFamily {
        ModelFamily::ImageTextToText
    }

    fn supports_activation_cache(&self) -> bool {
        false
    }
}

static CAUSAL_LM_LOADER: CausalLmLoader = CausalLmLoader;
static IMAGE_TEXT_TO_TEXT_LOADER: ImageTextToTextLoader = ImageTextToTextLoader;

#[must_use]
pub fn loader_for(family: ModelFamily) -> &'static dyn ModelLoader {
    match family {
        ModelFamily::CausalLm => &CAUSAL_LM_LOADER,
        ModelFamily::ImageTextToText => &IMAGE_TEXT_TO_TEXT_LOADER,
    }
}

/// A model resolved to local files plus the options to load it with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadedModel {
    /// The id or path the model was requested as.
    pub name_or_path: String,
    pub family: ModelFamily,
    pub architectures: Vec<String>,
    pub model_type: Option<String>,
    pub model_dir: PathBuf,
    pub weight_files: Vec<PathBuf>,
    pub load_options: LoadOptions,
}

/// Resolve, fetch and describe the model named by `spec`.
pub async fn acquire_model(
    spec: &ModelSpec,
    hub: &HubClient,
    registry: &ArchitectureRegistry,
) -> TrainingResult<LoadedModel> {
    let (config_path, weight_files) = match ModelSource::resolve(spec) {
        ModelSource::Local(dir) => {
            let config_path = dir.join(files::MODEL_CONFIG_FILE);
            if !config_path.is_file() {
                return Err(TrainingError::Model(format!("{} has no {}", dir.display(), files::MODEL_CONFIG_FILE)));
            }
            (config_path, local_weight_files(&dir)?)
        }
        ModelSource::Hub(repo) => {
            let listing = hub.list_files(&repo).await?;
            let config_path = hub.fetch(&repo, files::MODEL_CONFIG_FILE).await?;
            let weights = hub.fetch_weights(&repo, &listing).await?;
            (config_path, weights)
        }
    };

    let config = ArchitectureConfig::from_file(&config_path)?;
    if config.auto_map.is_some() && !spec.trust_remote_code {
        warn!(
            model = %spec.model_name_or_path,
            "model config declares custom code (auto_map) but trust_remote_code is off"
        );
    }

    let family = registry.resolve(config.architectures());
    let loader = loader_for(family);
    let load_options = loader.load_options(spec);

    info!(
        model = %spec.model_name_or_path,
        family = ?loader.family(),
        architectures = ?config.architectures(),
        weights = weight_files.len(),
        quantized = load_options.quantization_config.is_some(),
        "resolved model"
    );

    let model_dir = config_path.parent().map(Path::to_path_buf).unwrap_or_default();
    Ok(LoadedModel {
        name_or_path: spec.model_name_or_path.clone(),
        family,
        architectures: config.architectures().to_vec(),
        model_type: config.model_type,
        model_dir,
        weight_files,
        load_options,
    })
}

fn local_weight_files(dir: &Path) -> TrainingResult<Vec<PathBuf>> {
    let mut listing = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            listing.push(entry.file_name().to_string_lossy().into_owned());
        }
    }

    let names = match files::detect_weight_layout(&listing) {
        Some(WeightLayout::Single(name)) => vec![name],
        Some(WeightLayout::ShardIndex(index)) => {
            let value: serde_json::Value = serde_json::from_slice(&std::fs::read(dir.join(&index))?)?;
            let mut shards = files::shards_from_index(&value);
            shards.push(index);
            shards
        }
        Some(WeightLayout::PyTorch(bins)) => bins,
        None => {
            return Err(TrainingError::Model(format!("no weight files found in {}", dir.display())));
        }
    };

    let paths: Vec<PathBuf> = names.iter().map(|n| dir.join(n)).collect();
    if let Some(missing) = paths.iter().find(|p| !p.is_file()) {
        return Err(TrainingError::Model(format!("missing weight shard {}", missing.display())));
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn spec() -> ModelSpec {
        ModelSpec { model_name_or_path: "org/model".to_string(), ..Default::default() }
    }

    #[test]
    fn test_causal_lm_disables_activation_cache() {
        let options = loader_for(ModelFamily::CausalLm).load_options(&spec());
        assert_eq!(options.use_cache, Some(false));

        let json = serde_json::to_value(&options).unwrap();
        assert_eq!(json["use_cache"], serde_json::json!(false));
    }

    #[test]
    fn test_image_text_omits_activation_cache() {
        let options = loader_for(ModelFamily::ImageTextToText).load_options(&spec());
        assert_eq!(options.use_cache, None);

        let json = serde_json::to_value(&options).unwrap();
        assert!(json.get("use_cache").is_none());
    }

    #[test]
    fn test_cache_stays_disabled_with_gradient_checkpointing_off() {
        // The policy does not depend on any training flag.
        let options = CausalLmLoader.load_options(&spec());
        assert_eq!(options.use_cache, Some(false));
    }

    #[test]
    fn test_unquantized_uses_auto_device_map() {
        let options = CausalLmLoader.load_options(&spec());
        assert_eq!(options.device_map, DeviceMap::Auto);
        assert!(options.quantization_config.is_none());
        assert_eq!(serde_json::to_value(options.device_map).unwrap(), serde_json::json!("auto"));
    }

    #[test]
    fn test_four_bit_quantization_settings() {
        let spec = ModelSpec { load_in_4bit: true, use_bnb_nested_quant: true, ..spec() };
        let quant = QuantizationConfig::from_spec(&spec).unwrap();
        assert!(quant.load_in_4bit);
        assert_eq!(quant.bnb_4bit_quant_type, QuantType::Nf4);
        assert_eq!(quant.bnb_4bit_compute_dtype, TorchDtype::Bfloat16);
        assert!(quant.bnb_4bit_use_double_quant);

        let options = CausalLmLoader.load_options(&spec);
        assert!(matches!(options.device_map, DeviceMap::SingleDevice(_)));
    }

    #[test]
    fn test_kbit_device_map_reads_local_rank() {
        assert_eq!(kbit_device_map(Some("3")), DeviceMap::SingleDevice(3));
        assert_eq!(kbit_device_map(None), DeviceMap::SingleDevice(0));
        assert_eq!(kbit_device_map(Some("x")), DeviceMap::SingleDevice(0));
        assert_eq!(
            serde_json::to_value(DeviceMap::SingleDevice(1)).unwrap(),
            serde_json::json!({ "": 1 })
        );
        let parsed: DeviceMap = serde_json::from_value(serde_json::json!({ "": 2 })).unwrap();
        assert_eq!(parsed, DeviceMap::SingleDevice(2));
    }

    #[test]
    fn test_architecture_config_tolerates_null_architectures() {
        let config: ArchitectureConfig =
            serde_json::from_str(r#"{"architectures": null, "model_type": "gpt2"}"#).unwrap();
        assert!(config.architectures().is_empty());
        assert_eq!(config.model_type.as_deref(), Some("gpt2"));
    }

    #[tokio::test]
    async fn test_acquire_local_model_picks_loader_from_config() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("config.json"),
            r#"{"architectures": ["LlavaForConditionalGeneration"], "model_type": "llava"}"#,
        )
        .unwrap();
        std::fs::write(temp.path().join("model.safetensors"), b"weights").unwrap();

        let spec = ModelSpec { model_name_or_path: temp.path().display().to_string(), ..Default::default() };
        let hub = HubClient::new("http://127.0.0.1:9", None).unwrap();
        let model = acquire_model(&spec, &hub, &ArchitectureRegistry::default()).await.unwrap();

        assert_eq!(model.family, ModelFamily::ImageTextToText);
        assert_eq!(model.load_options.use_cache, None);
        assert_eq!(model.weight_files, vec![temp.path().join("model.safetensors")]);
    }

    #[test]
    fn test_local_sharded_weights_require_every_shard() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("model.safetensors.index.json"),
            r#"{"weight_map": {"a": "model-00001-of-00002.safetensors", "b": "model-00002-of-00002.safetensors"}}"#,
        )
        .unwrap();
        std::fs::write(temp.path().join("model-00001-of-00002.safetensors"), b"x").unwrap();
        assert!(local_weight_files(temp.path()).is_err());

        std::fs::write(temp.path().join("model-00002-of-00002.safetensors"), b"y").unwrap();
        assert_eq!(local_weight_files(temp.path()).unwrap().len(), 3);
    }
}
