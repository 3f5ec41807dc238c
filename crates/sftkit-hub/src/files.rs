//! File selection rules shared by hub repositories and local directories.
//!
//! Both sides only see a list of relative paths, so the same rules decide which
//! files hold model weights or a dataset split.

use serde_json::Value;
use std::collections::BTreeSet;

pub const MODEL_CONFIG_FILE: &str = "config.json";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const TOKENIZER_CONFIG_FILE: &str = "tokenizer_config.json";
pub const SPECIAL_TOKENS_MAP_FILE: &str = "special_tokens_map.json";
pub const SAFETENSORS_FILE: &str = "model.safetensors";
pub const SAFETENSORS_INDEX_FILE: &str = "model.safetensors.index.json";

/// Subset name used by the hub when a dataset has no named configs.
pub const DEFAULT_CONFIG: &str = "default";

/// How a model repository stores its weights.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeightLayout {
    /// A single `model.safetensors`.
    Single(String),
    /// Shards listed in `model.safetensors.index.json`.
    ShardIndex(String),
    /// Legacy PyTorch pickles (`pytorch_model.bin`, `pytorch_model-0000x-of-0000y.bin`).
    PyTorch(Vec<String>),
}

pub fn detect_weight_layout(files: &[String]) -> Option<WeightLayout> {
    if files.iter().any(|f| f == SAFETENSORS_FILE) {
        return Some(WeightLayout::Single(SAFETENSORS_FILE.to_string()));
    }
    if files.iter().any(|f| f == SAFETENSORS_INDEX_FILE) {
        return Some(WeightLayout::ShardIndex(SAFETENSORS_INDEX_FILE.to_string()));
    }

    let mut bins: Vec<String> = files
        .iter()
        .filter(|f| f.starts_with("pytorch_model") && f.ends_with(".bin"))
        .cloned()
        .collect();
    if bins.is_empty() {
        return None;
    }
    bins.sort();
    Some(WeightLayout::PyTorch(bins))
}

/// Shard filenames referenced by a safetensors index, deduplicated and sorted.
pub fn shards_from_index(index: &Value) -> Vec<String> {
    let Some(weight_map) = index.get("weight_map").and_then(Value::as_object) else {
        return Vec::new();
    };

    weight_map
        .values()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Data file formats in order of preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DataFormat {
    Parquet,
    JsonLines,
    Json,
}

impl DataFormat {
    pub fn from_path(path: &str) -> Option<Self> {
        let lower = path.to_ascii_lowercase();
        if lower.ends_with(".parquet") {
            Some(Self::Parquet)
        } else if lower.ends_with(".jsonl") {
            Some(Self::JsonLines)
        } else if lower.ends_with(".json") {
            Some(Self::Json)
        } else {
            None
        }
    }
}

/// Pick the files that make up `split` (optionally restricted to a dataset
/// `config` subset). Only the most preferred format present is returned.
pub fn select_split_files(files: &[String], config: Option<&str>, split: &str) -> Vec<String> {
    let mut matches: Vec<(DataFormat, String)> = files
        .iter()
        .filter(|f| !is_hidden(f))
        .filter_map(|f| DataFormat::from_path(f).map(|fmt| (fmt, f.clone())))
        .filter(|(_, f)| belongs_to_split(f, split))
        .filter(|(_, f)| config.is_none_or(|c| in_config(f, c)))
        .collect();

    // Multi-config layouts without a chosen config fall back to `default`.
    if config.is_none() && matches.iter().any(|(_, f)| in_config(f, DEFAULT_CONFIG)) {
        matches.retain(|(_, f)| in_config(f, DEFAULT_CONFIG));
    }

    let Some(best) = matches.iter().map(|(fmt, _)| *fmt).min() else {
        return Vec::new();
    };

    matches.retain(|(fmt, _)| *fmt == best);
    let mut out: Vec<String> = matches.into_iter().map(|(_, f)| f).collect();
    out.sort();
    out
}

fn is_hidden(path: &str) -> bool {
    path.split('/').any(|part| part.starts_with('.'))
}

fn belongs_to_split(path: &str, split: &str) -> bool {
    let mut parts: Vec<&str> = path.split('/').collect();
    let Some(file) = parts.pop() else {
        return false;
    };

    let stem = file.split('.').next().unwrap_or(file);
    if stem == split || stem.starts_with(&format!("{split}-")) || stem.starts_with(&format!("{split}_")) {
        return true;
    }

    parts.iter().any(|dir| *dir == split)
}

fn in_config(path: &str, config: &str) -> bool {
    let mut parts: Vec<&str> = path.split('/').collect();
    parts.pop();
    parts.iter().any(|dir| *dir == config)
}
