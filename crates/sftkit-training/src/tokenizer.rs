//! Tokenizer acquisition and the padding-token fallback.

use crate::args::ModelSpec;
use crate::error::{TrainingError, TrainingResult};
use crate::model::ModelSource;
use serde_json::{Map, Value};
use sftkit_hub::HubClient;
use sftkit_hub::files::{SPECIAL_TOKENS_MAP_FILE, TOKENIZER_CONFIG_FILE, TOKENIZER_FILE};
use std::path::{Path, PathBuf};
use tokenizers::{PaddingParams, Tokenizer};
use tracing::{info, warn};

/// A fast tokenizer plus the settings that travel with it
/// (`tokenizer_config.json`, `special_tokens_map.json`).
#[derive(Clone)]
pub struct PreparedTokenizer {
    inner: Tokenizer,
    config: Map<String, Value>,
    special_tokens: Option<Map<String, Value>>,
    pad_token: Option<String>,
    eos_token: Option<String>,
}

impl std::fmt::Debug for PreparedTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedTokenizer")
            .field("pad_token", &self.pad_token)
            .field("eos_token", &self.eos_token)
            .field("vocab_size", &self.inner.get_vocab_size(true))
            .finish_non_exhaustive()
    }
}

/// Special tokens are either plain strings or added-token objects with a `content` field.
fn token_content(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => obj.get("content").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn read_json_object(path: &Path) -> TrainingResult<Map<String, Value>> {
    match serde_json::from_slice(&std::fs::read(path)?)? {
        Value::Object(map) => Ok(map),
        _ => Err(TrainingError::Tokenizer(format!("{} is not a JSON object", path.display()))),
    }
}

impl PreparedTokenizer {
    pub fn from_parts(
        inner: Tokenizer,
        config: Map<String, Value>,
        special_tokens: Option<Map<String, Value>>,
    ) -> Self {
        let lookup = |key: &str| {
            config
                .get(key)
                .and_then(token_content)
                .or_else(|| special_tokens.as_ref().and_then(|m| m.get(key)).and_then(token_content))
        };
        let pad_token = lookup("pad_token");
        let eos_token = lookup("eos_token");

        Self { inner, config, special_tokens, pad_token, eos_token }
    }

    pub fn from_files(
        tokenizer_file: &Path,
        config_file: Option<&Path>,
        special_tokens_file: Option<&Path>,
    ) -> TrainingResult<Self> {
        let inner = Tokenizer::from_file(tokenizer_file)
            .map_err(|e| TrainingError::Tokenizer(format!("failed to load {}: {e}", tokenizer_file.display())))?;
        let config = config_file.map(read_json_object).transpose()?.unwrap_or_default();
        let special_tokens = special_tokens_file.map(read_json_object).transpose()?;
        Ok(Self::from_parts(inner, config, special_tokens))
    }

    #[must_use]
    pub fn pad_token(&self) -> Option<&str> {
        self.pad_token.as_deref()
    }

    #[must_use]
    pub fn eos_token(&self) -> Option<&str> {
        self.eos_token.as_deref()
    }

    #[must_use]
    pub fn inner(&self) -> &Tokenizer {
        &self.inner
    }

    /// Use the end-of-sequence token for padding when no pad token is defined.
    /// Returns `true` when the fallback was applied.
    pub fn ensure_pad_token(&mut self) -> bool {
        if self.pad_token.is_some() {
            return false;
        }
        let Some(eos) = self.eos_token.clone() else {
            warn!("tokenizer defines neither a pad token nor an eos token; batches cannot be padded");
            return false;
        };

        if let Some(pad_id) = self.inner.token_to_id(&eos) {
            self.inner.with_padding(Some(PaddingParams {
                pad_id,
                pad_token: eos.clone(),
                ..Default::default()
            }));
        }
        self.config.insert("pad_token".to_string(), Value::String(eos.clone()));
        if let Some(special) = self.special_tokens.as_mut() {
            special.insert("pad_token".to_string(), Value::String(eos.clone()));
        }
        info!(pad_token = %eos, "tokenizer has no pad token, using eos token");
        self.pad_token = Some(eos);
        true
    }

    /// Write `tokenizer.json`, `tokenizer_config.json` and (if present)
    /// `special_tokens_map.json` into `dir`.
    pub fn save(&self, dir: &Path) -> TrainingResult<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)?;

        let tokenizer_path = dir.join(TOKENIZER_FILE);
        self.inner
            .save(&tokenizer_path, false)
            .map_err(|e| TrainingError::Tokenizer(format!("failed to save {}: {e}", tokenizer_path.display())))?;

        let config_path = dir.join(TOKENIZER_CONFIG_FILE);
        std::fs::write(&config_path, serde_json::to_string_pretty(&self.config)?)?;

        let mut written = vec![tokenizer_path, config_path];
        if let Some(special) = &self.special_tokens {
            let special_path = dir.join(SPECIAL_TOKENS_MAP_FILE);
            std::fs::write(&special_path, serde_json::to_string_pretty(special)?)?;
            written.push(special_path);
        }
        Ok(written)
    }
}

/// Load the fast tokenizer of the model named by `spec` and apply the
/// padding fallback.
pub async fn acquire_tokenizer(spec: &ModelSpec, hub: &HubClient) -> TrainingResult<PreparedTokenizer> {
    let (tokenizer_file, config_file, special_file) = match ModelSource::resolve(spec) {
        ModelSource::Local(dir) => {
            let tokenizer_file = dir.join(TOKENIZER_FILE);
            if !tokenizer_file.is_file() {
                return Err(TrainingError::Tokenizer(format!(
                    "{} has no fast tokenizer ({TOKENIZER_FILE})",
                    dir.display()
                )));
            }
            let existing = |name: &str| Some(dir.join(name)).filter(|p| p.is_file());
            (tokenizer_file, existing(TOKENIZER_CONFIG_FILE), existing(SPECIAL_TOKENS_MAP_FILE))
        }
        ModelSource::Hub(repo) => {
            let listing = hub.list_files(&repo).await?;
            if !listing.iter().any(|f| f == TOKENIZER_FILE) {
                return Err(TrainingError::Tokenizer(format!(
                    "{} has no fast tokenizer ({TOKENIZER_FILE})",
                    repo.id
                )));
            }
            (
                hub.fetch(&repo, TOKENIZER_FILE).await?,
                hub.fetch_if_present(&repo, &listing, TOKENIZER_CONFIG_FILE).await?,
                hub.fetch_if_present(&repo, &listing, SPECIAL_TOKENS_MAP_FILE).await?,
            )
        }
    };

    let mut tokenizer =
        PreparedTokenizer::from_files(&tokenizer_file, config_file.as_deref(), special_file.as_deref())?;
    tokenizer.ensure_pad_token();
    Ok(tokenizer)
}
