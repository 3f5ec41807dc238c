//! Argument resolution for `sftkit sft`.
//!
//! Precedence, lowest to highest:
//! 1. Record defaults
//! 2. Config file (`--config`, YAML/TOML/JSON by extension)
//! 3. Environment variables (`SFTKIT_<KEY>`)
//! 4. CLI flags

use anyhow::{Context, Result, bail};
use config::{Config, Environment, File, FileFormat, Source};
use serde_json::{Map, Value};
use sftkit_training::{DatasetSpec, ModelSpec, SftArguments, TrainingConfig};
use std::collections::BTreeSet;
use std::path::Path;

pub const ENV_PREFIX: &str = "SFTKIT";

/// List-valued keys split on `,` when read from the environment.
const LIST_KEYS: &[&str] = &["lora_target_modules", "lora_modules_to_save"];

fn environment(source: Option<config::Map<String, String>>) -> Environment {
    LIST_KEYS
        .iter()
        .fold(
            Environment::with_prefix(ENV_PREFIX).try_parsing(true).list_separator(","),
            |env, key| env.with_list_parse_key(key),
        )
        .source(source)
}

fn check_keys(config: &Config) -> Result<()> {
    let known = SftArguments::known_keys()?;
    let policy: BTreeSet<&str> =
        TrainingConfig::POLICY_KEYS.iter().chain(ModelSpec::POLICY_KEYS).copied().collect();

    let present = config.collect().context("failed to read configuration")?;
    let mut unknown = Vec::new();
    for key in present.keys() {
        if policy.contains(key.as_str()) {
            bail!("'{key}' is fixed by policy and cannot be configured");
        }
        if !known.contains(key) {
            unknown.push(key.clone());
        }
    }

    if !unknown.is_empty() {
        unknown.sort();
        bail!("unknown configuration keys: {}", unknown.join(", "));
    }
    Ok(())
}

/// Layer the sources and deserialize the three records.
pub fn resolve_with_env(
    config_file: Option<&Path>,
    env: Option<config::Map<String, String>>,
    overrides: &Map<String, Value>,
) -> Result<SftArguments> {
    let mut builder = Config::builder();
    if let Some(path) = config_file {
        if !path.is_file() {
            bail!("config file not found: {}", path.display());
        }
        builder = builder.add_source(File::from(path));
    }
    builder = builder.add_source(environment(env));
    if !overrides.is_empty() {
        let json = serde_json::to_string(overrides)?;
        builder = builder.add_source(File::from_str(&json, FileFormat::Json));
    }

    let config = builder.build().context("failed to load configuration")?;
    check_keys(&config)?;

    let dataset: DatasetSpec = config.clone().try_deserialize().context("invalid dataset arguments")?;
    let training: TrainingConfig = config.clone().try_deserialize().context("invalid training arguments")?;
    let model: ModelSpec = config.try_deserialize().context("invalid model arguments")?;

    let args = SftArguments { dataset, training, model };
    args.validate()?;
    Ok(args)
}

/// Resolve against the process environment.
pub fn resolve(config_file: Option<&Path>, overrides: &Map<String, Value>) -> Result<SftArguments> {
    resolve_with_env(config_file, None, overrides)
}
