//! Integration tests for the `sftkit sft` command.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const TOKENIZER_JSON: &str = r#"{
    "version": "1.0",
    "truncation": null,
    "padding": null,
    "added_tokens": [],
    "normalizer": null,
    "pre_tokenizer": { "type": "Whitespace" },
    "post_processor": null,
    "decoder": null,
    "model": { "type": "WordLevel", "vocab": { "<unk>": 0, "</s>": 1, "hello": 2 }, "unk_token": "<unk>" }
}"#;

const ROWS: &str = concat!(
    r#"{"chosen": [{"role": "user", "content": "Hi"}, {"role": "assistant", "content": "Hello!"}]}"#,
    "\n",
    r#"{"chosen": [[{"content": "A"}, {"content": "B"}], [{"content": "C"}, {"content": "D"}]]}"#,
    "\n"
);

/// A local model directory and dataset file.
fn fixture(temp: &TempDir, architecture: &str) -> (PathBuf, PathBuf) {
    let model = temp.path().join("model");
    std::fs::create_dir_all(&model).unwrap();
    std::fs::write(model.join("config.json"), format!(r#"{{"architectures": ["{architecture}"]}}"#)).unwrap();
    std::fs::write(model.join("model.safetensors"), b"base weights").unwrap();
    std::fs::write(model.join("tokenizer.json"), TOKENIZER_JSON).unwrap();
    std::fs::write(model.join("tokenizer_config.json"), r#"{"eos_token": "</s>"}"#).unwrap();

    let data = temp.path().join("prefs.jsonl");
    std::fs::write(&data, ROWS).unwrap();
    (model, data)
}

fn sftkit(temp: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("sftkit").unwrap();
    cmd.current_dir(temp.path())
        .env("HF_HOME", temp.path().join("hf"))
        .env_remove("HF_TOKEN")
        .env_remove("RUST_LOG");
    cmd
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

#[test]
fn test_sft_help_lists_record_flags() {
    let temp = TempDir::new().unwrap();
    sftkit(&temp)
        .arg("sft")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--dataset-name"))
        .stdout(predicate::str::contains("--learning-rate"))
        .stdout(predicate::str::contains("--load-in-4bit"))
        .stdout(predicate::str::contains("--dry-run"))
        .stdout(predicate::str::contains("--report-to").not())
        .stdout(predicate::str::contains("--use-cache").not());
}

#[test]
fn test_sft_requires_dataset_and_model() {
    let temp = TempDir::new().unwrap();
    sftkit(&temp)
        .arg("sft")
        .arg("--model-name-or-path")
        .arg("org/model")
        .assert()
        .failure()
        .stderr(predicate::str::contains("dataset_name is required"));
}

#[test]
fn test_sft_rejects_invalid_learning_rate() {
    let temp = TempDir::new().unwrap();
    sftkit(&temp)
        .args(["sft", "--dataset-name", "org/prefs", "--model-name-or-path", "org/model"])
        .args(["--learning-rate", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("learning_rate must be > 0"));
}

#[test]
fn test_sft_rejects_unknown_config_keys() {
    let temp = TempDir::new().unwrap();
    let config = temp.path().join("sft.yaml");
    std::fs::write(&config, "dataset_name: org/prefs\nmodel_name_or_path: org/model\nlerning_rate: 0.1\n").unwrap();

    sftkit(&temp)
        .arg("sft")
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("lerning_rate"));
}

#[test]
fn test_sft_dry_run_prints_job() {
    let temp = TempDir::new().unwrap();
    let (model, data) = fixture(&temp, "LlamaForCausalLM");
    let out = temp.path().join("out");

    let assert = sftkit(&temp)
        .arg("sft")
        .args(["--model-name-or-path", &path_arg(&model)])
        .args(["--dataset-name", &path_arg(&data)])
        .args(["--output-dir", &path_arg(&out)])
        .args(["--load-in-4bit", "--use-peft"])
        .arg("--dry-run")
        .env("LOCAL_RANK", "1")
        .assert()
        .success();

    let job: serde_json::Value = serde_json::from_slice(&assert.get_output().stdout).unwrap();
    assert_eq!(job["train_examples"], 3);
    assert_eq!(job["training"]["report_to"], serde_json::json!([]));
    assert_eq!(job["model"]["load_options"]["use_cache"], false);
    assert_eq!(job["model"]["load_options"]["device_map"], serde_json::json!({ "": 1 }));
    assert_eq!(job["peft"]["r"], 16);

    let train = job["train_dataset"].as_str().unwrap();
    let first = std::fs::read_to_string(train).unwrap();
    assert!(first.starts_with(r####"{"text":"### User: Hi\n\n### Assistant: Hello!"}"####), "{first}");
    assert!(!out.join("README.md").exists());
}

#[test]
fn test_sft_dry_run_image_text_model_omits_cache_option() {
    let temp = TempDir::new().unwrap();
    let (model, data) = fixture(&temp, "LlavaForConditionalGeneration");

    let assert = sftkit(&temp)
        .arg("sft")
        .args(["--model-name-or-path", &path_arg(&model)])
        .args(["--dataset-name", &path_arg(&data)])
        .args(["--output-dir", &path_arg(&temp.path().join("out"))])
        .arg("--dry-run")
        .assert()
        .success();

    let job: serde_json::Value = serde_json::from_slice(&assert.get_output().stdout).unwrap();
    assert_eq!(job["model"]["family"], "image_text_to_text");
    assert!(job["model"]["load_options"].get("use_cache").is_none());
    assert_eq!(job["model"]["load_options"]["device_map"], "auto");
}

#[cfg(unix)]
#[test]
fn test_sft_runs_worker_and_saves_model() {
    let temp = TempDir::new().unwrap();
    let (model, data) = fixture(&temp, "LlamaForCausalLM");
    let out = temp.path().join("out");

    let worker = temp.path().join("worker.sh");
    std::fs::write(
        &worker,
        r#"out="$5"
mkdir -p "$out"
echo '{"event": "log", "step": 1, "total_steps": 1, "loss": 2.0}'
printf 'tuned' > "$out/model.safetensors"
echo '{"event": "finished", "steps": 1, "train_loss": 2.0}'
"#,
    )
    .unwrap();

    let assert = sftkit(&temp)
        .arg("sft")
        .args(["--model-name-or-path", &path_arg(&model)])
        .args(["--dataset-name", &path_arg(&data)])
        .args(["--output-dir", &path_arg(&out)])
        .args(["--trainer-command", &format!("sh {}", worker.display())])
        .arg("--json")
        .assert()
        .success();

    let manifest: serde_json::Value = serde_json::from_slice(&assert.get_output().stdout).unwrap();
    assert_eq!(manifest["metrics"]["steps"], 1);
    assert_eq!(manifest["family"], "causal_lm");

    assert_eq!(std::fs::read(out.join("model.safetensors")).unwrap(), b"tuned");
    assert!(out.join("tokenizer.json").is_file());
    assert!(out.join("training_manifest.json").is_file());
    let card = std::fs::read_to_string(out.join("README.md")).unwrap();
    assert!(card.contains(&path_arg(&data)));
}

#[cfg(unix)]
#[test]
fn test_sft_reports_worker_failure() {
    let temp = TempDir::new().unwrap();
    let (model, data) = fixture(&temp, "LlamaForCausalLM");
    let worker = temp.path().join("worker.sh");
    std::fs::write(&worker, "echo 'worker crashed' >&2\nexit 1\n").unwrap();

    sftkit(&temp)
        .arg("sft")
        .args(["--model-name-or-path", &path_arg(&model)])
        .args(["--dataset-name", &path_arg(&data)])
        .args(["--output-dir", &path_arg(&temp.path().join("out"))])
        .args(["--trainer-command", &format!("sh {}", worker.display())])
        .assert()
        .failure()
        .stderr(predicate::str::contains("worker crashed"));
}
