//! Trainer backend that runs an external training worker.
//!
//! The worker is started as
//! `<trainer_command...> train --job <job.json> --output <final_dir>` and
//! reports progress as JSON lines on stdout:
//!
//! ```text
//! {"event": "log", "step": 10, "total_steps": 100, "loss": 1.92, "learning_rate": 1.8e-5}
//! {"event": "eval", "step": 10, "metrics": {"eval_loss": 1.71}}
//! {"event": "checkpoint", "step": 50, "path": "checkpoint-50"}
//! {"event": "finished", "steps": 100, "train_loss": 1.41}
//! ```
//!
//! Any other stdout line is treated as plain log output. Both streams are
//! read as bytes, so output that is not valid UTF-8 is decoded lossily.

use crate::artifacts::{TrainingManifest, TrainingMetrics};
use crate::error::{TrainingError, TrainingResult};
use crate::job::TrainingJobSpec;
use crate::layout::JobLayout;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::publish;
use crate::trainer::{TrainOutcome, Trainer};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sftkit_hub::HubClient;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

const STDERR_TAIL_LINES: usize = 20;

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// One structured line of worker output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEvent {
    Log {
        step: u64,
        #[serde(default)]
        total_steps: Option<u64>,
        #[serde(default)]
        loss: Option<f64>,
        #[serde(default)]
        learning_rate: Option<f64>,
    },
    Eval {
        #[serde(default)]
        step: Option<u64>,
        #[serde(default)]
        metrics: BTreeMap<String, f64>,
    },
    Checkpoint {
        #[serde(default)]
        step: Option<u64>,
        path: PathBuf,
    },
    Finished {
        #[serde(default)]
        steps: Option<u64>,
        #[serde(default)]
        train_loss: Option<f64>,
    },
}

impl WorkerEvent {
    /// `None` for lines that are not worker events.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if !line.starts_with('{') {
            return None;
        }
        serde_json::from_str(line).ok()
    }
}

#[derive(Debug, Clone)]
pub struct ProcessTrainer {
    hub: HubClient,
}

impl ProcessTrainer {
    #[must_use]
    pub fn new(hub: HubClient) -> Self {
        Self { hub }
    }

    fn record(job: &TrainingJobSpec, event: WorkerEvent, metrics: &mut TrainingMetrics, progress: &dyn ProgressSink) {
        let job_id = job.job_id.clone();
        match event {
            WorkerEvent::Log { step, total_steps, loss, learning_rate } => {
                metrics.steps = Some(step);
                progress.on_event(ProgressEvent::Step { job_id, step, total: total_steps, loss, learning_rate });
            }
            WorkerEvent::Eval { step, metrics: values } => {
                if let Some(loss) = values.get("eval_loss") {
                    metrics.eval_loss = Some(*loss);
                }
                progress.on_event(ProgressEvent::Evaluated { job_id, step, metrics: values });
            }
            WorkerEvent::Checkpoint { step, path } => {
                progress.on_event(ProgressEvent::Checkpoint { job_id, step, path });
            }
            WorkerEvent::Finished { steps, train_loss } => {
                if steps.is_some() {
                    metrics.steps = steps;
                }
                metrics.train_loss = train_loss;
            }
        }
    }
}

#[async_trait]
impl Trainer for ProcessTrainer {
    fn id(&self) -> &'static str {
        "process"
    }

    async fn train(&self, job: &TrainingJobSpec, progress: &dyn ProgressSink) -> TrainingResult<TrainOutcome> {
        job.validate()?;

        let layout = JobLayout::for_output_dir(&job.training.output_dir);
        layout.ensure_job_dirs(&job.job_id)?;
        let job_file = layout.job_file_path(&job.job_id);
        let final_dir = layout.final_dir(&job.job_id);
        job.write(&job_file)?;

        let argv = job.training.trainer_argv();
        let (program, leading) = argv
            .split_first()
            .ok_or_else(|| TrainingError::InvalidSpec("trainer_command must not be empty".to_string()))?;

        let mut child = Command::new(program)
            .args(leading)
            .arg("train")
            .arg("--job")
            .arg(&job_file)
            .arg("--output")
            .arg(&final_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TrainingError::Trainer(format!("failed to start '{program}': {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TrainingError::Trainer("worker stdout unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TrainingError::Trainer("worker stderr unavailable".to_string()))?;

        let stderr_task = tokio::spawn(async move {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            let mut segments = BufReader::new(stderr).split(b'\n');
            loop {
                match segments.next_segment().await {
                    Ok(Some(raw)) => {
                        let line = decode_line(&raw);
                        debug!(target: "sftkit::worker", "{line}");
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "failed to read worker stderr");
                        break;
                    }
                }
            }
            tail
        });

        progress.on_event(ProgressEvent::Started { job_id: job.job_id.clone() });

        let mut metrics = TrainingMetrics::default();
        let mut finished = false;
        let mut segments = BufReader::new(stdout).split(b'\n');
        while let Some(raw) = segments.next_segment().await? {
            let line = decode_line(&raw);
            match WorkerEvent::parse(&line) {
                Some(event) => {
                    finished |= matches!(event, WorkerEvent::Finished { .. });
                    Self::record(job, event, &mut metrics, progress);
                }
                None if line.trim().is_empty() => {}
                None => progress.on_event(ProgressEvent::Message { job_id: job.job_id.clone(), message: line }),
            }
        }

        let status = child.wait().await?;
        let tail = stderr_task
            .await
            .map_err(|e| TrainingError::Trainer(format!("stderr reader failed: {e}")))?;

        if !status.success() {
            let tail = Vec::from(tail).join("\n");
            return Err(TrainingError::Trainer(format!("worker '{program}' exited with {status}\n{tail}")));
        }
        if !finished {
            warn!(job = %job.job_id, "worker exited without a finished event");
        }

        progress.on_event(ProgressEvent::Finished { job_id: job.job_id.clone() });
        Ok(TrainOutcome { final_dir, metrics })
    }

    async fn save_model(
        &self,
        job: &TrainingJobSpec,
        outcome: &TrainOutcome,
        output_dir: &Path,
    ) -> TrainingResult<TrainingManifest> {
        publish::save_outputs(job, &outcome.final_dir, output_dir, &outcome.metrics)
    }

    async fn push_to_hub(&self, job: &TrainingJobSpec, output_dir: &Path, dataset_name: &str) -> TrainingResult<String> {
        publish::push_output_dir(&self.hub, job, output_dir, dataset_name).await
    }
}
