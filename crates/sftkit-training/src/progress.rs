use crate::job::TrainingJobId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started { job_id: TrainingJobId },
    Message { job_id: TrainingJobId, message: String },
    Step { job_id: TrainingJobId, step: u64, total: Option<u64>, loss: Option<f64>, learning_rate: Option<f64> },
    Evaluated { job_id: TrainingJobId, step: Option<u64>, metrics: BTreeMap<String, f64> },
    Checkpoint { job_id: TrainingJobId, step: Option<u64>, path: PathBuf },
    Finished { job_id: TrainingJobId },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

/// Logs every event through `tracing`.
#[derive(Debug, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { job_id } => info!(job = %job_id, "training started"),
            ProgressEvent::Message { job_id, message } => info!(job = %job_id, "{message}"),
            ProgressEvent::Step { job_id, step, total, loss, learning_rate } => {
                info!(job = %job_id, step, total, loss, learning_rate, "training step");
            }
            ProgressEvent::Evaluated { job_id, step, metrics } => {
                info!(job = %job_id, step, metrics = ?metrics, "evaluation");
            }
            ProgressEvent::Checkpoint { job_id, step, path } => {
                info!(job = %job_id, step, path = %path.display(), "checkpoint saved");
            }
            ProgressEvent::Finished { job_id } => info!(job = %job_id, "training finished"),
        }
    }
}

/// Keeps every event; handy for inspecting a finished run.
#[derive(Debug, Default)]
pub struct RecordingProgressSink {
    events: std::sync::Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgressSink {
    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ProgressSink for RecordingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
