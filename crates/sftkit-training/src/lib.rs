//! sftkit training
//!
//! Supervised fine-tuning primitives for:
//! - Resolving run arguments (`SftArguments`)
//! - Acquiring models and tokenizers (`acquire_model`, `acquire_tokenizer`)
//! - Loading and formatting preference datasets
//! - Running trainer backends (`Trainer`, `ProcessTrainer`)
//! - Writing model cards, artifacts and manifests

pub mod args;
pub mod artifacts;
pub mod backends;
pub mod card;
pub mod dataset;
pub mod error;
pub mod formatting;
pub mod job;
pub mod layout;
pub mod model;
pub mod peft;
pub mod pipeline;
pub mod progress;
pub mod publish;
pub mod registry;
pub mod tokenizer;
pub mod trainer;

pub use args::{
    ChosenLayout, DatasetSpec, IntervalStrategy, ModelSpec, QuantType, SchedulerType, SftArguments, TorchDtype,
    TrainingConfig,
};
pub use artifacts::{ArtifactKind, TrainingArtifact, TrainingManifest, TrainingMetrics};
pub use backends::{ProcessTrainer, WorkerEvent};
pub use card::ModelCard;
pub use dataset::{DatasetId, DatasetSource, RawSplit, load_split};
pub use error::{TrainingError, TrainingResult};
pub use formatting::{ChosenTurns, format_example, format_rows};
pub use job::{TrainingJobId, TrainingJobSpec};
pub use layout::JobLayout;
pub use model::{DeviceMap, LoadOptions, LoadedModel, ModelLoader, QuantizationConfig, acquire_model, loader_for};
pub use peft::LoraConfig;
pub use pipeline::{SftRun, prepare_job, run_sft};
pub use progress::{ProgressEvent, ProgressSink, RecordingProgressSink, TracingProgressSink};
pub use registry::{ArchitectureRegistry, ModelFamily};
pub use tokenizer::{PreparedTokenizer, acquire_tokenizer};
pub use trainer::{TrainOutcome, Trainer};
