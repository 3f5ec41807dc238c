//! Trainer backends.

pub mod process;

pub use process::{ProcessTrainer, WorkerEvent};
