//! sftkit CLI - supervised fine-tuning launcher
//!
//! Provides the `sftkit` command: resolve run arguments, stage the model,
//! tokenizer and formatted dataset, hand them to a training worker, then save
//! and optionally publish the result.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use commands::sft::{self, SftCommand};

/// sftkit - supervised fine-tuning for causal and image-text language models
#[derive(Parser, Debug)]
#[command(name = "sftkit", author, version, about = "Supervised fine-tuning launcher")]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fine-tune a model on the `chosen` conversations of a dataset
    ///
    /// Arguments are layered: defaults, then `--config`, then SFTKIT_<KEY>
    /// environment variables, then flags.
    Sft(Box<SftCommand>),
}

fn parse_level(name: &str) -> Level {
    match name {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --log-level when set
    let level = parse_level(&args.log_level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::Sft(command) => sft::execute(*command).await,
    }
}
