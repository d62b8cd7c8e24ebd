//! Command-line interface definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "segscribe",
    version,
    about = "Segmented, crash-recoverable speech transcription",
    long_about = "Cuts long audio into overlapping segments, transcribes them \
                  concurrently against a remote backend, and stitches the \
                  transcripts back into one text. Interrupted runs can be resumed."
)]
pub struct Cli {
    /// Path to a config file (default: ~/.config/segscribe/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Transcribe a 16-bit mono WAV file
    Transcribe {
        /// Input WAV file
        file: PathBuf,

        /// Override the backend endpoint URL
        #[arg(long)]
        endpoint: Option<String>,

        /// Override the language code ("auto" for detection)
        #[arg(short, long)]
        language: Option<String>,

        /// Override the model name
        #[arg(short, long)]
        model: Option<String>,
    },

    /// List interrupted runs that can be resumed
    ListRecoverable,

    /// Resume an interrupted run from its recovery manifest
    Resume {
        /// Pipeline ID (see `segscribe list-recoverable`)
        pipeline_id: String,

        /// Also rerun segments that exhausted their attempts
        #[arg(long)]
        retry_failed: bool,
    },
}
