//! Command line arguments backing the `tagscribe` binary.
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
  name = "tagscribe",
  about = "Tag document regions, transcribe pages with a vision-language model, and resolve region references",
  version
)]
pub struct Args {
  #[command(subcommand)]
  pub command: Commands,

  /// Only log warnings and errors
  #[arg(long, short = 'q', global = true, conflicts_with = "verbose")]
  pub quiet: bool,

  /// Log debug output
  #[arg(long, short = 'v', global = true)]
  pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
  /// Print version information
  Version,
  /// Transcribe every sample of a dataset and write JSON Lines records
  Run {
    /// Dataset directory containing images/ and labels/
    #[arg(long, short = 'd')]
    dataset: PathBuf,

    /// Configuration file (defaults apply when the default file is absent)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// JSON Lines file that records are appended to
    #[arg(long, short = 'o', default_value = "tagscribe.jsonl")]
    output: PathBuf,

    /// Process at most this many samples
    #[arg(long, short = 'n')]
    limit: Option<usize>,

    /// Samples processed in parallel
    #[arg(long, short = 'j')]
    concurrency: Option<usize>,

    /// Model identifier, overriding the config file
    #[arg(long, short = 'm')]
    model: Option<String>,

    /// Also write rendered pages and region crops under this directory
    #[arg(long)]
    save_images: Option<PathBuf>,
  },
  /// Draw tagged regions onto each page without calling the model
  Render {
    /// Dataset directory containing images/ and labels/
    #[arg(long, short = 'd')]
    dataset: PathBuf,

    /// Output directory for rendered pages and crops
    #[arg(long, short = 'o')]
    out: PathBuf,

    /// Configuration file for layout and render settings
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Render at most this many samples
    #[arg(long, short = 'n')]
    limit: Option<usize>,
  },
  /// Split a saved model response into its thinking and document parts
  Extract {
    /// File holding the raw model response
    response_file: PathBuf,

    /// Tag wrapping the final answer
    #[arg(long, short = 't')]
    answer_tag: Option<String>,
  },
}
