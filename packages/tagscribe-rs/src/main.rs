mod cli;

use anyhow::{bail, Context, Result};
use clap::Parser;
use cli::{Args, Commands};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tagscribe::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(quiet: bool, verbose: bool) {
  let level = if quiet {
    "warn"
  } else if verbose {
    "debug"
  } else {
    "info"
  };
  let default = format!("tagscribe={level},tagscribe_vision={level}");
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
    .with_writer(std::io::stderr)
    .init();
}

/// An explicitly named config file must exist; the default one is optional.
fn read_config(path: Option<PathBuf>) -> Result<Config> {
  let config = match path {
    Some(path) => load_config(&path, true)?,
    None => load_config(Path::new(DEFAULT_CONFIG_FILE), false)?,
  };
  Ok(config)
}

fn open_dataset(dir: &Path, limit: Option<usize>) -> Result<ImageLabelDataset> {
  let mut dataset = ImageLabelDataset::open(dir)?;
  if let Some(limit) = limit {
    dataset.truncate(limit);
  }
  Ok(dataset)
}

async fn run_command(
  dataset: PathBuf,
  config: Option<PathBuf>,
  output: PathBuf,
  limit: Option<usize>,
  concurrency: Option<usize>,
  model: Option<String>,
  save_images: Option<PathBuf>,
) -> Result<()> {
  let mut config = read_config(config)?;
  if let Some(model) = model {
    config.model.model_id = model;
  }
  if let Some(concurrency) = concurrency {
    config.pipeline.concurrency = concurrency;
  }

  let keys = resolve_api_keys(&config, |name| std::env::var(name).ok());
  let pool = CredentialPool::new(keys);
  if pool.is_empty() {
    bail!("no API keys configured; set {ENV_API_KEYS} or {ENV_API_KEY}, or [model].api_keys");
  }
  info!(credentials = pool.len(), model = %config.model.model_id, "model client ready");

  let engine = GeminiEngine::new(config.model.endpoint.clone(), config.request_timeout())
    .context("failed to build HTTP client")?;
  let client = ResilientModelClient::new(Arc::new(engine), Arc::new(pool), config.retry_policy());

  let mut options = PipelineOptions::from_config(&config)?;
  options.save_images = save_images;
  let orchestrator = PipelineOrchestrator::new(client, options);

  let dataset = open_dataset(&dataset, limit)?;

  let file = std::fs::OpenOptions::new()
    .create(true)
    .append(true)
    .open(&output)
    .with_context(|| format!("failed to open {}", output.display()))?;
  let mut writer = std::io::BufWriter::new(file);

  let (handle, signal) = cancel_pair();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      warn!("interrupt received, cancelling in-flight samples");
      handle.cancel();
    }
  });

  let summary = orchestrator
    .run(&dataset, &signal, |record| {
      serde_json::to_writer(&mut writer, record)?;
      writer.write_all(b"\n")?;
      writer.flush()?;
      Ok(())
    })
    .await?;

  println!("{}", serde_json::to_string_pretty(&summary)?);
  Ok(())
}

async fn render_command(dataset: PathBuf, out: PathBuf, config: Option<PathBuf>, limit: Option<usize>) -> Result<()> {
  let config = read_config(config)?;
  let dataset = open_dataset(&dataset, limit)?;

  let rendered = tokio::task::spawn_blocking(move || -> Result<usize> {
    let renderer = RegionRenderer::new(config.render_options());
    let layout = config.layout_config();
    for entry in dataset.iter() {
      let sample = entry.load()?;
      let prepared = prepare_sample(&sample, &config.layout.classes, &layout, &renderer);
      save_artifacts(&out, sample.index, &prepared)?;
      info!(sample = sample.index, name = %sample.name, regions = prepared.regions.len(), "rendered");
    }
    Ok(dataset.len())
  })
  .await
  .context("render task panicked")??;

  println!("{}", serde_json::json!({ "rendered": rendered }));
  Ok(())
}

fn extract_command(response_file: PathBuf, answer_tag: Option<String>) -> Result<()> {
  let raw = std::fs::read_to_string(&response_file)
    .with_context(|| format!("failed to read {}", response_file.display()))?;
  let tag = answer_tag.as_deref().unwrap_or(DEFAULT_ANSWER_TAG);
  let extracted = extract_response(&raw, tag);
  println!("{}", serde_json::to_string_pretty(&extracted)?);
  Ok(())
}

#[tokio::main]
async fn main() {
  let args = Args::parse();
  init_tracing(args.quiet, args.verbose);

  let result = match args.command {
    Commands::Version => {
      println!("tagscribe {}", env!("CARGO_PKG_VERSION"));
      Ok(())
    }
    Commands::Run {
      dataset,
      config,
      output,
      limit,
      concurrency,
      model,
      save_images,
    } => run_command(dataset, config, output, limit, concurrency, model, save_images).await,
    Commands::Render {
      dataset,
      out,
      config,
      limit,
    } => render_command(dataset, out, config, limit).await,
    Commands::Extract {
      response_file,
      answer_tag,
    } => extract_command(response_file, answer_tag),
  };

  if let Err(e) = result {
    eprintln!("Error: {e:#}");
    std::process::exit(1);
  }
}
