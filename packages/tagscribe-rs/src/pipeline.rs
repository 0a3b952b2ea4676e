//! Per-sample orchestration: layout, render, model call, response parsing and
//! reference resolution, fanned out over a dataset with bounded concurrency.
use crate::cancel::CancelSignal;
use crate::client::{InvokeError, ResilientModelClient};
use crate::config::{Config, ConfigError, Prompts};
use crate::dataset::{ImageLabelDataset, Sample};
use crate::response_parser::{extract_response, resolve_to_coordinates, resolve_to_urls, ResolveStatus};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tagscribe_vision::{
    assign_regions, parse_labels, CroppedRegion, EncodedImage, GenerationConfig, LayoutConfig, ModelRequest,
    NormalizedBbox, Region, RegionRenderer, RenderOptions, RenderedImage,
};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

pub const RENDERED_DIR: &str = "rendered";
pub const CROPS_DIR: &str = "crops";

/// Everything the orchestrator needs besides the model client.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub model_id: String,
    /// Classes of interest. Empty keeps every class.
    pub classes: Vec<u32>,
    pub layout: LayoutConfig,
    pub render: RenderOptions,
    pub generation: GenerationConfig,
    pub jpeg_quality: u8,
    pub answer_tag: String,
    pub prompts: Prompts,
    pub concurrency: usize,
    /// When set, rendered pages and crops are written here.
    pub save_images: Option<PathBuf>,
}

impl PipelineOptions {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            model_id: config.model.model_id.clone(),
            classes: config.layout.classes.clone(),
            layout: config.layout_config(),
            render: config.render_options(),
            generation: config.generation_config(),
            jpeg_quality: config.model.jpeg_quality.clamp(1, 100),
            answer_tag: config.pipeline.answer_tag.clone(),
            prompts: config.prompts()?,
            concurrency: config.pipeline.concurrency.max(1),
            save_images: None,
        })
    }
}

/// Layout and rendering output for one page, before any model call.
#[derive(Debug, Clone)]
pub struct PreparedSample {
    pub regions: Vec<Region>,
    pub rendered: RenderedImage,
    pub crops: Vec<CroppedRegion>,
}

impl PreparedSample {
    pub fn has_regions(&self) -> bool {
        !self.regions.is_empty()
    }
}

/// Parses the sample's labels, orders them into tagged regions and renders
/// the tags. A page without regions of interest is passed through untouched.
pub fn prepare_sample(
    sample: &Sample,
    classes: &[u32],
    layout: &LayoutConfig,
    renderer: &RegionRenderer,
) -> PreparedSample {
    let (width, height) = sample.image.dimensions();
    let boxes = parse_labels(&sample.raw_label, width, height, classes);
    let regions = assign_regions(&boxes, layout);

    if regions.is_empty() {
        return PreparedSample {
            regions,
            rendered: RenderedImage {
                image: sample.image.clone(),
                labels: Vec::new(),
            },
            crops: Vec::new(),
        };
    }

    for region in regions.iter().filter(|r| r.is_degenerate()) {
        debug!(sample = sample.index, tag = %region.tag, "region has zero area after clamping");
    }
    let (rendered, crops) = renderer.render(&sample.image, &regions);
    PreparedSample {
        regions,
        rendered,
        crops,
    }
}

/// Writes `rendered/sample_<idx>.png` and `crops/sample_<idx>_<tag>.png`
/// under `dir`. Returns tag to crop path, relative to `dir`.
pub fn save_artifacts(dir: &Path, index: usize, prepared: &PreparedSample) -> Result<HashMap<String, String>> {
    let rendered_dir = dir.join(RENDERED_DIR);
    let crops_dir = dir.join(CROPS_DIR);
    std::fs::create_dir_all(&rendered_dir).with_context(|| format!("failed to create {}", rendered_dir.display()))?;
    std::fs::create_dir_all(&crops_dir).with_context(|| format!("failed to create {}", crops_dir.display()))?;

    let page = rendered_dir.join(format!("sample_{index}.png"));
    prepared
        .rendered
        .image
        .save(&page)
        .with_context(|| format!("failed to write {}", page.display()))?;

    let mut links = HashMap::with_capacity(prepared.crops.len());
    for crop in &prepared.crops {
        let file = format!("sample_{index}_{}.png", crop.tag);
        let path = crops_dir.join(&file);
        crop.image
            .save(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        links.insert(crop.tag.clone(), format!("{CROPS_DIR}/{file}"));
    }
    Ok(links)
}

/// One region as persisted in a [`SampleRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionRecord {
    pub tag: String,
    pub class_id: u32,
    /// Pixel box `[x1, y1, x2, y2]`.
    pub bbox: [u32; 4],
    pub normalized_bbox: NormalizedBbox,
    pub degenerate: bool,
    pub label_overflow: bool,
}

/// The document with references rewritten to saved crop paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedDocument {
    pub text: String,
    pub status: ResolveStatus,
}

/// One line of the JSONL output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub sample_index: usize,
    pub sample_name: String,
    pub image_width: u32,
    pub image_height: u32,
    pub regions: Vec<RegionRecord>,
    pub thinking: String,
    pub final_text: String,
    /// False when the answer container was missing and `final_text` came
    /// from the raw response.
    pub answer_found: bool,
    pub crop_tags: Vec<String>,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked: Option<LinkedDocument>,
    pub generated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleFailure {
    pub sample_index: usize,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub processed: usize,
    pub failed: Vec<SampleFailure>,
    /// Samples not finished because the run was cancelled.
    pub cancelled: usize,
}

enum Outcome {
    Done(Box<SampleRecord>),
    Failed(anyhow::Error),
    Cancelled,
}

fn region_records(prepared: &PreparedSample, width: u32, height: u32) -> Vec<RegionRecord> {
    let overflowed: HashMap<&str, bool> = prepared
        .rendered
        .labels
        .iter()
        .map(|l| (l.tag.as_str(), l.overflow))
        .collect();
    prepared
        .regions
        .iter()
        .map(|r| RegionRecord {
            tag: r.tag.clone(),
            class_id: r.bbox.class_id,
            bbox: [r.bbox.x1, r.bbox.y1, r.bbox.x2, r.bbox.y2],
            normalized_bbox: r.bbox.normalized(width, height),
            degenerate: r.is_degenerate(),
            label_overflow: overflowed.get(r.tag.as_str()).copied().unwrap_or(false),
        })
        .collect()
}

#[derive(Clone)]
pub struct PipelineOrchestrator {
    client: Arc<ResilientModelClient>,
    renderer: Arc<RegionRenderer>,
    options: Arc<PipelineOptions>,
}

impl PipelineOrchestrator {
    pub fn new(client: ResilientModelClient, options: PipelineOptions) -> Self {
        let renderer = RegionRenderer::new(options.render.clone());
        Self {
            client: Arc::new(client),
            renderer: Arc::new(renderer),
            options: Arc::new(options),
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Runs one sample end to end. Only a failed model call (or an IO error
    /// while saving artifacts) is an error; parse and render issues are
    /// recorded on the returned record.
    pub async fn process_sample(&self, sample: Sample, cancel: &CancelSignal) -> Result<SampleRecord> {
        let index = sample.index;
        let name = sample.name.clone();
        let (width, height) = sample.image.dimensions();

        let this = self.clone();
        let (prepared, encoded, links) = tokio::task::spawn_blocking(move || -> Result<_> {
            let opts = &this.options;
            let prepared = prepare_sample(&sample, &opts.classes, &opts.layout, &this.renderer);
            let encoded = EncodedImage::jpeg(&prepared.rendered.image, opts.jpeg_quality)
                .context("failed to encode page as JPEG")?;
            let links = match &opts.save_images {
                Some(dir) => Some(save_artifacts(dir, sample.index, &prepared)?),
                None => None,
            };
            Ok((prepared, encoded, links))
        })
        .await
        .context("render task panicked")??;

        let prompt = if prepared.has_regions() {
            &self.options.prompts.with_regions
        } else {
            &self.options.prompts.without_regions
        };
        let request = ModelRequest {
            model_id: self.options.model_id.clone(),
            image: encoded,
            prompt: prompt.clone(),
            config: self.options.generation.clone(),
        };

        debug!(sample = index, regions = prepared.regions.len(), "invoking model");
        let invocation = self.client.invoke_traced(&request, cancel).await?;

        let extracted = extract_response(&invocation.text, &self.options.answer_tag);
        let answer_found = extracted.document.is_some();
        if !answer_found {
            warn!(sample = index, "no answer block in response; using raw text");
        }
        let document = extracted.document.unwrap_or_else(|| invocation.text.clone());

        let regions = region_records(&prepared, width, height);
        let (final_text, linked) = if prepared.has_regions() {
            let coordinates: HashMap<String, NormalizedBbox> =
                regions.iter().map(|r| (r.tag.clone(), r.normalized_bbox)).collect();
            let linked = links.map(|links| {
                let (text, status) = resolve_to_urls(&document, &links);
                if status == ResolveStatus::PartialOrMissing {
                    warn!(sample = index, "response references do not match the saved crops one to one");
                }
                LinkedDocument { text, status }
            });
            (resolve_to_coordinates(&document, &coordinates), linked)
        } else {
            (document, None)
        };

        info!(sample = index, attempts = invocation.attempts, regions = regions.len(), "sample processed");
        Ok(SampleRecord {
            sample_index: index,
            sample_name: name,
            image_width: width,
            image_height: height,
            regions,
            thinking: extracted.thinking,
            final_text,
            answer_found,
            crop_tags: prepared.crops.iter().map(|c| c.tag.clone()).collect(),
            attempts: invocation.attempts,
            linked,
            generated_at: Utc::now().to_rfc3339(),
        })
    }

    /// Processes every dataset entry with at most `concurrency` samples in
    /// flight. Records are handed to `on_record` in dataset order. A failing
    /// sample is logged and listed in the summary; only an `on_record` error
    /// aborts the run.
    pub async fn run<F>(&self, dataset: &ImageLabelDataset, cancel: &CancelSignal, mut on_record: F) -> Result<RunSummary>
    where
        F: FnMut(&SampleRecord) -> Result<()>,
    {
        info!(samples = dataset.len(), concurrency = self.options.concurrency, "starting run");
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));

        let mut tasks = Vec::with_capacity(dataset.len());
        for entry in dataset.iter() {
            let index = entry.index;
            let entry = entry.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let this = self.clone();

            let task = tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return Outcome::Cancelled;
                };
                if cancel.is_cancelled() {
                    return Outcome::Cancelled;
                }

                let loaded = {
                    let entry = entry.clone();
                    tokio::task::spawn_blocking(move || entry.load()).await
                };
                let sample = match loaded {
                    Ok(Ok(sample)) => sample,
                    Ok(Err(e)) => return Outcome::Failed(e),
                    Err(e) => return Outcome::Failed(anyhow::anyhow!("loader panicked: {e}")),
                };

                match this.process_sample(sample, &cancel).await {
                    Ok(record) => Outcome::Done(Box::new(record)),
                    Err(e) if matches!(e.downcast_ref::<InvokeError>(), Some(InvokeError::Cancelled)) => {
                        Outcome::Cancelled
                    }
                    Err(e) => Outcome::Failed(e),
                }
            });
            tasks.push((index, task));
        }

        let mut summary = RunSummary::default();
        let mut tasks = tasks.into_iter();
        while let Some((index, task)) = tasks.next() {
            let outcome = task
                .await
                .unwrap_or_else(|e| Outcome::Failed(anyhow::anyhow!("sample task panicked: {e}")));
            match outcome {
                Outcome::Done(record) => {
                    if let Err(e) = on_record(&record) {
                        let pending: Vec<_> = tasks.collect();
                        warn!(sample = index, pending = pending.len(), "record sink failed, aborting run");
                        for (_, task) in pending {
                            task.abort();
                        }
                        return Err(e);
                    }
                    summary.processed += 1;
                }
                Outcome::Failed(e) => {
                    let message = format!("{e:#}");
                    error!(sample = index, error = %message, "sample failed");
                    summary.failed.push(SampleFailure {
                        sample_index: index,
                        error: message,
                    });
                }
                Outcome::Cancelled => summary.cancelled += 1,
            }
        }

        info!(
            processed = summary.processed,
            failed = summary.failed.len(),
            cancelled = summary.cancelled,
            "run finished"
        );
        Ok(summary)
    }
}
