//! # tagscribe
//!
//! Annotated-region transcription for scanned document pages.
//!
//! ## Features
//!
//! - **Region tagging**: order raw detection boxes into reading order and tag them `IM1..IMn`
//! - **Rendering**: draw translucent tagged boxes so a vision-language model can cite regions
//! - **Resilient model calls**: rotate API keys and back off on rate limits and transient failures
//! - **Response parsing**: split out the thinking block and answer document, then resolve
//!   `<graphic tag="IMx"/>` references to URLs or normalized coordinates
//! - **Batch pipeline**: bounded-concurrency runs over an image/label dataset with JSON Lines output
//!
//! ## Quick Start
//!
//! ```ignore
//! use tagscribe::prelude::*;
//!
//! let extracted = extract_response(raw_text, DEFAULT_ANSWER_TAG);
//! let document = extracted.document.unwrap_or_else(|| raw_text.to_string());
//!
//! let coords = HashMap::from([("IM1".to_string(), NormalizedBbox([400, 400, 600, 600]))]);
//! let text = resolve_to_coordinates(&document, &coords);
//! ```

pub mod cancel;
pub mod client;
pub mod config;
pub mod credentials;
pub mod dataset;
pub mod gemini;
pub mod pipeline;
pub mod prompts;
pub mod response_parser;

// Re-export commonly used types at the root level
pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use client::{Backoff, InvokeError, Invocation, ResilientModelClient, RetryBudget, RetryEvent, RetryPolicy, RetryReason};
pub use config::{
    load_config, parse_config, resolve_api_keys, Config, ConfigError, Prompts, DEFAULT_CONFIG_FILE, ENV_API_KEY,
    ENV_API_KEYS,
};
pub use credentials::{Credential, CredentialPool};
pub use dataset::{DatasetEntry, ImageLabelDataset, Sample};
pub use gemini::GeminiEngine;
pub use pipeline::{
    prepare_sample, save_artifacts, LinkedDocument, PipelineOptions, PipelineOrchestrator, PreparedSample,
    RegionRecord, RunSummary, SampleFailure, SampleRecord,
};
pub use response_parser::{
    extract_and_remove_thinking_block, extract_response, find_last_tag_block, normalize_tag, referenced_tags,
    resolve_to_coordinates, resolve_to_urls, ExtractedResponse, ResolveStatus, DEFAULT_ANSWER_TAG,
};
pub use tagscribe_vision;

/// Prelude module for convenient imports
///
/// Import everything you need with:
/// ```ignore
/// use tagscribe::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        cancel_pair, extract_response, load_config, prepare_sample, resolve_api_keys, resolve_to_coordinates,
        resolve_to_urls, save_artifacts, CancelHandle, CancelSignal, Config, CredentialPool, ExtractedResponse,
        GeminiEngine, ImageLabelDataset, InvokeError, PipelineOptions, PipelineOrchestrator, ResilientModelClient,
        ResolveStatus, RetryPolicy, RunSummary, Sample, SampleRecord, DEFAULT_ANSWER_TAG, DEFAULT_CONFIG_FILE,
        ENV_API_KEY, ENV_API_KEYS,
    };
    pub use tagscribe_vision::{
        assign_regions, parse_labels, BoundingBox, ModelError, ModelRequest, NormalizedBbox, Region, RegionRenderer,
        VisionModel,
    };
}
