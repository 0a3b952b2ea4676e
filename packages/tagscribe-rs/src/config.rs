//! `tagscribe.toml` configuration. Every field has a default, so a missing
//! file or a partial one is valid.
use crate::client::RetryPolicy;
use crate::gemini::DEFAULT_ENDPOINT;
use crate::prompts::{render_prompt, PROMPT_WITHOUT_REGIONS, PROMPT_WITH_REGIONS};
use crate::response_parser::DEFAULT_ANSWER_TAG;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tagscribe_vision::{GenerationConfig, LayoutConfig, RenderOptions, DEFAULT_ROW_THRESHOLD};
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "tagscribe.toml";
pub const DEFAULT_MODEL_ID: &str = "gemini-3-flash-preview";

/// Comma-separated list of keys; wins over everything else.
pub const ENV_API_KEYS: &str = "GEMINI_API_KEYS";
pub const ENV_API_KEY: &str = "GEMINI_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model: ModelSection,
    pub retry: RetrySection,
    pub layout: LayoutSection,
    pub render: RenderSection,
    pub pipeline: PipelineSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSection {
    pub model_id: String,
    pub endpoint: String,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub include_thoughts: bool,
    pub request_timeout_secs: u64,
    pub jpeg_quality: u8,
    pub api_keys: Vec<String>,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            temperature: None,
            max_output_tokens: None,
            include_thoughts: true,
            request_timeout_secs: 300,
            jpeg_quality: 90,
            api_keys: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub max_client_retries: u32,
    pub max_server_retries: u32,
    pub rate_limit_cooldown_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            initial_delay_ms: 2_000,
            multiplier: 1.5,
            max_delay_ms: 60_000,
            max_client_retries: 5,
            max_server_retries: 10,
            rate_limit_cooldown_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutSection {
    pub row_threshold: u32,
    /// Classes of interest. Empty keeps every class.
    pub classes: Vec<u32>,
}

impl Default for LayoutSection {
    fn default() -> Self {
        Self {
            row_threshold: DEFAULT_ROW_THRESHOLD,
            classes: vec![3, 14],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSection {
    pub base_thickness: u32,
    pub fill_opacity: f32,
    pub text_opacity: f32,
    pub draw_labels: bool,
    pub padding: u32,
    /// TrueType/OpenType font for region tags.
    pub font_path: Option<PathBuf>,
}

impl Default for RenderSection {
    fn default() -> Self {
        let defaults = RenderOptions::default();
        Self {
            base_thickness: defaults.base_thickness,
            fill_opacity: defaults.fill_opacity,
            text_opacity: defaults.text_opacity,
            draw_labels: defaults.draw_labels,
            padding: defaults.padding,
            font_path: defaults.font_path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub concurrency: usize,
    pub answer_tag: String,
    pub prompt_with_regions_file: Option<PathBuf>,
    pub prompt_without_regions_file: Option<PathBuf>,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            concurrency: 4,
            answer_tag: DEFAULT_ANSWER_TAG.to_string(),
            prompt_with_regions_file: None,
            prompt_without_regions_file: None,
        }
    }
}

/// The two prompt texts with the answer tag already substituted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompts {
    pub with_regions: String,
    pub without_regions: String,
}

impl Config {
    pub fn retry_policy(&self) -> RetryPolicy {
        let r = &self.retry;
        RetryPolicy {
            initial_delay: Duration::from_millis(r.initial_delay_ms),
            multiplier: r.multiplier.max(1.0),
            max_delay: Duration::from_millis(r.max_delay_ms.max(r.initial_delay_ms)),
            max_client_retries: r.max_client_retries,
            max_server_retries: r.max_server_retries,
            rate_limit_cooldown: Duration::from_millis(r.rate_limit_cooldown_ms),
        }
    }

    pub fn layout_config(&self) -> LayoutConfig {
        LayoutConfig {
            row_threshold: self.layout.row_threshold,
        }
    }

    pub fn render_options(&self) -> RenderOptions {
        let r = &self.render;
        RenderOptions {
            base_thickness: r.base_thickness,
            fill_opacity: r.fill_opacity.clamp(0.0, 1.0),
            text_opacity: r.text_opacity.clamp(0.0, 1.0),
            draw_labels: r.draw_labels,
            padding: r.padding,
            font_path: r.font_path.clone(),
            ..RenderOptions::default()
        }
    }

    pub fn generation_config(&self) -> GenerationConfig {
        GenerationConfig {
            temperature: self.model.temperature,
            max_output_tokens: self.model.max_output_tokens,
            include_thoughts: self.model.include_thoughts,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.model.request_timeout_secs)
    }

    /// Loads prompt override files, falling back to the built-in texts.
    pub fn prompts(&self) -> Result<Prompts, ConfigError> {
        let load = |path: &Option<PathBuf>, builtin: &str| -> Result<String, ConfigError> {
            let template = match path {
                Some(path) => std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?,
                None => builtin.to_string(),
            };
            Ok(render_prompt(&template, &self.pipeline.answer_tag))
        };
        Ok(Prompts {
            with_regions: load(&self.pipeline.prompt_with_regions_file, PROMPT_WITH_REGIONS)?,
            without_regions: load(&self.pipeline.prompt_without_regions_file, PROMPT_WITHOUT_REGIONS)?,
        })
    }
}

pub fn parse_config(raw: &str, path: &Path) -> Result<Config, ConfigError> {
    toml::from_str(raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads `path`. When `required` is false a missing file yields defaults.
pub fn load_config(path: &Path, required: bool) -> Result<Config, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(raw) => parse_config(&raw, path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Ok(Config::default())
        }
        Err(source) => Err(ConfigError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Picks the credential list: `GEMINI_API_KEYS`, then `GEMINI_API_KEY`, then
/// the config file. `lookup` reads an environment variable.
pub fn resolve_api_keys<F>(config: &Config, lookup: F) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    let split = |raw: String| -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(String::from)
            .collect()
    };

    if let Some(keys) = lookup(ENV_API_KEYS).map(split).filter(|k| !k.is_empty()) {
        return keys;
    }
    if let Some(key) = lookup(ENV_API_KEY).map(|k| k.trim().to_string()).filter(|k| !k.is_empty()) {
        return vec![key];
    }
    config.model.api_keys.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = parse_config("", Path::new("t.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.model.model_id, "gemini-3-flash-preview");
        assert_eq!(config.layout.classes, vec![3, 14]);

        let policy = config.retry_policy();
        assert_eq!(policy, RetryPolicy::default());
    }

    #[test]
    fn test_partial_sections() {
        let raw = r#"
            [retry]
            max_server_retries = 3

            [layout]
            classes = []

            [pipeline]
            concurrency = 16
        "#;
        let config = parse_config(raw, Path::new("t.toml")).unwrap();
        assert_eq!(config.retry.max_server_retries, 3);
        assert_eq!(config.retry.max_client_retries, 5);
        assert!(config.layout.classes.is_empty());
        assert_eq!(config.pipeline.concurrency, 16);
        assert_eq!(config.pipeline.answer_tag, DEFAULT_ANSWER_TAG);
    }

    #[test]
    fn test_render_section_font_and_opacity() {
        let raw = r#"
            [render]
            font_path = "/opt/fonts/Label.ttf"
            text_opacity = 3.0
        "#;
        let config = parse_config(raw, Path::new("t.toml")).unwrap();
        let options = config.render_options();
        assert_eq!(options.font_path, Some(PathBuf::from("/opt/fonts/Label.ttf")));
        assert_eq!(options.text_opacity, 1.0);
        assert_eq!(Config::default().render_options().font_path, None);
    }

    #[test]
    fn test_extreme_multiplier_is_usable() {
        let raw = "[retry]\nmultiplier = 1e30\nmax_delay_ms = 9223372036854775807\n";
        let config = parse_config(raw, Path::new("t.toml")).unwrap();
        let mut backoff = crate::client::Backoff::new(&config.retry_policy());
        for _ in 0..64 {
            backoff.next_delay();
        }
    }

    #[test]
    fn test_parse_error_names_file() {
        let err = parse_config("[retry]\nmultiplier = \"fast\"", Path::new("bad.toml")).unwrap_err();
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert_eq!(load_config(&path, false).unwrap(), Config::default());
        assert!(matches!(load_config(&path, true), Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_api_key_precedence() {
        let mut config = Config::default();
        config.model.api_keys = vec!["from-file".into()];

        let env = HashMap::from([
            (ENV_API_KEYS, "a, b,,c"),
            (ENV_API_KEY, "single"),
        ]);
        let lookup = |name: &str| env.get(name).map(|v| v.to_string());
        assert_eq!(resolve_api_keys(&config, lookup), vec!["a", "b", "c"]);

        let lookup = |name: &str| (name == ENV_API_KEY).then(|| "single".to_string());
        assert_eq!(resolve_api_keys(&config, lookup), vec!["single"]);

        assert_eq!(resolve_api_keys(&config, |_| None), vec!["from-file"]);
    }

    #[test]
    fn test_prompt_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.txt");
        std::fs::write(&path, "Wrap it in <{ANSWER_TAG}>.").unwrap();

        let mut config = Config::default();
        config.pipeline.answer_tag = "doc".into();
        config.pipeline.prompt_without_regions_file = Some(path);
        let prompts = config.prompts().unwrap();
        assert_eq!(prompts.without_regions, "Wrap it in <doc>.");
        assert!(prompts.with_regions.contains("<doc>"));
    }
}
