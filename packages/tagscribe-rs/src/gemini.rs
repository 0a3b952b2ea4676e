//! [`VisionModel`] backed by the Gemini `generateContent` REST endpoint.
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tagscribe_vision::{ModelError, ModelRequest, VisionModel};

pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfigBody,
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    Text {
        text: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfigBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    thinking_config: ThinkingConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    include_thoughts: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

/// HTTP client for Gemini models.
#[derive(Debug, Clone)]
pub struct GeminiEngine {
    client: Client,
    endpoint: String,
}

impl GeminiEngine {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, model_id: &str) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, model_id)
    }
}

fn build_body(request: &ModelRequest) -> GenerateContentRequest {
    let data = base64::engine::general_purpose::STANDARD.encode(&request.image.bytes);
    GenerateContentRequest {
        contents: vec![Content {
            role: "user".to_string(),
            parts: vec![
                Part::Inline {
                    inline_data: InlineData {
                        mime_type: request.image.mime_type.to_string(),
                        data,
                    },
                },
                Part::Text {
                    text: request.prompt.clone(),
                },
            ],
        }],
        generation_config: GenerationConfigBody {
            temperature: request.config.temperature,
            max_output_tokens: request.config.max_output_tokens,
            thinking_config: ThinkingConfig {
                include_thoughts: request.config.include_thoughts,
            },
        },
    }
}

/// Joins the answer text of the first candidate, leaving out thought parts.
fn answer_text(response: GenerateContentResponse) -> String {
    response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter(|p| !p.thought)
                .filter_map(|p| p.text)
                .collect::<String>()
        })
        .unwrap_or_default()
}

/// Transport failures that never reached the server count as transient.
fn classify_transport(err: reqwest::Error) -> ModelError {
    if err.is_timeout() || err.is_connect() {
        ModelError::Server {
            status: 0,
            message: err.to_string(),
        }
    } else {
        ModelError::Unknown(err.to_string())
    }
}

#[async_trait]
impl VisionModel for GeminiEngine {
    async fn generate(&self, credential: &str, request: &ModelRequest) -> Result<String, ModelError> {
        let response = self
            .client
            .post(self.url(&request.model_id))
            .header("x-goog-api-key", credential)
            .json(&build_body(request))
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::from_status(status.as_u16(), body));
        }

        let parsed: GenerateContentResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                classify_transport(e)
            } else {
                ModelError::Unknown(format!("malformed response body: {e}"))
            }
        })?;
        Ok(answer_text(parsed))
    }
}
