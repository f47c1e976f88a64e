//! Generative-model client
//!
//! Both enrichment branches and the model-backed ratio calculator talk to the
//! model through [`TextGenerator`]; [`GeminiClient`] is the REST
//! implementation (`models/{model}:generateContent`).

use crate::config::{EnrichmentConfig, TimeoutConfig};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::{Error, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Binary attachment sent inline with the prompt
#[derive(Debug, Clone)]
pub struct Attachment {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn pdf(data: Vec<u8>) -> Self {
        Self {
            mime_type: "application/pdf".to_string(),
            data,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub prompt: String,
    pub attachments: Vec<Attachment>,
    /// Let the model consult web search
    pub search_grounding: bool,
    /// Ask for a JSON document instead of prose
    pub json_output: bool,
}

impl GenerationRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate text for one request; an empty completion is an error
    async fn generate(&self, request: GenerationRequest) -> Result<String>;
}

/// Sampling settings applied to every call
#[derive(Debug, Clone, Copy)]
pub struct SamplingSettings {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl From<&EnrichmentConfig> for SamplingSettings {
    fn from(config: &EnrichmentConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        }
    }
}

pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    sampling: SamplingSettings,
    retry: RetryPolicy,
}

impl GeminiClient {
    pub fn new(
        api_key: String,
        model: impl Into<String>,
        sampling: SamplingSettings,
        timeouts: &TimeoutConfig,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeouts.generation_timeout())
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            model: model.into(),
            sampling,
            retry: RetryPolicy::from_config(timeouts),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn generate_once(&self, body: &Value) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", GEMINI_BASE_URL, self.model);

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::Http {
                status: Some(status.as_u16()),
                message: format!("generateContent failed: {}", truncate(&error_text, 300)),
            });
        }

        let payload: Value = response.json().await?;
        extract_text(&payload)
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, request: GenerationRequest) -> Result<String> {
        let body = request_body(&request, self.sampling);

        tracing::debug!(
            model = %self.model,
            attachments = request.attachments.len(),
            search_grounding = request.search_grounding,
            "Calling generative model"
        );

        retry_with_backoff("generate content", self.retry, || self.generate_once(&body)).await
    }
}

/// Build a `generateContent` request body
pub fn request_body(request: &GenerationRequest, sampling: SamplingSettings) -> Value {
    let mut parts = vec![json!({ "text": request.prompt })];
    for attachment in &request.attachments {
        parts.push(json!({
            "inline_data": {
                "mime_type": attachment.mime_type,
                "data": base64::engine::general_purpose::STANDARD.encode(&attachment.data),
            }
        }));
    }

    let mut generation_config = json!({
        "temperature": sampling.temperature,
        "maxOutputTokens": sampling.max_output_tokens,
    });
    if request.json_output {
        generation_config["responseMimeType"] = json!("application/json");
    }

    let mut body = json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": generation_config,
    });
    if request.search_grounding {
        body["tools"] = json!([{ "google_search": {} }]);
    }
    body
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

/// Concatenate the text parts of the first candidate
pub fn extract_text(payload: &Value) -> Result<String> {
    let response: GenerateResponse = serde_json::from_value(payload.clone())?;
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| Error::Internal("model returned no candidates".to_string()))?;

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(Error::Internal(format!(
            "model returned empty text (finish reason: {})",
            candidate.finish_reason.as_deref().unwrap_or("unknown")
        )));
    }

    Ok(text)
}

/// Strip a surrounding Markdown code fence (```json ... ```)
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
