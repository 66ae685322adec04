//! Client for the Gemini `generateContent` endpoint.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{LlmConfig, ModelNames};
use crate::error::{classify_failure, LlmError};
use crate::{ImagePayload, ModelRequest};

#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    api_key: String,
    base_url: String,
    models: ModelNames,
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
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

impl GeminiClient {
    pub fn new(config: &LlmConfig, api_key: impl Into<String>) -> Result<Self, LlmError> {
        let http = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(6))
            .timeout(config.timeout)
            .build()
            .map_err(|err| {
                LlmError::ServiceUnavailable(format!("failed to build HTTP client: {err}"))
            })?;

        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            models: config.models.clone(),
        })
    }

    pub async fn generate(&self, request: ModelRequest) -> Result<String, LlmError> {
        let model = self.models.for_task(request.task);
        let url = endpoint_url(&self.base_url, model);
        let body = build_request_body(&request.prompt, request.image.as_ref());

        debug!(model = %model, task = ?request.task, has_image = request.image.is_some(), "calling gemini");

        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", self.api_key.as_str())
            .json(&body)
            .send()
            .await
            .map_err(|err| LlmError::Transport(err.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| LlmError::Transport(err.to_string()))?;

        if !status.is_success() {
            let error = classify_failure(status.as_u16(), &text);
            warn!(model = %model, status = status.as_u16(), error = %error, "gemini call failed");
            return Err(error);
        }

        completion_text(&text)
    }
}

fn endpoint_url(base_url: &str, model: &str) -> String {
    let model = model.trim_start_matches("models/");
    format!("{base_url}/models/{model}:generateContent")
}

fn build_request_body(prompt: &str, image: Option<&ImagePayload>) -> GenerateRequest {
    let mut parts = vec![Part::Text {
        text: prompt.to_string(),
    }];
    if let Some(image) = image {
        parts.push(Part::InlineData {
            inline_data: InlineData {
                mime_type: image.mime_type.clone(),
                data: STANDARD.encode(&image.bytes),
            },
        });
    }

    GenerateRequest {
        contents: vec![Content {
            role: "user",
            parts,
        }],
    }
}

/// Joins the non-thought text parts of the first candidate.
fn completion_text(body: &str) -> Result<String, LlmError> {
    let parsed: GenerateResponse = serde_json::from_str(body)
        .map_err(|err| LlmError::Transport(format!("unreadable gemini response: {err}")))?;

    let text = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter(|part| !part.thought)
                .filter_map(|part| part.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        Err(LlmError::EmptyCompletion)
    } else {
        Ok(text)
    }
}
