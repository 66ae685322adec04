use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("model service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("model service rate limited: {0}")]
    RateLimited(String),

    #[error("model service returned status {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("model transport failed: {0}")]
    Transport(String),

    #[error("model returned an empty completion")]
    EmptyCompletion,
}

impl LlmError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

/// Maps a non-success HTTP response onto an error variant, using the status
/// code and the provider's structured error body.
pub fn classify_failure(status: u16, body: &str) -> LlmError {
    let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok();
    let provider_status = parsed
        .as_ref()
        .map(|envelope| envelope.error.status.as_str())
        .unwrap_or_default();
    let message = parsed
        .as_ref()
        .map(|envelope| envelope.error.message.clone())
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| body.trim().chars().take(300).collect());

    match (status, provider_status) {
        (429, _) | (_, "RESOURCE_EXHAUSTED") => LlmError::RateLimited(message),
        (401 | 403, _) | (_, "UNAUTHENTICATED" | "PERMISSION_DENIED") => {
            LlmError::ServiceUnavailable(message)
        }
        _ => LlmError::Upstream { status, message },
    }
}
