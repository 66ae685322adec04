use pantry_core::NormalizeError;
use pantry_llm::LlmError;
use thiserror::Error;

pub const INVALID_RESPONSE_MESSAGE: &str = "The AI did not return a valid response. Please try again.";

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("AI service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("{message}")]
    RateLimited { message: String },

    #[error("invalid AI response: {0}")]
    MalformedResponse(#[source] NormalizeError),

    #[error("AI service error: {0}")]
    Upstream(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl AgentError {
    /// Maps a model failure, substituting the call site's busy message for
    /// rate limiting.
    pub fn from_llm(error: LlmError, busy_message: &str) -> Self {
        match error {
            LlmError::RateLimited(_) => Self::RateLimited {
                message: busy_message.to_string(),
            },
            LlmError::ServiceUnavailable(reason) => Self::ServiceUnavailable(reason),
            other => Self::Upstream(other.to_string()),
        }
    }

    /// Text safe to show an end user.
    pub fn user_message(&self) -> String {
        match self {
            Self::ServiceUnavailable(_) => {
                "The AI service is not available right now.".to_string()
            }
            Self::RateLimited { message } => message.clone(),
            Self::MalformedResponse(_) | Self::Upstream(_) => INVALID_RESPONSE_MESSAGE.to_string(),
            Self::InvalidInput(reason) => reason.clone(),
            Self::Storage(_) => "An unexpected storage error occurred.".to_string(),
        }
    }
}
