mod config;
mod error;
mod gemini;

pub use config::{LlmConfig, ModelNames, DEFAULT_BASE_URL};
pub use error::{classify_failure, LlmError};
pub use gemini::GeminiClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTask {
    Chat,
    Nutrition,
    Recipe,
    Vision,
}

#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub task: ModelTask,
    pub prompt: String,
    pub image: Option<ImagePayload>,
}

impl ModelRequest {
    pub fn text(task: ModelTask, prompt: impl Into<String>) -> Self {
        Self {
            task,
            prompt: prompt.into(),
            image: None,
        }
    }

    pub fn with_image(mut self, image: ImagePayload) -> Self {
        self.image = Some(image);
        self
    }
}

/// Text (optionally with one image) in, text out.
pub trait ModelClient: Send + Sync {
    async fn generate(&self, request: ModelRequest) -> Result<String, LlmError>;

    fn is_configured(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
pub enum ModelBackend {
    Gemini(GeminiClient),
    /// No credentials; every call fails with `ServiceUnavailable`.
    Unconfigured,
}

impl ModelBackend {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        match config.api_key.as_deref() {
            Some(key) => Ok(Self::Gemini(GeminiClient::new(config, key)?)),
            None => Ok(Self::Unconfigured),
        }
    }

    pub fn from_env() -> Result<Self, LlmError> {
        Self::from_config(&LlmConfig::from_env())
    }
}

impl ModelClient for ModelBackend {
    async fn generate(&self, request: ModelRequest) -> Result<String, LlmError> {
        match self {
            ModelBackend::Gemini(client) => client.generate(request).await,
            ModelBackend::Unconfigured => Err(LlmError::ServiceUnavailable(
                "Gemini API key is not configured".to_string(),
            )),
        }
    }

    fn is_configured(&self) -> bool {
        matches!(self, ModelBackend::Gemini(_))
    }
}
