use std::env;
use std::time::Duration;

use crate::ModelTask;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone)]
pub struct ModelNames {
    pub chat: String,
    pub nutrition: String,
    pub recipe: String,
    pub vision: String,
}

impl Default for ModelNames {
    fn default() -> Self {
        Self {
            chat: "gemma-3-27b-it".to_string(),
            nutrition: "gemma-3-12b-it".to_string(),
            recipe: "gemma-3-27b-it".to_string(),
            vision: "gemini-flash-latest".to_string(),
        }
    }
}

impl ModelNames {
    pub fn for_task(&self, task: ModelTask) -> &str {
        match task {
            ModelTask::Chat => &self.chat,
            ModelTask::Nutrition => &self.nutrition,
            ModelTask::Recipe => &self.recipe,
            ModelTask::Vision => &self.vision,
        }
    }
}

/// Built once at startup and handed to the client.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub models: ModelNames,
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            models: ModelNames::default(),
            timeout: Duration::from_secs(60),
        }
    }
}

impl LlmConfig {
    pub fn from_env() -> Self {
        let defaults = ModelNames::default();
        let api_key = non_empty_var("GEMINI_API_KEY");
        if api_key.is_none() {
            tracing::warn!("GEMINI_API_KEY not set; model-backed features will be unavailable");
        }

        Self {
            api_key,
            base_url: non_empty_var("PANTRY_GEMINI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            models: ModelNames {
                chat: non_empty_var("PANTRY_MODEL_CHAT").unwrap_or(defaults.chat),
                nutrition: non_empty_var("PANTRY_MODEL_NUTRITION").unwrap_or(defaults.nutrition),
                recipe: non_empty_var("PANTRY_MODEL_RECIPE").unwrap_or(defaults.recipe),
                vision: non_empty_var("PANTRY_MODEL_VISION").unwrap_or(defaults.vision),
            },
            timeout: Duration::from_secs(
                env::var("PANTRY_LLM_TIMEOUT_SECONDS")
                    .ok()
                    .and_then(|value| value.parse::<u64>().ok())
                    .unwrap_or(60),
            ),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
