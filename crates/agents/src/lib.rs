mod error;

use std::sync::Arc;
use std::time::Instant;

use pantry_core::intent::{rate_limited_decision, unavailable_decision};
use pantry_core::prompts::{
    health_summary_prompt, meal_analysis_prompt, recipe_prompt, vision_prompt,
};
use pantry_core::{
    build_classification_prompt, decision_from_payload, extract_as, extract_structured,
    normalize_text, IntentDecision, NewNutritionLog, NewPantryItem, NormalizeError,
    NutritionEstimate, NutritionLog, PantryItem, RecipeSuggestion, ScannedItem,
};
use pantry_llm::{ImagePayload, LlmError, ModelClient, ModelRequest, ModelTask};
use pantry_observability::AppMetrics;
use pantry_storage::{NutritionRepository, PantryRepository};
use serde::de::DeserializeOwned;
use tracing::{info, instrument, warn};

pub use error::{AgentError, INVALID_RESPONSE_MESSAGE};

pub const NUTRITION_BUSY: &str = "The AI is currently busy. Please wait a moment and try again.";
pub const RECIPE_BUSY: &str =
    "The Recipe AI is currently busy. Please wait a moment and try again.";
pub const VISION_BUSY: &str =
    "The Vision AI is currently busy. Please wait a moment and try again.";
pub const ASK_BUSY: &str = "The AI is currently busy. Please wait a moment and try again.";
pub const SUMMARY_BUSY: &str =
    "The AI is currently busy generating your summary. Please refresh in a moment!";
pub const NO_LOGS_SUMMARY: &str =
    "No nutrition logs found. Start logging your meals to get insights!";

pub struct PantryAgents<S, M>
where
    S: PantryRepository + NutritionRepository,
    M: ModelClient,
{
    store: Arc<S>,
    model: Arc<M>,
    metrics: Arc<AppMetrics>,
}

impl<S, M> Clone for PantryAgents<S, M>
where
    S: PantryRepository + NutritionRepository,
    M: ModelClient,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            model: self.model.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<S, M> PantryAgents<S, M>
where
    S: PantryRepository + NutritionRepository,
    M: ModelClient,
{
    pub fn new(store: Arc<S>, model: Arc<M>, metrics: Arc<AppMetrics>) -> Self {
        Self {
            store,
            model,
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn model_configured(&self) -> bool {
        self.model.is_configured()
    }

    /// Routes one chat message. Every failure degrades to a `general_chat`
    /// decision instead of an error.
    #[instrument(skip(self, message))]
    pub async fn classify(&self, message: &str) -> IntentDecision {
        self.metrics.inc_request();
        let normalized = normalize_text(message);
        let prompt = build_classification_prompt(&normalized);

        let raw = match self.call_model(ModelRequest::text(ModelTask::Chat, prompt)).await {
            Ok(raw) => raw,
            Err(LlmError::RateLimited(reason)) => {
                warn!(reason = %reason, "router rate limited");
                self.metrics.inc_router_fallback();
                return rate_limited_decision();
            }
            Err(err) => {
                warn!(error = %err, "router model call failed");
                self.metrics.inc_router_fallback();
                return unavailable_decision();
            }
        };

        let payload = match extract_structured(&raw) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "router could not extract a payload");
                self.metrics.inc_malformed();
                self.metrics.inc_router_fallback();
                return unavailable_decision();
            }
        };

        match decision_from_payload(&payload) {
            Ok((decision, unknown_intent)) => {
                if let Some(unknown) = unknown_intent {
                    warn!(intent = %unknown, "model returned an intent outside the enumeration");
                    self.metrics.inc_router_fallback();
                }
                info!(intent = %decision.intent, "chat classified");
                decision
            }
            Err(rejection) => {
                warn!(rejection = ?rejection, "router payload rejected");
                self.metrics.inc_malformed();
                self.metrics.inc_router_fallback();
                unavailable_decision()
            }
        }
    }

    #[instrument(skip(self, meal_description))]
    pub async fn analyze_meal(
        &self,
        meal_description: &str,
    ) -> Result<NutritionEstimate, AgentError> {
        self.metrics.inc_request();
        let description = normalize_text(meal_description);
        if description.is_empty() {
            return Err(AgentError::InvalidInput(
                "Meal description must not be empty.".to_string(),
            ));
        }

        let request = ModelRequest::text(ModelTask::Nutrition, meal_analysis_prompt(&description));
        self.structured_call(request, NUTRITION_BUSY).await
    }

    /// Estimates a meal and stores it as today's nutrition log.
    pub async fn log_meal(&self, meal_description: &str) -> Result<NutritionLog, AgentError> {
        let estimate = self.analyze_meal(meal_description).await?;
        let log = self
            .store
            .create_nutrition_log(NewNutritionLog::from_estimate(estimate))
            .await?;
        info!(log_id = log.id, meal = %log.meal_name, calories = log.calories, "meal logged");
        Ok(log)
    }

    #[instrument(skip(self, pantry, preferences, time_of_day), fields(pantry_items = pantry.len()))]
    pub async fn suggest_recipes(
        &self,
        pantry: &[PantryItem],
        preferences: &str,
        time_of_day: &str,
    ) -> Result<Vec<RecipeSuggestion>, AgentError> {
        self.metrics.inc_request();
        let prompt = recipe_prompt(pantry, preferences.trim(), time_of_day.trim());
        self.structured_call(ModelRequest::text(ModelTask::Recipe, prompt), RECIPE_BUSY)
            .await
    }

    pub async fn recipes_from_pantry(
        &self,
        preferences: &str,
        time_of_day: &str,
    ) -> Result<Vec<RecipeSuggestion>, AgentError> {
        let pantry = self.store.list_pantry().await?;
        self.suggest_recipes(&pantry, preferences, time_of_day).await
    }

    #[instrument(skip(self, image_bytes), fields(bytes = image_bytes.len()))]
    pub async fn scan_image(
        &self,
        image_bytes: Vec<u8>,
        mime_type: &str,
    ) -> Result<Vec<ScannedItem>, AgentError> {
        self.metrics.inc_request();
        let mime_type = mime_type.trim().to_lowercase();
        if !mime_type.starts_with("image/") {
            return Err(AgentError::InvalidInput(
                "File provided is not an image.".to_string(),
            ));
        }
        if image_bytes.is_empty() {
            return Err(AgentError::InvalidInput("Image is empty.".to_string()));
        }

        let request = ModelRequest::text(ModelTask::Vision, vision_prompt()).with_image(
            ImagePayload {
                bytes: image_bytes,
                mime_type,
            },
        );
        self.structured_call(request, VISION_BUSY).await
    }

    /// Scans an image and adds every detected item to the pantry.
    pub async fn scan_into_pantry(
        &self,
        image_bytes: Vec<u8>,
        mime_type: &str,
    ) -> Result<Vec<PantryItem>, AgentError> {
        let scanned = self.scan_image(image_bytes, mime_type).await?;
        let mut stored = Vec::with_capacity(scanned.len());
        for item in scanned {
            stored.push(self.store.create_pantry_item(NewPantryItem::from(item)).await?);
        }
        info!(items = stored.len(), "scanned items added to pantry");
        Ok(stored)
    }

    /// Conversational summary of every stored nutrition log.
    #[instrument(skip(self))]
    pub async fn health_summary(&self) -> Result<String, AgentError> {
        self.metrics.inc_request();
        let logs = self.store.list_nutrition_logs().await?;
        if logs.is_empty() {
            return Ok(NO_LOGS_SUMMARY.to_string());
        }

        let request = ModelRequest::text(ModelTask::Nutrition, health_summary_prompt(&logs));
        match self.call_model(request).await {
            Ok(text) => Ok(text.trim().to_string()),
            Err(LlmError::RateLimited(_)) => Ok(SUMMARY_BUSY.to_string()),
            Err(err) => Err(AgentError::from_llm(err, SUMMARY_BUSY)),
        }
    }

    pub async fn ask(&self, prompt: &str) -> Result<String, AgentError> {
        self.metrics.inc_request();
        if prompt.trim().is_empty() {
            return Err(AgentError::InvalidInput("Prompt must not be empty.".to_string()));
        }

        self.call_model(ModelRequest::text(ModelTask::Chat, prompt.trim()))
            .await
            .map(|text| text.trim().to_string())
            .map_err(|err| AgentError::from_llm(err, ASK_BUSY))
    }

    async fn structured_call<T>(
        &self,
        request: ModelRequest,
        busy_message: &str,
    ) -> Result<T, AgentError>
    where
        T: DeserializeOwned,
    {
        let task = request.task;
        let raw = self.call_model(request).await.map_err(|err| {
            warn!(task = ?task, error = %err, "model call failed");
            AgentError::from_llm(err, busy_message)
        })?;

        extract_as::<T>(&raw).map_err(|err: NormalizeError| {
            warn!(
                task = ?task,
                error = %err,
                candidate = ?err.candidate(),
                payload = ?err.payload(),
                "model response rejected"
            );
            self.metrics.inc_malformed();
            AgentError::MalformedResponse(err)
        })
    }

    async fn call_model(&self, request: ModelRequest) -> Result<String, LlmError> {
        let started = Instant::now();
        let result = self.model.generate(request).await;
        self.metrics.observe_llm_call(started.elapsed());
        if matches!(&result, Err(err) if err.is_rate_limited()) {
            self.metrics.inc_rate_limited();
        }
        result
    }
}
