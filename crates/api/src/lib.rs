mod rate_limit;

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, Json, Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::Router;
use pantry_agents::{AgentError, PantryAgents};
use pantry_core::{ChatInput, NewNutritionLog, NewPantryItem, PantryItemUpdate};
use pantry_llm::{LlmConfig, ModelBackend};
use pantry_observability::{AppMetrics, MetricsSnapshot};
use pantry_storage::{NutritionRepository, PantryRepository, Store};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

pub use crate::rate_limit::KeyedRateLimiter;

const DEFAULT_BIND: &str = "0.0.0.0:8080";
const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:5173,http://localhost:3000";
const DEFAULT_AGENT_RATE_LIMIT_WINDOW_SECONDS: u64 = 60;
const DEFAULT_AGENT_RATE_LIMIT_MAX: usize = 30;
const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
const MAX_NAME_LEN: usize = 200;

type Agents = PantryAgents<Store, ModelBackend>;

/// Everything the HTTP surface needs to start, resolved once at boot.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind: String,
    pub database_url: Option<String>,
    pub api_key: Option<String>,
    pub allowed_origins: Vec<String>,
    pub agent_rate_limit_window: Duration,
    pub agent_rate_limit_max: usize,
    pub max_body_bytes: usize,
    pub llm: LlmConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            database_url: None,
            api_key: None,
            allowed_origins: parse_origins(DEFAULT_ALLOWED_ORIGINS),
            agent_rate_limit_window: Duration::from_secs(DEFAULT_AGENT_RATE_LIMIT_WINDOW_SECONDS),
            agent_rate_limit_max: DEFAULT_AGENT_RATE_LIMIT_MAX,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            llm: LlmConfig::default(),
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind: env::var("PANTRY_BIND").unwrap_or(defaults.bind),
            database_url: non_empty_env("PANTRY_DATABASE_URL"),
            api_key: non_empty_env("PANTRY_API_KEY"),
            allowed_origins: env::var("PANTRY_ALLOWED_ORIGINS")
                .map(|value| parse_origins(&value))
                .unwrap_or(defaults.allowed_origins),
            agent_rate_limit_window: Duration::from_secs(
                env::var("PANTRY_AGENT_RATE_LIMIT_WINDOW_SECONDS")
                    .ok()
                    .and_then(|value| value.parse::<u64>().ok())
                    .unwrap_or(DEFAULT_AGENT_RATE_LIMIT_WINDOW_SECONDS),
            ),
            agent_rate_limit_max: env::var("PANTRY_AGENT_RATE_LIMIT_MAX")
                .ok()
                .and_then(|value| value.parse::<usize>().ok())
                .unwrap_or(defaults.agent_rate_limit_max),
            max_body_bytes: env::var("PANTRY_MAX_BODY_BYTES")
                .ok()
                .and_then(|value| value.parse::<usize>().ok())
                .unwrap_or(defaults.max_body_bytes),
            llm: LlmConfig::from_env(),
        }
    }
}

#[derive(Clone)]
pub struct ApiState {
    agents: Arc<Agents>,
    store: Arc<Store>,
    metrics: Arc<AppMetrics>,
    api_key: Option<String>,
    agent_limiter: KeyedRateLimiter,
    allowed_origins: Arc<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp_utc: String,
    storage: &'static str,
    llm_configured: bool,
    metrics: MetricsSnapshot,
}

#[derive(Debug, Deserialize)]
struct AnalyzeMealRequest {
    meal_description: String,
}

#[derive(Debug, Deserialize)]
struct RecipeRequest {
    #[serde(default)]
    preferences: String,
    #[serde(default)]
    time_of_day: String,
}

#[derive(Debug, Default, Deserialize)]
struct ScanParams {
    #[serde(default)]
    add_to_pantry: bool,
}

#[derive(Debug, Serialize)]
struct SummaryResponse {
    summary: String,
}

#[derive(Debug, Deserialize)]
struct AskRequest {
    prompt: String,
}

#[derive(Debug, Serialize)]
struct AskResponse {
    response: String,
}

pub async fn build_app() -> Result<Router> {
    build_app_with_config(ApiConfig::from_env()).await
}

pub async fn build_app_with_config(config: ApiConfig) -> Result<Router> {
    let metrics = AppMetrics::shared();

    let store = match config.database_url.as_deref() {
        Some(database_url) => Store::sqlite(database_url).await?,
        None => Store::memory(),
    };
    let store = Arc::new(store);

    let model = Arc::new(
        ModelBackend::from_config(&config.llm).context("failed to initialize model client")?,
    );
    let agents = Arc::new(PantryAgents::new(store.clone(), model, metrics.clone()));

    let state = ApiState {
        agents,
        store,
        metrics,
        api_key: config.api_key,
        agent_limiter: KeyedRateLimiter::new(
            config.agent_rate_limit_window,
            config.agent_rate_limit_max,
        ),
        allowed_origins: Arc::new(config.allowed_origins),
    };

    Ok(build_router(state, config.max_body_bytes))
}

pub fn build_router(state: ApiState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/pantry", get(pantry_list).post(pantry_create))
        .route("/v1/pantry/:id", put(pantry_update).delete(pantry_delete))
        .route("/v1/nutrition", get(nutrition_list).post(nutrition_create))
        .route(
            "/v1/nutrition/:id",
            get(nutrition_get).delete(nutrition_delete),
        )
        .route("/v1/agents/chat", post(agent_chat))
        .route("/v1/agents/nutrition/analyze", post(agent_nutrition_analyze))
        .route("/v1/agents/nutrition/summary", get(agent_nutrition_summary))
        .route("/v1/agents/recipe/suggest", post(agent_recipe_suggest))
        .route("/v1/agents/vision/scan", post(agent_vision_scan))
        .route("/v1/ask", post(ask))
        .layer(build_cors_layer(&state.allowed_origins))
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api_key_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .with_state(state)
}

async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        timestamp_utc: chrono::Utc::now().to_rfc3339(),
        storage: state.store.backend_name(),
        llm_configured: state.agents.model_configured(),
        metrics: state.metrics.snapshot(),
    })
}

async fn pantry_list(State(state): State<ApiState>) -> Response {
    match state.store.list_pantry().await {
        Ok(items) => Json(items).into_response(),
        Err(err) => internal_error(err),
    }
}

async fn pantry_create(
    State(state): State<ApiState>,
    Json(mut item): Json<NewPantryItem>,
) -> Response {
    item.name = item.name.trim().to_string();
    item.unit = item.unit.trim().to_string();
    if let Err(message) = validate_name("name", &item.name)
        .and_then(|_| validate_amount("quantity", item.quantity))
    {
        return bad_request(message);
    }

    match state.store.create_pantry_item(item).await {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(err) => internal_error(err),
    }
}

async fn pantry_update(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(mut update): Json<PantryItemUpdate>,
) -> Response {
    if let Some(name) = update.name.as_mut() {
        *name = name.trim().to_string();
        if let Err(message) = validate_name("name", name) {
            return bad_request(message);
        }
    }
    if let Some(quantity) = update.quantity {
        if let Err(message) = validate_amount("quantity", quantity) {
            return bad_request(message);
        }
    }

    match state.store.update_pantry_item(id, update).await {
        Ok(Some(item)) => Json(item).into_response(),
        Ok(None) => not_found("pantry item"),
        Err(err) => internal_error(err),
    }
}

async fn pantry_delete(State(state): State<ApiState>, Path(id): Path<i64>) -> Response {
    match state.store.delete_pantry_item(id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => not_found("pantry item"),
        Err(err) => internal_error(err),
    }
}

async fn nutrition_list(State(state): State<ApiState>) -> Response {
    match state.store.list_nutrition_logs().await {
        Ok(logs) => Json(logs).into_response(),
        Err(err) => internal_error(err),
    }
}

async fn nutrition_create(
    State(state): State<ApiState>,
    Json(mut log): Json<NewNutritionLog>,
) -> Response {
    log.meal_name = log.meal_name.trim().to_string();
    let validation = validate_name("meal_name", &log.meal_name)
        .and_then(|_| validate_amount("calories", log.calories))
        .and_then(|_| validate_amount("protein", log.protein))
        .and_then(|_| validate_amount("carbs", log.carbs))
        .and_then(|_| validate_amount("fat", log.fat));
    if let Err(message) = validation {
        return bad_request(message);
    }

    match state.store.create_nutrition_log(log).await {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(err) => internal_error(err),
    }
}

async fn nutrition_get(State(state): State<ApiState>, Path(id): Path<i64>) -> Response {
    match state.store.get_nutrition_log(id).await {
        Ok(Some(log)) => Json(log).into_response(),
        Ok(None) => not_found("nutrition log"),
        Err(err) => internal_error(err),
    }
}

async fn nutrition_delete(State(state): State<ApiState>, Path(id): Path<i64>) -> Response {
    match state.store.delete_nutrition_log(id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => not_found("nutrition log"),
        Err(err) => internal_error(err),
    }
}

async fn agent_chat(State(state): State<ApiState>, Json(input): Json<ChatInput>) -> Response {
    Json(state.agents.classify(&input.message).await).into_response()
}

async fn agent_nutrition_analyze(
    State(state): State<ApiState>,
    Json(payload): Json<AnalyzeMealRequest>,
) -> Response {
    match state.agents.log_meal(&payload.meal_description).await {
        Ok(log) => (StatusCode::CREATED, Json(log)).into_response(),
        Err(err) => agent_error_response(err),
    }
}

async fn agent_nutrition_summary(State(state): State<ApiState>) -> Response {
    match state.agents.health_summary().await {
        Ok(summary) => Json(SummaryResponse { summary }).into_response(),
        Err(err) => agent_error_response(err),
    }
}

async fn agent_recipe_suggest(
    State(state): State<ApiState>,
    Json(payload): Json<RecipeRequest>,
) -> Response {
    match state
        .agents
        .recipes_from_pantry(&payload.preferences, &payload.time_of_day)
        .await
    {
        Ok(recipes) => Json(recipes).into_response(),
        Err(err) => agent_error_response(err),
    }
}

async fn agent_vision_scan(
    State(state): State<ApiState>,
    Query(params): Query<ScanParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mime_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .unwrap_or_default()
        .trim()
        .to_string();

    if params.add_to_pantry {
        return match state.agents.scan_into_pantry(body.to_vec(), &mime_type).await {
            Ok(items) => (StatusCode::CREATED, Json(items)).into_response(),
            Err(err) => agent_error_response(err),
        };
    }

    match state.agents.scan_image(body.to_vec(), &mime_type).await {
        Ok(items) => Json(items).into_response(),
        Err(err) => agent_error_response(err),
    }
}

async fn ask(State(state): State<ApiState>, Json(payload): Json<AskRequest>) -> Response {
    match state.agents.ask(&payload.prompt).await {
        Ok(response) => Json(AskResponse { response }).into_response(),
        Err(err) => agent_error_response(err),
    }
}

fn agent_error_response(err: AgentError) -> Response {
    let (status, code) = match &err {
        AgentError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "ai_busy"),
        AgentError::ServiceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "ai_unavailable"),
        AgentError::MalformedResponse(_) | AgentError::Upstream(_) => {
            (StatusCode::BAD_GATEWAY, "invalid_ai_response")
        }
        AgentError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
        AgentError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    };

    if status.is_server_error() {
        error!(error = %err, status = status.as_u16(), "agent request failed");
    } else {
        warn!(error = %err, status = status.as_u16(), "agent request rejected");
    }

    error_response(status, code, err.user_message())
}

fn error_response(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

fn bad_request(message: String) -> Response {
    error_response(StatusCode::BAD_REQUEST, "invalid_request", message)
}

fn not_found(resource: &str) -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        "not_found",
        format!("{resource} not found"),
    )
}

fn internal_error(err: anyhow::Error) -> Response {
    error!(error = %err, "storage operation failed");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        "An unexpected storage error occurred.",
    )
}

fn validate_name(field: &str, value: &str) -> std::result::Result<(), String> {
    if value.is_empty() {
        return Err(format!("{field} must not be empty"));
    }
    if value.chars().count() > MAX_NAME_LEN {
        return Err(format!("{field} must be at most {MAX_NAME_LEN} characters"));
    }
    Ok(())
}

fn validate_amount(field: &str, value: f64) -> std::result::Result<(), String> {
    if !value.is_finite() || value < 0.0 {
        return Err(format!("{field} must be a non-negative number"));
    }
    Ok(())
}

fn is_public_endpoint(path: &str) -> bool {
    path == "/health"
}

fn is_agent_endpoint(path: &str) -> bool {
    path.starts_with("/v1/agents/") || path == "/v1/ask"
}

async fn api_key_middleware(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.api_key.as_deref() else {
        return next.run(request).await;
    };
    if request.method() == Method::OPTIONS || is_public_endpoint(request.uri().path()) {
        return next.run(request).await;
    }

    let provided = request
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if provided != expected {
        return error_response(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "missing or invalid x-api-key",
        );
    }

    next.run(request).await
}

async fn rate_limit_middleware(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS || !is_agent_endpoint(request.uri().path()) {
        return next.run(request).await;
    }

    let ip = request_ip(&request);
    if let Err(retry_after) = state.agent_limiter.check(&ip) {
        let seconds = retry_after.as_secs().max(1);
        let mut response = error_response(
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limited",
            format!("too many AI requests from this client. retry in {seconds}s."),
        );
        if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        return response;
    }

    next.run(request).await
}

fn request_ip(request: &Request<Body>) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "local".to_string())
}

async fn security_headers_middleware(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );

    response
}

fn build_cors_layer(allowed_origins: &Arc<Vec<String>>) -> CorsLayer {
    let origins = allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::HeaderName::from_static("x-api-key"),
        ])
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|origin| origin.trim().trim_end_matches('/').to_string())
        .filter(|origin| !origin.is_empty())
        .collect()
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
