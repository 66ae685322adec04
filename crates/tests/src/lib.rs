//! Shared harness for the HTTP integration tests: a scripted stand-in for the
//! Gemini endpoint plus request helpers around `tower::ServiceExt::oneshot`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use pantry_api::{build_app_with_config, ApiConfig};
use pantry_llm::LlmConfig;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tower::ServiceExt;

#[derive(Clone, Default)]
struct FakeState {
    replies: Arc<Mutex<VecDeque<(StatusCode, Value)>>>,
    calls: Arc<AtomicUsize>,
}

/// Local HTTP server answering `generateContent` calls from a reply queue.
pub struct FakeGemini {
    base_url: String,
    state: FakeState,
}

impl FakeGemini {
    pub async fn start() -> Self {
        let state = FakeState::default();
        let router = Router::new()
            .route("/v1beta/models/:call", post(generate_content))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("fake gemini should bind");
        let addr = listener.local_addr().expect("bound address");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Self {
            base_url: format!("http://{addr}/v1beta"),
            state,
        }
    }

    pub fn reply_text(&self, text: &str) {
        self.state.replies.lock().push_back((
            StatusCode::OK,
            json!({
                "candidates": [{
                    "content": { "role": "model", "parts": [{ "text": text }] }
                }]
            }),
        ));
    }

    pub fn reply_error(&self, status: StatusCode, api_status: &str, message: &str) {
        self.state.replies.lock().push_back((
            status,
            json!({
                "error": { "code": status.as_u16(), "message": message, "status": api_status }
            }),
        ));
    }

    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::Relaxed)
    }

    pub fn llm_config(&self) -> LlmConfig {
        LlmConfig {
            api_key: Some("test-gemini-key".to_string()),
            base_url: self.base_url.clone(),
            ..LlmConfig::default()
        }
    }
}

async fn generate_content(State(state): State<FakeState>) -> impl IntoResponse {
    state.calls.fetch_add(1, Ordering::Relaxed);
    let (status, body) = state.replies.lock().pop_front().unwrap_or((
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({ "error": { "code": 500, "message": "no scripted reply", "status": "INTERNAL" } }),
    ));
    (status, Json(body))
}

/// Config with no Gemini key and no API key.
pub fn offline_config() -> ApiConfig {
    ApiConfig::default()
}

pub fn config_with_model(gemini: &FakeGemini) -> ApiConfig {
    ApiConfig {
        llm: gemini.llm_config(),
        ..ApiConfig::default()
    }
}

pub async fn app(config: ApiConfig) -> Router {
    build_app_with_config(config)
        .await
        .expect("app should build")
}

pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("valid request")
}

pub fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("valid request")
}

/// Sends one request and decodes the body as JSON (`Null` when empty, a JSON
/// string when the body is plain text).
pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("router is infallible");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should be readable");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, body)
}
