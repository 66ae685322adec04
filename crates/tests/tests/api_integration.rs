use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use pantry_api::ApiConfig;
use pantry_core::intent::{RATE_LIMITED_REPLY, UNAVAILABLE_REPLY};
use pantry_tests::{
    app, config_with_model, empty_request, json_request, offline_config, send, FakeGemini,
};
use serde_json::json;

#[tokio::test]
async fn health_is_public() {
    let app = app(ApiConfig {
        api_key: Some("secret".to_string()),
        ..offline_config()
    })
    .await;

    let (status, body) = send(&app, empty_request("GET", "/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["storage"], "memory");
    assert_eq!(body["llm_configured"], false);
}

#[tokio::test]
async fn configured_api_key_is_required() {
    let app = app(ApiConfig {
        api_key: Some("secret".to_string()),
        ..offline_config()
    })
    .await;

    let (status, body) = send(&app, empty_request("GET", "/v1/pantry")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let request = Request::builder()
        .method("GET")
        .uri("/v1/pantry")
        .header("x-api-key", "secret")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn pantry_crud_round_trip() {
    let app = app(offline_config()).await;

    let (status, created) = send(
        &app,
        json_request(
            "POST",
            "/v1/pantry",
            json!({ "name": " Milk ", "quantity": 2, "unit": "liters", "expiry_date": "2026-11-01" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["name"], "Milk");
    let id = created["id"].as_i64().unwrap();

    let (status, updated) = send(
        &app,
        json_request("PUT", &format!("/v1/pantry/{id}"), json!({ "quantity": 1.5 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["quantity"], 1.5);
    assert_eq!(updated["unit"], "liters");

    let (status, listed) = send(&app, empty_request("GET", "/v1/pantry")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let (status, _) = send(&app, empty_request("DELETE", &format!("/v1/pantry/{id}"))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&app, empty_request("DELETE", &format!("/v1/pantry/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn pantry_rejects_invalid_items() {
    let app = app(offline_config()).await;

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/v1/pantry",
            json!({ "name": "   ", "quantity": 1, "unit": "pcs" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");

    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/v1/pantry",
            json!({ "name": "Eggs", "quantity": -3, "unit": "pcs" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        json_request("PUT", "/v1/pantry/999", json!({ "quantity": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn nutrition_crud_round_trip() {
    let app = app(offline_config()).await;

    let (status, created) = send(
        &app,
        json_request(
            "POST",
            "/v1/nutrition",
            json!({
                "meal_name": "Oatmeal",
                "calories": 300,
                "protein": 10,
                "carbs": 54,
                "fat": 5,
                "date": "2026-10-01"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["date"], "2026-10-01");
    let id = created["id"].as_i64().unwrap();

    let (status, fetched) = send(&app, empty_request("GET", &format!("/v1/nutrition/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["meal_name"], "Oatmeal");

    let (status, _) = send(&app, empty_request("DELETE", &format!("/v1/nutrition/{id}"))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, empty_request("GET", &format!("/v1/nutrition/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn chat_without_model_falls_back_to_general_chat() {
    let app = app(offline_config()).await;

    let (status, body) = send(
        &app,
        json_request("POST", "/v1/agents/chat", json!({ "message": "log a banana" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["intent"], "general_chat");
    assert_eq!(body["response"], UNAVAILABLE_REPLY);
    assert_eq!(body["extracted_data"], "");
}

#[tokio::test]
async fn meal_analysis_without_model_is_unavailable() {
    let app = app(offline_config()).await;

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/v1/agents/nutrition/analyze",
            json!({ "meal_description": "two eggs and toast" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "ai_unavailable");
}

#[tokio::test]
async fn scan_rejects_non_image_uploads() {
    let app = app(offline_config()).await;

    let request = Request::builder()
        .method("POST")
        .uri("/v1/agents/vision/scan")
        .header("content-type", "text/plain")
        .body(Body::from("not an image"))
        .unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "File provided is not an image.");
}

#[tokio::test]
async fn summary_without_logs_does_not_call_model() {
    let gemini = FakeGemini::start().await;
    let app = app(config_with_model(&gemini)).await;

    let (status, body) = send(&app, empty_request("GET", "/v1/agents/nutrition/summary")).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["summary"].as_str().unwrap().contains("No nutrition logs"));
    assert_eq!(gemini.calls(), 0);
}

#[tokio::test]
async fn chat_classifies_fenced_model_output() {
    let gemini = FakeGemini::start().await;
    gemini.reply_text(
        "Sure! Here you go:\n```json\n{\"intent\": \"log_nutrition\", \"extracted_data\": \"banana\", \"response\": \"Logging your banana.\"}\n```",
    );
    let app = app(config_with_model(&gemini)).await;

    let (status, body) = send(
        &app,
        json_request("POST", "/v1/agents/chat", json!({ "message": "I ate a banana" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["intent"], "log_nutrition");
    assert_eq!(body["extracted_data"], "banana");
    assert_eq!(body["response"], "Logging your banana.");
    assert_eq!(gemini.calls(), 1);
}

#[tokio::test]
async fn chat_rate_limit_returns_busy_decision() {
    let gemini = FakeGemini::start().await;
    gemini.reply_error(
        StatusCode::TOO_MANY_REQUESTS,
        "RESOURCE_EXHAUSTED",
        "Quota exceeded",
    );
    let app = app(config_with_model(&gemini)).await;

    let (status, body) = send(
        &app,
        json_request("POST", "/v1/agents/chat", json!({ "message": "log a banana" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["intent"], "general_chat");
    assert_eq!(body["response"], RATE_LIMITED_REPLY);
    assert_eq!(body["extracted_data"], "");
}

#[tokio::test]
async fn meal_analysis_stores_a_nutrition_log() {
    let gemini = FakeGemini::start().await;
    gemini.reply_text(
        "{\"meal_name\": \"Banana\", \"calories\": 105, \"protein\": 1.3, \"carbs\": 27, \"fat\": 0.4}",
    );
    let app = app(config_with_model(&gemini)).await;

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/v1/agents/nutrition/analyze",
            json!({ "meal_description": "a banana" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["meal_name"], "Banana");
    assert_eq!(body["calories"], 105.0);

    let (status, logs) = send(&app, empty_request("GET", "/v1/nutrition")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(logs.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn meal_analysis_rate_limit_is_reported_as_busy() {
    let gemini = FakeGemini::start().await;
    gemini.reply_error(
        StatusCode::TOO_MANY_REQUESTS,
        "RESOURCE_EXHAUSTED",
        "Quota exceeded",
    );
    let app = app(config_with_model(&gemini)).await;

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/v1/agents/nutrition/analyze",
            json!({ "meal_description": "a banana" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "ai_busy");
}

#[tokio::test]
async fn recipes_with_wrong_shape_are_rejected() {
    let gemini = FakeGemini::start().await;
    gemini.reply_text("{\"name\": \"Not a list\"}");
    let app = app(config_with_model(&gemini)).await;

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/v1/agents/recipe/suggest",
            json!({ "preferences": "vegetarian", "time_of_day": "dinner" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "invalid_ai_response");
}

#[tokio::test]
async fn scan_returns_detected_items() {
    let gemini = FakeGemini::start().await;
    gemini.reply_text(
        "```json\n[{\"name\": \"Apple\", \"quantity\": 3, \"unit\": \"pcs\"}, {\"name\": \"Milk\", \"quantity\": 1, \"unit\": \"liter\"}]\n```",
    );
    let app = app(config_with_model(&gemini)).await;

    let request = Request::builder()
        .method("POST")
        .uri("/v1/agents/vision/scan")
        .header("content-type", "image/png")
        .body(Body::from(vec![0x89, b'P', b'N', b'G']))
        .unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK);
    let items = body.as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["name"], "Apple");
    assert_eq!(items[1]["unit"], "liter");
}

#[tokio::test]
async fn scan_can_add_detected_items_to_pantry() {
    let gemini = FakeGemini::start().await;
    gemini.reply_text("[{\"name\": \"Apple\", \"quantity\": 3, \"unit\": \"pcs\"}]");
    let app = app(config_with_model(&gemini)).await;

    let request = Request::builder()
        .method("POST")
        .uri("/v1/agents/vision/scan?add_to_pantry=true")
        .header("content-type", "image/jpeg")
        .body(Body::from(vec![0xff, 0xd8, 0xff]))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body[0]["id"].as_i64().is_some());

    let (_, pantry) = send(&app, empty_request("GET", "/v1/pantry")).await;
    assert_eq!(pantry.as_array().unwrap().len(), 1);
    assert_eq!(pantry[0]["name"], "Apple");
}

#[tokio::test]
async fn truncated_meal_estimate_is_rejected_and_not_stored() {
    let gemini = FakeGemini::start().await;
    gemini.reply_text("{\"meal_name\": \"Toast\", \"breakdown\": {\"calories\": 5}");
    let app = app(config_with_model(&gemini)).await;

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/v1/agents/nutrition/analyze",
            json!({ "meal_description": "toast" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "invalid_ai_response");

    let (_, logs) = send(&app, empty_request("GET", "/v1/nutrition")).await;
    assert!(logs.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn ask_returns_plain_text() {
    let gemini = FakeGemini::start().await;
    gemini.reply_text("  Store bananas away from apples.  ");
    let app = app(config_with_model(&gemini)).await;

    let (status, body) = send(
        &app,
        json_request("POST", "/v1/ask", json!({ "prompt": "how do I keep bananas fresh?" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"], "Store bananas away from apples.");
}

#[tokio::test]
async fn agent_routes_are_rate_limited_per_client() {
    let app = app(ApiConfig {
        agent_rate_limit_window: Duration::from_secs(60),
        agent_rate_limit_max: 1,
        ..offline_config()
    })
    .await;

    let chat = || json_request("POST", "/v1/agents/chat", json!({ "message": "hi" }));

    let (status, _) = send(&app, chat()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, chat()).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "rate_limited");

    let (status, _) = send(&app, empty_request("GET", "/v1/pantry")).await;
    assert_eq!(status, StatusCode::OK);
}
