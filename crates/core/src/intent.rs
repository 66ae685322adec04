use serde_json::Value;

use crate::models::{Intent, IntentDecision};

pub const RATE_LIMITED_REPLY: &str =
    "I'm a bit overwhelmed with requests right now. Please wait a few seconds and try again!";
pub const UNAVAILABLE_REPLY: &str =
    "I'm sorry, I'm having trouble connecting to my brain right now.";
pub const DEFAULT_ACKNOWLEDGMENT: &str = "I received your message.";

/// Why a model payload could not become a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionRejection {
    NotAnObject,
    MissingIntent,
}

pub fn normalize_text(input: &str) -> String {
    input
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

pub fn build_classification_prompt(message: &str) -> String {
    let intents = Intent::ALL
        .iter()
        .map(|intent| format!("- \"{}\"", intent.as_str()))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are the Orchestrator for a Smart Inventory & Nutrition app.
The user sent the following message: "{message}"

Determine the primary intent of this message. The intent must be one of:
{intents}

CRITICAL:
1. Do NOT include any "Thinking" or "Reasoning" steps in your response text outside of the JSON.
2. Return ONLY a valid JSON object.

JSON Keys:
- "intent": One of the exact strings above.
- "extracted_data": If log_nutrition, put the food description. If inventory_query, put the items. Otherwise, an empty string.
- "response": A friendly, brief text response acknowledging their request."#
    )
}

/// Turns an extracted payload into a decision.
///
/// The second element carries the raw `intent` string when it was outside
/// the closed enumeration and the decision fell back to `general_chat`.
pub fn decision_from_payload(
    payload: &Value,
) -> Result<(IntentDecision, Option<String>), DecisionRejection> {
    let object = payload.as_object().ok_or(DecisionRejection::NotAnObject)?;
    let raw_intent = match object.get("intent") {
        Some(Value::String(value)) => value.clone(),
        Some(Value::Null) | None => return Err(DecisionRejection::MissingIntent),
        Some(other) => other.to_string(),
    };

    let (intent, unknown) = match Intent::parse(&raw_intent) {
        Some(intent) => (intent, None),
        None => (Intent::GeneralChat, Some(raw_intent)),
    };

    let extracted_data = match object.get("extracted_data") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.trim().to_string(),
        Some(other) => other.to_string(),
    };

    let response = object
        .get("response")
        .and_then(Value::as_str)
        .map(normalize_text)
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| DEFAULT_ACKNOWLEDGMENT.to_string());

    Ok((
        IntentDecision {
            intent,
            extracted_data,
            response,
        },
        unknown,
    ))
}

pub fn rate_limited_decision() -> IntentDecision {
    fallback_decision(RATE_LIMITED_REPLY)
}

pub fn unavailable_decision() -> IntentDecision {
    fallback_decision(UNAVAILABLE_REPLY)
}

fn fallback_decision(response: &str) -> IntentDecision {
    IntentDecision {
        intent: Intent::GeneralChat,
        extracted_data: String::new(),
        response: response.to_string(),
    }
}
