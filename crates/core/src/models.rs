use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    LogNutrition,
    SuggestRecipe,
    VisionScan,
    InventoryQuery,
    GeneralChat,
}

impl Intent {
    pub const ALL: [Intent; 5] = [
        Intent::LogNutrition,
        Intent::SuggestRecipe,
        Intent::VisionScan,
        Intent::InventoryQuery,
        Intent::GeneralChat,
    ];

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "log_nutrition" => Some(Self::LogNutrition),
            "suggest_recipe" => Some(Self::SuggestRecipe),
            "vision_scan" => Some(Self::VisionScan),
            "inventory_query" => Some(Self::InventoryQuery),
            "general_chat" => Some(Self::GeneralChat),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::LogNutrition => "log_nutrition",
            Self::SuggestRecipe => "suggest_recipe",
            Self::VisionScan => "vision_scan",
            Self::InventoryQuery => "inventory_query",
            Self::GeneralChat => "general_chat",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of routing one chat message. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentDecision {
    pub intent: Intent,
    pub extracted_data: String,
    pub response: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatInput {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NutritionEstimate {
    #[serde(default = "unknown_meal")]
    pub meal_name: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub calories: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub protein: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub carbs: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub fat: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeSuggestion {
    pub name: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default, deserialize_with = "one_or_many")]
    pub missing_ingredients: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub instructions: Vec<String>,
    #[serde(default, deserialize_with = "rounded_i64")]
    pub estimated_calories: i64,
    #[serde(default, deserialize_with = "rounded_i64")]
    pub estimated_protein: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannedItem {
    pub name: String,
    #[serde(deserialize_with = "lenient_f64")]
    pub quantity: f64,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PantryItem {
    pub id: i64,
    pub name: String,
    pub quantity: f64,
    pub unit: String,
    pub expiry_date: Option<NaiveDate>,
    pub date_added: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPantryItem {
    pub name: String,
    pub quantity: f64,
    pub unit: String,
    #[serde(default)]
    pub expiry_date: Option<NaiveDate>,
}

impl From<ScannedItem> for NewPantryItem {
    fn from(item: ScannedItem) -> Self {
        Self {
            name: item.name,
            quantity: item.quantity,
            unit: item.unit,
            expiry_date: None,
        }
    }
}

/// Partial update; `None` leaves the stored field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PantryItemUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub expiry_date: Option<NaiveDate>,
}

impl PantryItemUpdate {
    pub fn apply_to(self, item: &mut PantryItem) {
        if let Some(name) = self.name {
            item.name = name;
        }
        if let Some(quantity) = self.quantity {
            item.quantity = quantity;
        }
        if let Some(unit) = self.unit {
            item.unit = unit;
        }
        if let Some(expiry_date) = self.expiry_date {
            item.expiry_date = Some(expiry_date);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NutritionLog {
    pub id: i64,
    pub date: NaiveDate,
    pub meal_name: String,
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNutritionLog {
    pub meal_name: String,
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

impl NewNutritionLog {
    pub fn from_estimate(estimate: NutritionEstimate) -> Self {
        Self {
            meal_name: estimate.meal_name,
            calories: estimate.calories,
            protein: estimate.protein,
            carbs: estimate.carbs,
            fat: estimate.fat,
            date: None,
        }
    }

    pub fn resolved_date(&self) -> NaiveDate {
        self.date.unwrap_or_else(|| Utc::now().date_naive())
    }
}

fn unknown_meal() -> String {
    "Unknown Meal".to_string()
}

fn number_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(0.0);
    }
    number_from_value(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("expected a number, got {value}")))
}

fn rounded_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    lenient_f64(deserializer).map(|value| value.round() as i64)
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(Vec::new()),
        Value::String(text) if text.trim().is_empty() => Ok(Vec::new()),
        Value::String(text) => Ok(vec![text]),
        Value::Array(values) => values
            .into_iter()
            .map(|value| match value {
                Value::String(text) => Ok(text),
                other => Err(serde::de::Error::custom(format!(
                    "expected a string entry, got {other}"
                ))),
            })
            .collect(),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or list of strings, got {other}"
        ))),
    }
}
