use crate::models::{NutritionLog, PantryItem};

pub const EMPTY_PANTRY: &str = "No items in pantry.";

pub fn meal_analysis_prompt(meal_description: &str) -> String {
    format!(
        r#"Analyze the following meal description and estimate its nutritional content.
Meal: "{meal_description}"

Provide a reasonable estimate for:
- "meal_name": A short title for the meal
- "calories": Estimated calories (integer)
- "protein": Estimated protein in grams (integer)
- "carbs": Estimated carbohydrates in grams (integer)
- "fat": Estimated fat in grams (integer)

Return the output ONLY as a valid JSON object with exactly these keys.
Do not include markdown code block formatting like ```json."#
    )
}

pub fn recipe_prompt(pantry: &[PantryItem], preferences: &str, time_of_day: &str) -> String {
    let pantry_context = if pantry.is_empty() {
        EMPTY_PANTRY.to_string()
    } else {
        pantry
            .iter()
            .map(|item| format!("- {}: {} {}", item.name, item.quantity, item.unit))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        r#"You are an expert culinary AI aimed at reducing food waste for a solo-living adult.
Based on the following available ingredients in the user's pantry:
{pantry_context}

User dietary preferences/restrictions: {preferences}
Current time of day / meal type requested: {time_of_day}

Suggest up to 3 recipes that prioritize using the ingredients currently available, especially those that might expire soon (if applicable).
You can assume basic staples like oil, salt, and pepper are available.

For each recipe, provide:
- "name": Recipe name
- "reasoning": Why this recipe was suggested based on their pantry and goals
- "missing_ingredients": Any extra ingredients they need to buy
- "instructions": Brief, step-by-step instructions
- "estimated_calories": An estimated calorie count (integer)
- "estimated_protein": Estimated protein in grams (integer)

Return the output ONLY as a valid JSON array of objects conforming to these keys.
Do not include markdown code block formatting like ```json in your response, just the raw JSON."#
    )
}

pub fn vision_prompt() -> &'static str {
    r#"Analyze this image of groceries (either from a fridge/pantry or a receipt).
Identify all the distinct food items visible.
For each item, estimate the quantity and provide an appropriate unit (e.g., "count", "kg", "liters", "grams").
If the image is a receipt, extract the exact items and quantities.

Return the output ONLY as a valid JSON array of objects.
Each object must have exactly these three keys:
- "name" (string)
- "quantity" (float)
- "unit" (string)

Example output format:
[
  {"name": "Milk", "quantity": 1.0, "unit": "liters"},
  {"name": "Eggs", "quantity": 12.0, "unit": "count"},
  {"name": "Apples", "quantity": 0.5, "unit": "kg"}
]
Do not include markdown code block formatting like ```json in your response, just the raw JSON."#
}

pub fn health_summary_prompt(logs: &[NutritionLog]) -> String {
    let logs_context = logs
        .iter()
        .map(|log| {
            format!(
                "- {}: {} ({} kcal, {}g protein, {}g carbs, {}g fat)",
                log.date, log.meal_name, log.calories, log.protein, log.carbs, log.fat
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are an expert nutritionist AI. Analyze the user's recent meal logs:
{logs_context}

Provide a short, encouraging summary of their eating habits. Point out any trends
(e.g., high protein, low carb, very high calorie) and give 1-2 actionable tips
for their next meal based on common dietary goals (balance macros, moderate calories).
Keep it mostly brief and conversational. Do not use JSON."#
    )
}
