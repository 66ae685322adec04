pub mod intent;
pub mod models;
pub mod normalize;
pub mod prompts;

pub use intent::{
    build_classification_prompt, decision_from_payload, normalize_text, rate_limited_decision,
    unavailable_decision, DecisionRejection,
};
pub use models::*;
pub use normalize::{extract_as, extract_structured, NormalizeError};
