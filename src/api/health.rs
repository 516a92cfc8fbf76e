use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// `GET /`: liveness plus a summary of the loaded configuration.
/// The backend is not contacted.
pub fn health_handler(state: &AppState) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "status": "msgbridge is running",
        "backend_url": state.backend.url().as_str(),
        "config": {
            "backend_models_count": config.backend.models.len(),
            "model_mapping_rules_count": state.model_mapper.rule_count(),
            "has_default_model": config.model_mapping.default.is_some(),
            "features": {
                "log_level": config.features.log_level,
                "image_placeholder": config.features.image_placeholder,
            }
        }
    }))
}
