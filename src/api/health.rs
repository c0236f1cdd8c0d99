use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Health check handler.
/// Returns JSON with status and a config summary; credentials are never included.
pub fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "status": "geekchat-bridge is running",
        "config": {
            "backend_model": config.backend.model,
            "base_path": config.server.base_path,
            "features": {
                "log_level": config.features.log_level,
                "stream_framing": config.features.stream_framing.to_string(),
                "aggregate_framing": config.features.aggregate_framing.to_string(),
                "strict_history": config.features.strict_history,
                "honor_stream_flag": config.features.honor_stream_flag,
            }
        }
    }))
}
