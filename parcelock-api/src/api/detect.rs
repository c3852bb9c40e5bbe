//! Object detection placeholder

use axum::Json;
use serde_json::{json, Value};

/// GET /detect_object/
///
/// Stub until on-device detection exists; always reports success.
pub async fn detect_object() -> Json<Value> {
    Json(json!({ "status": true }))
}
