//! Compartment actuation endpoint

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::error::ApiResult;
use crate::AppState;

/// GET /servo/
///
/// Opens the compartment for the configured interval (10s by default), closes
/// it, and only then responds.
pub async fn actuate_servo(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    state.actuator.actuate(state.servo_open_for).await?;
    Ok(Json(json!({ "message": "success" })))
}
