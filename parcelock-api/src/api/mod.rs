//! HTTP API handlers
//!
//! Every endpoint calls exactly one leaf component and maps its outcome to a
//! response. Paths keep their trailing slashes; web clients depend on them.

pub mod detect;
pub mod health;
pub mod servo;
pub mod tags;
pub mod verify;

use axum::{
    routing::{get, post},
    Router,
};

use crate::AppState;

pub use detect::detect_object;
pub use health::health_routes;
pub use servo::actuate_servo;
pub use tags::{create_tag, get_tag};
pub use verify::verify_package_content;

/// Device and verification endpoints
pub fn device_routes() -> Router<AppState> {
    Router::new()
        .route("/create_tag/", post(create_tag))
        .route("/get_tag/", get(get_tag))
        .route("/servo/", get(actuate_servo))
        .route("/verify_package_content", post(verify_package_content))
        .route("/verify_package/", post(verify_package_content))
        .route("/detect_object/", get(detect_object))
}
