//! parcelock-api library - locker device and package verification service
//!
//! Exposes the router and state for the binary and integration tests.

use axum::Router;
use chrono::{DateTime, Utc};
use parcelock_common::config::TomlConfig;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod db;
pub mod error;
pub mod hardware;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use crate::hardware::{ServoDriver, TagDriver};
use crate::services::{ActuatorController, ContentVerifier, TagTransceiver};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Tag record store
    pub db: SqlitePool,
    /// Tag reader/writer
    pub tags: TagTransceiver,
    /// Compartment servo
    pub actuator: ActuatorController,
    /// Remote package verifier
    pub verifier: Arc<ContentVerifier>,
    /// How long GET /servo/ keeps the compartment open
    pub servo_open_for: Duration,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// Wire the components together from configuration and the chosen drivers
    pub fn new(
        db: SqlitePool,
        config: &TomlConfig,
        tag_driver: Arc<dyn TagDriver>,
        servo_driver: Arc<dyn ServoDriver>,
    ) -> anyhow::Result<Self> {
        let verifier = ContentVerifier::new(config.vision.clone())?;

        Ok(Self {
            db,
            tags: TagTransceiver::new(tag_driver),
            actuator: ActuatorController::new(servo_driver, config.servo.close_hold()),
            verifier: Arc::new(verifier),
            servo_open_for: config.servo.open_duration(),
            startup_time: Utc::now(),
        })
    }
}

/// Build application router
///
/// Device routes are served both at the root and under `/api`.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::device_routes())
        .nest("/api", api::device_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
