//! Shared test fixtures: app construction and a local stand-in for the image
//! host and the vision model provider.

#![allow(dead_code)]

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json, Router,
};
use http_body_util::BodyExt;
use parcelock_api::hardware::{SimulatedServoDriver, SimulatedTagDriver};
use parcelock_api::{build_router, AppState};
use parcelock_common::config::{TomlConfig, VisionConfig};
use parcelock_common::db::init_memory_database;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Smallest byte sequence `infer` recognizes as PNG
pub const PNG_BYTES: &[u8] = &[
    0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D, b'I', b'H', b'D', b'R',
];

/// App plus handles on its simulated devices
pub struct TestApp {
    pub router: Router,
    pub tags: Arc<SimulatedTagDriver>,
    pub servo: Arc<SimulatedServoDriver>,
    pub state: AppState,
}

/// Build the app on an in-memory store with simulated devices
///
/// The servo holds for zero seconds so actuation tests return immediately.
pub async fn test_app(vision: VisionConfig) -> TestApp {
    let db = init_memory_database()
        .await
        .expect("Should create in-memory database");

    let mut config = TomlConfig::default();
    config.vision = vision;
    config.servo.open_secs = 0.0;
    config.servo.close_hold_secs = 0.0;

    let tags = Arc::new(SimulatedTagDriver::new());
    let servo = Arc::new(SimulatedServoDriver::new());

    let state = AppState::new(db, &config, tags.clone(), servo.clone())
        .expect("Should build app state");

    TestApp {
        router: build_router(state.clone()),
        tags,
        servo,
        state,
    }
}

/// Read a response body as JSON
pub async fn extract_json(body: Body) -> Value {
    let bytes = body
        .collect()
        .await
        .expect("Should read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

/// How the stand-in provider should behave
#[derive(Clone)]
pub struct ProviderBehavior {
    /// Text the model "generates"
    pub verdict: String,
    /// Reject the upload start request
    pub fail_upload: bool,
}

impl ProviderBehavior {
    pub fn answering(verdict: &str) -> Self {
        Self {
            verdict: verdict.to_string(),
            fail_upload: false,
        }
    }
}

#[derive(Clone)]
struct ProviderState {
    addr: SocketAddr,
    behavior: ProviderBehavior,
    generate_calls: Arc<AtomicUsize>,
}

/// Running stand-in server
pub struct MockProvider {
    pub addr: SocketAddr,
    generate_calls: Arc<AtomicUsize>,
}

impl MockProvider {
    /// Serves on an ephemeral port:
    /// - `GET /images/box.png`: a PNG
    /// - `GET /images/missing.png`: 404
    /// - `POST /upload/v1beta/files`: resumable upload start
    /// - `POST /upload/session`: upload finalize
    /// - `POST /v1beta/models/<model>:generateContent`: the configured verdict
    pub async fn start(behavior: ProviderBehavior) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Should bind mock provider");
        let addr = listener.local_addr().expect("Should have local address");
        let generate_calls = Arc::new(AtomicUsize::new(0));

        let state = ProviderState {
            addr,
            behavior,
            generate_calls: generate_calls.clone(),
        };
        // Dispatch by hand: model paths contain a colon
        let app = Router::new().fallback(dispatch).with_state(state);

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self {
            addr,
            generate_calls,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Vision settings pointing at this server
    pub fn vision_config(&self) -> VisionConfig {
        VisionConfig {
            api_key: Some("test-key".to_string()),
            base_url: self.url(""),
            timeout_secs: 5,
            ..VisionConfig::default()
        }
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }
}

async fn dispatch(State(state): State<ProviderState>, request: Request) -> Response {
    let path = request.uri().path().to_string();
    let method = request.method().clone();
    let has_key = request.headers().get("x-goog-api-key").is_some();
    let body: Bytes = request
        .into_body()
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .unwrap_or_default();

    match (method.as_str(), path.as_str()) {
        ("GET", "/images/box.png") => {
            ([(header::CONTENT_TYPE, "image/png")], PNG_BYTES).into_response()
        }
        ("POST", "/upload/v1beta/files") if !has_key => StatusCode::FORBIDDEN.into_response(),
        ("POST", "/upload/v1beta/files") if state.behavior.fail_upload => {
            (StatusCode::INTERNAL_SERVER_ERROR, "upload unavailable").into_response()
        }
        ("POST", "/upload/v1beta/files") => {
            let session = format!("http://{}/upload/session", state.addr);
            ([("x-goog-upload-url", session)], "").into_response()
        }
        ("POST", "/upload/session") if body.as_ref() == PNG_BYTES => Json(json!({
            "file": {
                "uri": format!("http://{}/v1beta/files/pkg-1", state.addr),
                "mimeType": "image/png"
            }
        }))
        .into_response(),
        ("POST", "/upload/session") => StatusCode::BAD_REQUEST.into_response(),
        ("POST", p) if p.starts_with("/v1beta/models/") && p.ends_with(":generateContent") => {
            state.generate_calls.fetch_add(1, Ordering::SeqCst);
            Json(json!({
                "candidates": [{
                    "content": { "parts": [{ "text": state.behavior.verdict }] }
                }]
            }))
            .into_response()
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}
