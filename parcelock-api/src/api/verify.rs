//! Package verification endpoint

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    Json,
};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::services::VerificationResult;
use crate::AppState;

/// Verification request body
#[derive(Debug, Default, Deserialize)]
pub struct VerifyRequest {
    pub image_url: Option<String>,
    pub product_description: Option<String>,
}

/// POST /verify_package_content (alias: POST /verify_package/)
///
/// Always 200. A body that cannot be buffered (over the size limit, broken
/// stream) or parsed is treated as empty, which the verifier reports as a
/// negative result naming the missing field.
pub async fn verify_package_content(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Json<VerificationResult> {
    let request: VerifyRequest = match body {
        Ok(body) => serde_json::from_slice(&body).unwrap_or_else(|e| {
            debug!("Unreadable verification request body: {}", e);
            VerifyRequest::default()
        }),
        Err(rejection) => {
            warn!("Verification request body rejected: {}", rejection);
            VerifyRequest::default()
        }
    };

    Json(
        state
            .verifier
            .verify(
                request.image_url.as_deref(),
                request.product_description.as_deref(),
            )
            .await,
    )
}
