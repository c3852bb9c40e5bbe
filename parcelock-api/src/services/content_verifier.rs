//! Package content verification against a remote vision-language model
//!
//! Pipeline, strictly sequential:
//! 1. Download the photo from `image_url`
//! 2. Stage it in a unique scratch file (removed on every exit path)
//! 3. Upload the file to the model provider, obtaining a file URI
//! 4. Ask the model whether the photo matches the product description,
//!    in JSON mode at low temperature
//! 5. Parse the JSON verdict
//!
//! Any failure is folded into a negative verdict whose `reason` says what went
//! wrong; `verify` never returns an error.

use parcelock_common::config::{VisionConfig, ENV_VISION_API_KEY};
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::io::Write;
use std::path::Path;
use std::time::Instant;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

const USER_AGENT: &str = concat!("parcelock/", env!("CARGO_PKG_VERSION"));
const FALLBACK_MIME: &str = "image/jpeg";
const MAX_OUTPUT_TOKENS: u32 = 256;

/// Model verdict, serialized with the field names clients expect
///
/// Anything else the model adds to its JSON is passed through in `extra`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    #[serde(rename = "isValidPackage")]
    pub is_valid_package: bool,
    pub reason: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl VerificationResult {
    /// Negative verdict carrying a failure description
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            is_valid_package: false,
            reason: reason.into(),
            extra: Map::new(),
        }
    }
}

/// Why a verification could not be completed
#[derive(Debug, Error)]
enum VerifyError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Vision API key not configured (set {})", ENV_VISION_API_KEY)]
    MissingApiKey,

    #[error("Failed to retrieve image: {0}")]
    Retrieval(String),

    #[error("Failed to retrieve image: HTTP {0}")]
    RetrievalStatus(u16),

    #[error("Failed to stage image: {0}")]
    Staging(#[from] std::io::Error),

    #[error("Image upload failed: {0}")]
    Upload(String),

    #[error("Model request failed: {0}")]
    Generation(String),

    #[error("Model returned a malformed verdict: {0}")]
    MalformedVerdict(String),
}

struct FetchedImage {
    bytes: Vec<u8>,
    mime_type: String,
    extension: &'static str,
}

/// File reference returned by the provider's upload endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadedFile {
    uri: String,
    #[serde(default)]
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: UploadedFile,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

/// Instruction sent alongside the photo
pub fn build_prompt(product_description: &str) -> String {
    format!(
        "You are verifying the contents of a delivery package.\n\
         Product description: \"{}\"\n\
         Decide whether the item in the image is the product described. \
         Ignore minor visual details such as lighting, angle, packaging colour or \
         background, and focus on the core identity of the object.\n\
         Respond strictly as JSON with exactly these fields:\n\
         {{\"isValidPackage\": <true or false>, \"reason\": \"<one short sentence>\"}}",
        product_description
    )
}

/// Parse the model's text into a verdict
///
/// Tolerates a Markdown code fence around the JSON.
pub fn parse_verdict(text: &str) -> Result<VerificationResult, String> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    serde_json::from_str(body).map_err(|e| e.to_string())
}

/// Best MIME type for an image: sniffed bytes, then the server's header, then JPEG
fn detect_image_type(bytes: &[u8], content_type: Option<&str>) -> (String, &'static str) {
    if let Some(kind) = infer::get(bytes) {
        if kind.matcher_type() == infer::MatcherType::Image {
            return (kind.mime_type().to_string(), kind.extension());
        }
    }

    let declared = content_type
        .and_then(|ct| ct.split(';').next())
        .map(str::trim)
        .filter(|mime| mime.starts_with("image/"));

    match declared {
        Some(mime) => (mime.to_string(), "img"),
        None => (FALLBACK_MIME.to_string(), "jpg"),
    }
}

/// Verifies package photos with a remote multimodal model
pub struct ContentVerifier {
    http_client: reqwest::Client,
    config: VisionConfig,
}

impl ContentVerifier {
    pub fn new(config: VisionConfig) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            http_client,
            config,
        })
    }

    /// Judge whether the photo at `image_url` shows `product_description`
    ///
    /// Never fails: problems are reported as `isValidPackage: false`.
    pub async fn verify(
        &self,
        image_url: Option<&str>,
        product_description: Option<&str>,
    ) -> VerificationResult {
        let started = Instant::now();

        match self.try_verify(image_url, product_description).await {
            Ok(result) => {
                info!(
                    valid = result.is_valid_package,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Package verification complete"
                );
                result
            }
            Err(e) => {
                warn!(
                    image_url = image_url.unwrap_or("<none>"),
                    "Package verification failed: {}",
                    e
                );
                VerificationResult::rejected(e.to_string())
            }
        }
    }

    async fn try_verify(
        &self,
        image_url: Option<&str>,
        product_description: Option<&str>,
    ) -> Result<VerificationResult, VerifyError> {
        let image_url = image_url
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or(VerifyError::MissingField("image_url"))?;
        let description = product_description
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .ok_or(VerifyError::MissingField("product_description"))?;
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(VerifyError::MissingApiKey)?;

        let image = self.fetch_image(image_url).await?;

        // Deleted when `staged` drops, including on early return
        let staged = stage_image(&image)?;
        let file = self
            .upload_image(staged.path(), &image.mime_type, api_key)
            .await?;
        drop(staged);

        let text = self
            .generate(&file, &image.mime_type, description, api_key)
            .await?;

        parse_verdict(&text).map_err(VerifyError::MalformedVerdict)
    }

    async fn fetch_image(&self, image_url: &str) -> Result<FetchedImage, VerifyError> {
        debug!(image_url, "Downloading package image");

        let response = self
            .http_client
            .get(image_url)
            .send()
            .await
            .map_err(|e| VerifyError::Retrieval(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(VerifyError::RetrievalStatus(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| VerifyError::Retrieval(e.to_string()))?
            .to_vec();

        if bytes.is_empty() {
            return Err(VerifyError::Retrieval("empty response body".to_string()));
        }

        let (mime_type, extension) = detect_image_type(&bytes, content_type.as_deref());
        debug!(bytes = bytes.len(), mime_type = %mime_type, "Image downloaded");

        Ok(FetchedImage {
            bytes,
            mime_type,
            extension,
        })
    }

    /// Resumable upload: `start` returns a session URL, then one
    /// `upload, finalize` request carries the bytes
    async fn upload_image(
        &self,
        path: &Path,
        mime_type: &str,
        api_key: &str,
    ) -> Result<UploadedFile, VerifyError> {
        let bytes = tokio::fs::read(path).await?;
        let start_url = format!(
            "{}/upload/v1beta/files",
            self.config.base_url.trim_end_matches('/')
        );

        let start = self
            .http_client
            .post(&start_url)
            .header("x-goog-api-key", api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", bytes.len().to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&json!({ "file": { "display_name": "package-image" } }))
            .send()
            .await
            .map_err(|e| VerifyError::Upload(e.to_string()))?;

        if !start.status().is_success() {
            let status = start.status().as_u16();
            let body = start.text().await.unwrap_or_default();
            return Err(VerifyError::Upload(format!("HTTP {}: {}", status, body)));
        }

        let session_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| VerifyError::Upload("provider returned no upload URL".to_string()))?;

        let finish = self
            .http_client
            .post(&session_url)
            .header("x-goog-api-key", api_key)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(bytes)
            .send()
            .await
            .map_err(|e| VerifyError::Upload(e.to_string()))?;

        if !finish.status().is_success() {
            let status = finish.status().as_u16();
            let body = finish.text().await.unwrap_or_default();
            return Err(VerifyError::Upload(format!("HTTP {}: {}", status, body)));
        }

        let uploaded: UploadResponse = finish
            .json()
            .await
            .map_err(|e| VerifyError::Upload(format!("unreadable upload response: {}", e)))?;

        debug!(uri = %uploaded.file.uri, "Image uploaded to model provider");
        Ok(uploaded.file)
    }

    async fn generate(
        &self,
        file: &UploadedFile,
        fallback_mime: &str,
        description: &str,
        api_key: &str,
    ) -> Result<String, VerifyError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        );

        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {
                        "fileData": {
                            "mimeType": file.mime_type.as_deref().unwrap_or(fallback_mime),
                            "fileUri": file.uri,
                        }
                    },
                    { "text": build_prompt(description) }
                ]
            }],
            "generationConfig": {
                "temperature": self.config.temperature,
                "topP": self.config.top_p,
                "topK": self.config.top_k,
                "maxOutputTokens": MAX_OUTPUT_TOKENS,
                "responseMimeType": "application/json"
            }
        });

        let response = self
            .http_client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| VerifyError::Generation(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(VerifyError::Generation(format!(
                "HTTP {}: {}",
                status.as_u16(),
                error_text
            )));
        }

        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| VerifyError::Generation(format!("unreadable response: {}", e)))?;

        if let Some(reason) = generated.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(VerifyError::Generation(format!("prompt blocked: {}", reason)));
        }

        generated
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .find_map(|p| p.text)
            .ok_or_else(|| VerifyError::Generation("response contained no text".to_string()))
    }
}

fn stage_image(image: &FetchedImage) -> Result<NamedTempFile, VerifyError> {
    let mut staged = tempfile::Builder::new()
        .prefix("parcelock-verify-")
        .suffix(&format!(".{}", image.extension))
        .tempfile()?;
    staged.write_all(&image.bytes)?;
    staged.flush()?;
    Ok(staged)
}
