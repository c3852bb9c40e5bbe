//! Content verifier against a local stand-in provider
//!
//! Every failure must come back as a negative verdict, never an error.

mod helpers;

use helpers::{MockProvider, ProviderBehavior};
use parcelock_api::services::ContentVerifier;

#[tokio::test]
async fn test_matching_verdict_is_passed_through() {
    let provider = MockProvider::start(ProviderBehavior::answering(
        r#"{"isValidPackage": false, "reason": "Photo shows a coffee mug"}"#,
    ))
    .await;
    let verifier = ContentVerifier::new(provider.vision_config()).unwrap();

    let result = verifier
        .verify(
            Some(provider.url("/images/box.png").as_str()),
            Some("a pair of headphones"),
        )
        .await;

    assert!(!result.is_valid_package);
    assert_eq!(result.reason, "Photo shows a coffee mug");
    assert_eq!(provider.generate_calls(), 1);
}

#[tokio::test]
async fn test_fenced_verdict_is_accepted() {
    let provider = MockProvider::start(ProviderBehavior::answering(
        "```json\n{\"isValidPackage\": true, \"reason\": \"ok\"}\n```",
    ))
    .await;
    let verifier = ContentVerifier::new(provider.vision_config()).unwrap();

    let result = verifier
        .verify(Some(provider.url("/images/box.png").as_str()), Some("a box"))
        .await;

    assert!(result.is_valid_package);
    assert_eq!(result.reason, "ok");
}

#[tokio::test]
async fn test_malformed_verdict_is_negative() {
    let provider = MockProvider::start(ProviderBehavior::answering("Looks right to me!")).await;
    let verifier = ContentVerifier::new(provider.vision_config()).unwrap();

    let result = verifier
        .verify(Some(provider.url("/images/box.png").as_str()), Some("a box"))
        .await;

    assert!(!result.is_valid_package);
    assert!(result.reason.contains("malformed"));
}

#[tokio::test]
async fn test_image_http_error_is_negative() {
    let provider = MockProvider::start(ProviderBehavior::answering("unused")).await;
    let verifier = ContentVerifier::new(provider.vision_config()).unwrap();

    let result = verifier
        .verify(Some(provider.url("/images/missing.png").as_str()), Some("a box"))
        .await;

    assert!(!result.is_valid_package);
    assert!(result.reason.contains("Failed to retrieve image"));
    assert_eq!(provider.generate_calls(), 0);
}

#[tokio::test]
async fn test_upload_failure_is_negative() {
    let provider = MockProvider::start(ProviderBehavior {
        verdict: "unused".to_string(),
        fail_upload: true,
    })
    .await;
    let verifier = ContentVerifier::new(provider.vision_config()).unwrap();

    let result = verifier
        .verify(Some(provider.url("/images/box.png").as_str()), Some("a box"))
        .await;

    assert!(!result.is_valid_package);
    assert!(result.reason.contains("upload failed"));
    assert_eq!(provider.generate_calls(), 0);
}
