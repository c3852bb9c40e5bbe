//! Tag creation and lookup endpoints

use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use serde_json::{json, Map, Value};
use sqlx::SqlitePool;
use tracing::{debug, error, info, warn};

use crate::db::tags::{self, TagRecord};
use crate::error::{ApiError, ApiResult};
use crate::services::generate_key;
use crate::AppState;

/// Fields the server assigns; callers may not supply them
const RESERVED_FIELDS: &[&str] = &["id", "created_at"];

/// Fresh keys tried before giving up on a collision streak
const MAX_KEY_ATTEMPTS: usize = 5;

/// POST /create_tag/
///
/// Generates a key, burns it onto the presented tag and stores the record.
/// The body must not carry a `tag_id`; everything else in it is kept as
/// descriptive fields. Validation happens before the tag is written so a
/// rejected request never consumes a tag.
pub async fn create_tag(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<TagRecord>)> {
    let fields = parse_object(&body)?;
    let record = register_tag(&state, fields, generate_key).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// Validate `fields`, assign a key drawn from `next_key`, write it to the tag
/// and persist the record
async fn register_tag(
    state: &AppState,
    mut fields: Map<String, Value>,
    next_key: impl FnMut() -> String,
) -> ApiResult<TagRecord> {
    if fields.get("tag_id").is_some_and(|id| !id.is_null()) {
        return Err(ApiError::BadRequest("Tag ID is already initialized".to_string()));
    }
    fields.remove("tag_id");
    validate_fields(&fields)?;

    let tag_id = allocate_key(&state.db, next_key).await?;

    state
        .tags
        .write(&tag_id)
        .await
        .map_err(|e| ApiError::Hardware(format!("Failed to Assign Key: {}", e)))?;

    match tags::insert_tag(&state.db, &tag_id, fields).await {
        Ok(record) => {
            info!(tag_id = %record.tag_id, "Tag created");
            Ok(record)
        }
        Err(e) => {
            // The tag now carries a key with no record behind it
            error!(tag_id = %tag_id, "Tag written but record not stored: {}", e);
            Err(e.into())
        }
    }
}

/// GET /get_tag/
///
/// Waits for a tag, then returns the record whose id matches the tag's text
/// with surrounding padding trimmed.
pub async fn get_tag(State(state): State<AppState>) -> ApiResult<Json<TagRecord>> {
    let reading = state.tags.read().await?;
    let tag_id = reading.text.trim();
    debug!(hardware_id = reading.id, tag_id, "Looking up tag record");

    tags::find_by_tag_id(&state.db, tag_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Tag not found".to_string()))
}

/// Decode the request body as a JSON object; an empty body counts as `{}`
fn parse_object(body: &[u8]) -> ApiResult<Map<String, Value>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }

    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(_) => Err(ApiError::BadRequest(
            "Request body must be a JSON object".to_string(),
        )),
        Err(e) => Err(ApiError::BadRequest(format!("Invalid JSON body: {}", e))),
    }
}

fn validate_fields(fields: &Map<String, Value>) -> ApiResult<()> {
    let errors: Map<String, Value> = fields
        .keys()
        .filter_map(|key| {
            RESERVED_FIELDS
                .contains(&key.as_str())
                .then(|| (key.clone(), json!(["This field is reserved."])))
        })
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ApiError::Validation(errors))
    }
}

/// Draw keys from `next_key` until one is not yet present in the store
async fn allocate_key(
    db: &SqlitePool,
    mut next_key: impl FnMut() -> String,
) -> ApiResult<String> {
    for attempt in 1..=MAX_KEY_ATTEMPTS {
        let key = next_key();
        if !tags::tag_exists(db, &key).await? {
            return Ok(key);
        }
        warn!(attempt, key = %key, "Generated key already assigned, retrying");
    }

    Err(ApiError::Internal("Failed to Assign Key".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{SimulatedServoDriver, SimulatedTagDriver};
    use parcelock_common::config::TomlConfig;
    use parcelock_common::db::init_memory_database;
    use std::sync::Arc;

    #[test]
    fn test_empty_body_is_empty_object() {
        assert!(parse_object(b"").unwrap().is_empty());
        assert!(parse_object(b"  \n").unwrap().is_empty());
    }

    #[test]
    fn test_non_object_body_rejected() {
        assert!(matches!(parse_object(b"[1,2]"), Err(ApiError::BadRequest(_))));
        assert!(matches!(parse_object(b"{oops"), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn test_reserved_fields_rejected() {
        let fields = parse_object(br#"{"id": 3, "role": "customer"}"#).unwrap();
        match validate_fields(&fields) {
            Err(ApiError::Validation(errors)) => {
                assert!(errors.contains_key("id"));
                assert!(!errors.contains_key("role"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_ordinary_fields_accepted() {
        let fields = parse_object(br#"{"role": "agent", "wallet": "0xabc", "": 1}"#).unwrap();
        assert!(validate_fields(&fields).is_ok());
    }

    async fn test_state() -> (AppState, Arc<SimulatedTagDriver>) {
        let db = init_memory_database().await.unwrap();
        let reader = Arc::new(SimulatedTagDriver::new());
        let state = AppState::new(
            db,
            &TomlConfig::default(),
            reader.clone(),
            Arc::new(SimulatedServoDriver::new()),
        )
        .unwrap();
        (state, reader)
    }

    #[tokio::test]
    async fn test_colliding_keys_are_regenerated() {
        let (state, reader) = test_state().await;
        tags::insert_tag(&state.db, "AAAAAAAA", Map::new()).await.unwrap();
        tags::insert_tag(&state.db, "BBBBBBBB", Map::new()).await.unwrap();

        let mut keys = ["AAAAAAAA", "BBBBBBBB", "CCCCCCCC"].into_iter();
        let record = register_tag(&state, Map::new(), || {
            keys.next().unwrap().to_string()
        })
        .await
        .unwrap();

        assert_eq!(record.tag_id, "CCCCCCCC");
        assert_eq!(reader.write_count(), 1);
        assert_eq!(&reader.contents()[..8], b"CCCCCCCC");
    }

    #[tokio::test]
    async fn test_key_collision_streak_gives_up() {
        let (state, reader) = test_state().await;
        tags::insert_tag(&state.db, "AAAAAAAA", Map::new()).await.unwrap();

        let mut drawn = 0;
        let result = register_tag(&state, Map::new(), || {
            drawn += 1;
            "AAAAAAAA".to_string()
        })
        .await;

        match result {
            Err(ApiError::Internal(msg)) => assert_eq!(msg, "Failed to Assign Key"),
            other => panic!("expected internal error, got {:?}", other),
        }
        assert_eq!(drawn, MAX_KEY_ATTEMPTS);
        assert_eq!(reader.write_count(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_after_write_is_reported() {
        let (state, reader) = test_state().await;
        sqlx::query(
            "CREATE TRIGGER reject_tags BEFORE INSERT ON tags \
             BEGIN SELECT RAISE(ABORT, 'store unavailable'); END",
        )
        .execute(&state.db)
        .await
        .unwrap();

        let result = register_tag(&state, Map::new(), || "DDDDDDDD".to_string()).await;

        assert!(matches!(result, Err(ApiError::Database(_))));
        assert_eq!(reader.write_count(), 1);
        assert!(tags::find_by_tag_id(&state.db, "DDDDDDDD").await.unwrap().is_none());
    }
}
