//! Tag record queries
//!
//! Records are created once and read by `tag_id`; nothing updates them.

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::SqlitePool;

/// A tag record as returned to clients
///
/// Caller-supplied fields are flattened next to `tag_id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagRecord {
    pub tag_id: String,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct TagRow {
    tag_id: String,
    attributes: Json<Map<String, Value>>,
    created_at: DateTime<Utc>,
}

impl From<TagRow> for TagRecord {
    fn from(row: TagRow) -> Self {
        Self {
            tag_id: row.tag_id,
            attributes: row.attributes.0,
            created_at: row.created_at,
        }
    }
}

/// Persist a new record
pub async fn insert_tag(
    db: &SqlitePool,
    tag_id: &str,
    attributes: Map<String, Value>,
) -> Result<TagRecord, sqlx::Error> {
    let record = TagRecord {
        tag_id: tag_id.to_string(),
        attributes,
        created_at: Utc::now().trunc_subsecs(0),
    };

    sqlx::query("INSERT INTO tags (tag_id, attributes, created_at) VALUES (?, ?, ?)")
        .bind(&record.tag_id)
        .bind(Json(&record.attributes))
        .bind(record.created_at)
        .execute(db)
        .await?;

    Ok(record)
}

/// Look a record up by the identifier stored on the tag
pub async fn find_by_tag_id(
    db: &SqlitePool,
    tag_id: &str,
) -> Result<Option<TagRecord>, sqlx::Error> {
    let row = sqlx::query_as::<_, TagRow>(
        "SELECT tag_id, attributes, created_at FROM tags WHERE tag_id = ?",
    )
    .bind(tag_id)
    .fetch_optional(db)
    .await?;

    Ok(row.map(TagRecord::from))
}

/// Whether `tag_id` is already assigned
pub async fn tag_exists(db: &SqlitePool, tag_id: &str) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tags WHERE tag_id = ?")
        .bind(tag_id)
        .fetch_one(db)
        .await?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parcelock_common::db::init_memory_database;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_then_find() {
        let db = init_memory_database().await.unwrap();
        let mut attributes = Map::new();
        attributes.insert("role".to_string(), json!("customer"));
        attributes.insert("wallet".to_string(), json!("0xabc"));

        let created = insert_tag(&db, "K3J9QZ2A", attributes).await.unwrap();
        let found = find_by_tag_id(&db, "K3J9QZ2A").await.unwrap().unwrap();

        assert_eq!(found, created);
        assert!(tag_exists(&db, "K3J9QZ2A").await.unwrap());
    }

    #[tokio::test]
    async fn test_lookup_is_exact() {
        let db = init_memory_database().await.unwrap();
        insert_tag(&db, "K3J9QZ2A", Map::new()).await.unwrap();

        assert!(find_by_tag_id(&db, "K3J9QZ2A  ").await.unwrap().is_none());
        assert!(find_by_tag_id(&db, "k3j9qz2a").await.unwrap().is_none());
        assert!(!tag_exists(&db, "ZZZZZZZZ").await.unwrap());
    }

    #[test]
    fn test_record_serializes_flat() {
        let mut attributes = Map::new();
        attributes.insert("role".to_string(), json!("agent"));
        let record = TagRecord {
            tag_id: "ABCD1234".to_string(),
            attributes,
            created_at: DateTime::parse_from_rfc3339("2026-10-19T10:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({
                "tag_id": "ABCD1234",
                "role": "agent",
                "created_at": "2026-10-19T10:00:00Z"
            })
        );
    }
}
