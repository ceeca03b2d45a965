use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool};
use uuid::Uuid;

/// Shape of a composite bundle.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    sqlx::Type,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CompositeType {
    Plugin,
    Stack,
    Suite,
    Skill,
}

/// A parent bundle whose logical content is a set of child artifacts.
///
/// For a skill with embedded sub-artifacts, `metadata` carries
/// `{"artifact_uuid": <skill uuid>}` back-referencing the companion
/// Artifact row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CompositeArtifact {
    pub id: Uuid,
    pub collection_id: Uuid,
    pub name: String,
    pub composite_type: CompositeType,
    pub metadata: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CompositeMembership {
    pub id: Uuid,
    pub composite_id: Uuid,
    pub child_artifact_uuid: Uuid,
    pub position: f64,
    pub created_at: DateTime<Utc>,
}

impl CompositeArtifact {
    /// Metadata key that back-references the companion skill Artifact.
    pub const ARTIFACT_UUID_KEY: &'static str = "artifact_uuid";

    pub fn artifact_uuid(&self) -> Option<Uuid> {
        let value: serde_json::Value = serde_json::from_str(self.metadata.as_deref()?).ok()?;
        value
            .get(Self::ARTIFACT_UUID_KEY)
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, CompositeArtifact>(
            "SELECT id, collection_id, name, composite_type, metadata, created_at, updated_at
             FROM composite_artifacts
             WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Companion composite for a skill Artifact, if one exists.
    pub async fn find_by_artifact_uuid(
        pool: &SqlitePool,
        artifact_uuid: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, CompositeArtifact>(
            "SELECT id, collection_id, name, composite_type, metadata, created_at, updated_at
             FROM composite_artifacts
             WHERE composite_type = 'skill'
               AND json_extract(metadata, '$.artifact_uuid') = ?",
        )
        .bind(artifact_uuid.to_string())
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_collection(
        pool: &SqlitePool,
        collection_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, CompositeArtifact>(
            "SELECT id, collection_id, name, composite_type, metadata, created_at, updated_at
             FROM composite_artifacts
             WHERE collection_id = ?
             ORDER BY created_at ASC",
        )
        .bind(collection_id)
        .fetch_all(pool)
        .await
    }

    pub async fn create_tx<'e, E>(
        executor: E,
        id: Uuid,
        collection_id: Uuid,
        name: &str,
        composite_type: CompositeType,
        metadata: Option<&serde_json::Value>,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now();
        let metadata = metadata.and_then(|m| serde_json::to_string(m).ok());
        sqlx::query_as::<_, CompositeArtifact>(
            "INSERT INTO composite_artifacts
                 (id, collection_id, name, composite_type, metadata, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING id, collection_id, name, composite_type, metadata, created_at, updated_at",
        )
        .bind(id)
        .bind(collection_id)
        .bind(name)
        .bind(composite_type)
        .bind(metadata)
        .bind(now)
        .bind(now)
        .fetch_one(executor)
        .await
    }

    pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM composite_artifacts WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}

impl CompositeMembership {
    /// Children of a composite in membership order.
    pub async fn find_by_composite(
        pool: &SqlitePool,
        composite_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, CompositeMembership>(
            "SELECT id, composite_id, child_artifact_uuid, position, created_at
             FROM composite_memberships
             WHERE composite_id = ?
             ORDER BY position ASC, created_at ASC",
        )
        .bind(composite_id)
        .fetch_all(pool)
        .await
    }

    /// Composites that contain the given artifact as a child.
    pub async fn find_by_child(
        pool: &SqlitePool,
        child_artifact_uuid: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, CompositeMembership>(
            "SELECT id, composite_id, child_artifact_uuid, position, created_at
             FROM composite_memberships
             WHERE child_artifact_uuid = ?",
        )
        .bind(child_artifact_uuid)
        .fetch_all(pool)
        .await
    }

    /// Idempotent membership insert; re-import of the same child is a no-op.
    pub async fn add_tx<'e, E>(
        executor: E,
        composite_id: Uuid,
        child_artifact_uuid: Uuid,
        position: f64,
    ) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            "INSERT INTO composite_memberships
                 (id, composite_id, child_artifact_uuid, position, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (composite_id, child_artifact_uuid) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(composite_id)
        .bind(child_artifact_uuid)
        .bind(position)
        .bind(Utc::now())
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn count_by_composite(
        pool: &SqlitePool,
        composite_id: Uuid,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM composite_memberships WHERE composite_id = ?",
        )
        .bind(composite_id)
        .fetch_one(pool)
        .await
    }
}
