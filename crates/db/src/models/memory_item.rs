use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum MemoryItemError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Memory item not found")]
    NotFound,
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: MemoryStatus, to: MemoryStatus },
    #[error("An identical memory item already exists in this project")]
    DuplicateContent,
    #[error("Memory content exceeds 2000 characters")]
    ContentTooLong,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    sqlx::Type,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MemoryType {
    Decision,
    Constraint,
    Gotcha,
    StyleRule,
    Learning,
}

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
pub enum MemoryStatus {
    Candidate,
    Active,
    Stable,
    Deprecated,
}

impl MemoryStatus {
    /// Lifecycle: `candidate → active → stable` forward, any state may
    /// deprecate. Everything else is rejected.
    pub fn can_transition_to(self, to: MemoryStatus) -> bool {
        matches!(
            (self, to),
            (MemoryStatus::Candidate, MemoryStatus::Active)
                | (MemoryStatus::Active, MemoryStatus::Stable)
                | (_, MemoryStatus::Deprecated)
        )
    }
}

/// Where a memory item came from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Provenance {
    pub source_type: String,
    pub session_id: Option<String>,
    pub message_uuid: Option<String>,
    pub run_id: Option<String>,
    pub git_branch: Option<String>,
    pub commit_sha: Option<String>,
    pub created_by: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// An atomic project-scoped learning captured from an agent session.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: Uuid,
    pub project_id: Uuid,
    pub item_type: MemoryType,
    pub content: String,
    pub confidence: f64,
    pub status: MemoryStatus,
    /// JSON-serialized `Provenance`.
    pub provenance: String,
    /// JSON array of file globs / workflow stage names.
    pub anchors: String,
    pub ttl_policy: Option<String>,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deprecated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateMemoryItem {
    pub project_id: Uuid,
    pub item_type: MemoryType,
    pub content: String,
    pub confidence: f64,
    pub provenance: Provenance,
    #[serde(default)]
    pub anchors: Vec<String>,
    pub ttl_policy: Option<String>,
    pub content_hash: String,
}

impl MemoryItem {
    pub const MAX_CONTENT_CHARS: usize = 2000;

    pub fn provenance_value(&self) -> Provenance {
        serde_json::from_str(&self.provenance).unwrap_or_default()
    }

    pub fn anchor_list(&self) -> Vec<String> {
        serde_json::from_str(&self.anchors).unwrap_or_default()
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, MemoryItem>(
            "SELECT id, project_id, item_type, content, confidence, status, provenance,
                    anchors, ttl_policy, content_hash, created_at, updated_at, deprecated_at
             FROM memory_items
             WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_project(
        pool: &SqlitePool,
        project_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, MemoryItem>(
            "SELECT id, project_id, item_type, content, confidence, status, provenance,
                    anchors, ttl_policy, content_hash, created_at, updated_at, deprecated_at
             FROM memory_items
             WHERE project_id = ?
             ORDER BY created_at ASC",
        )
        .bind(project_id)
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_status(
        pool: &SqlitePool,
        project_id: Uuid,
        status: MemoryStatus,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, MemoryItem>(
            "SELECT id, project_id, item_type, content, confidence, status, provenance,
                    anchors, ttl_policy, content_hash, created_at, updated_at, deprecated_at
             FROM memory_items
             WHERE project_id = ? AND status = ?
             ORDER BY confidence DESC, updated_at DESC",
        )
        .bind(project_id)
        .bind(status)
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_type(
        pool: &SqlitePool,
        project_id: Uuid,
        item_type: MemoryType,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, MemoryItem>(
            "SELECT id, project_id, item_type, content, confidence, status, provenance,
                    anchors, ttl_policy, content_hash, created_at, updated_at, deprecated_at
             FROM memory_items
             WHERE project_id = ? AND item_type = ?
             ORDER BY confidence DESC, updated_at DESC",
        )
        .bind(project_id)
        .bind(item_type)
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_content_hash(
        pool: &SqlitePool,
        project_id: Uuid,
        content_hash: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, MemoryItem>(
            "SELECT id, project_id, item_type, content, confidence, status, provenance,
                    anchors, ttl_policy, content_hash, created_at, updated_at, deprecated_at
             FROM memory_items
             WHERE project_id = ? AND content_hash = ?",
        )
        .bind(project_id)
        .bind(content_hash)
        .fetch_optional(pool)
        .await
    }

    /// Insert a candidate. The `(project_id, content_hash)` unique key makes
    /// exact-duplicate inserts fail with `DuplicateContent`.
    pub async fn create_tx<'e, E>(
        executor: E,
        data: &CreateMemoryItem,
        id: Uuid,
    ) -> Result<Self, MemoryItemError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        if data.content.chars().count() > Self::MAX_CONTENT_CHARS {
            return Err(MemoryItemError::ContentTooLong);
        }
        let now = Utc::now();
        let provenance =
            serde_json::to_string(&data.provenance).unwrap_or_else(|_| "{}".to_string());
        let anchors = serde_json::to_string(&data.anchors).unwrap_or_else(|_| "[]".to_string());
        let result = sqlx::query_as::<_, MemoryItem>(
            "INSERT INTO memory_items
                 (id, project_id, item_type, content, confidence, status, provenance,
                  anchors, ttl_policy, content_hash, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, 'candidate', ?, ?, ?, ?, ?, ?)
             RETURNING id, project_id, item_type, content, confidence, status, provenance,
                       anchors, ttl_policy, content_hash, created_at, updated_at, deprecated_at",
        )
        .bind(id)
        .bind(data.project_id)
        .bind(data.item_type)
        .bind(&data.content)
        .bind(data.confidence.clamp(0.0, 1.0))
        .bind(provenance)
        .bind(anchors)
        .bind(&data.ttl_policy)
        .bind(&data.content_hash)
        .bind(now)
        .bind(now)
        .fetch_one(executor)
        .await;
        match result {
            Ok(row) => Ok(row),
            Err(err) if super::is_unique_violation(&err) => Err(MemoryItemError::DuplicateContent),
            Err(err) => Err(err.into()),
        }
    }

    /// Move an item through its lifecycle, enforcing the transition guard.
    pub async fn transition(
        pool: &SqlitePool,
        id: Uuid,
        to: MemoryStatus,
    ) -> Result<Self, MemoryItemError> {
        let existing = Self::find_by_id(pool, id)
            .await?
            .ok_or(MemoryItemError::NotFound)?;
        if !existing.status.can_transition_to(to) {
            return Err(MemoryItemError::InvalidTransition {
                from: existing.status,
                to,
            });
        }
        let now = Utc::now();
        let deprecated_at = (to == MemoryStatus::Deprecated).then_some(now);
        let row = sqlx::query_as::<_, MemoryItem>(
            "UPDATE memory_items
             SET status = ?, updated_at = ?, deprecated_at = COALESCE(?, deprecated_at)
             WHERE id = ?
             RETURNING id, project_id, item_type, content, confidence, status, provenance,
                       anchors, ttl_policy, content_hash, created_at, updated_at, deprecated_at",
        )
        .bind(to)
        .bind(now)
        .bind(deprecated_at)
        .bind(id)
        .fetch_one(pool)
        .await?;
        Ok(row)
    }

    /// Raise confidence and extend anchors on a surviving merge winner.
    pub async fn absorb_tx<'e, E>(
        executor: E,
        id: Uuid,
        confidence: f64,
        anchors: &[String],
    ) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let anchors = serde_json::to_string(anchors).unwrap_or_else(|_| "[]".to_string());
        sqlx::query(
            "UPDATE memory_items
             SET confidence = ?, anchors = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(confidence.clamp(0.0, 1.0))
        .bind(anchors)
        .bind(Utc::now())
        .bind(id)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM memory_items WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::project::{CreateProject, Project};

    async fn seed(pool: &SqlitePool, project_id: Uuid, content: &str) -> MemoryItem {
        let mut conn = pool.acquire().await.unwrap();
        MemoryItem::create_tx(
            &mut *conn,
            &CreateMemoryItem {
                project_id,
                item_type: MemoryType::Gotcha,
                content: content.to_string(),
                confidence: 0.7,
                provenance: Provenance {
                    source_type: "memory_extraction".to_string(),
                    session_id: Some("sess".to_string()),
                    ..Default::default()
                },
                anchors: Vec::new(),
                ttl_policy: None,
                content_hash: format!("hash-{content}"),
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap()
    }

    async fn project(dbs: &crate::DBService) -> Project {
        Project::create(
            &dbs.pool,
            &CreateProject {
                name: "demo".to_string(),
                path: "/tmp/demo".to_string(),
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn lifecycle_moves_forward_only() {
        let dbs = crate::DBService::new_in_memory().await.unwrap();
        let project = project(&dbs).await;
        let item = seed(&dbs.pool, project.id, "the pool deadlocks at one connection").await;
        assert_eq!(item.status, MemoryStatus::Candidate);

        // candidate -> stable skips a stage and is rejected.
        let err = MemoryItem::transition(&dbs.pool, item.id, MemoryStatus::Stable)
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryItemError::InvalidTransition { .. }));

        let active = MemoryItem::transition(&dbs.pool, item.id, MemoryStatus::Active)
            .await
            .unwrap();
        let stable = MemoryItem::transition(&dbs.pool, active.id, MemoryStatus::Stable)
            .await
            .unwrap();
        assert_eq!(stable.status, MemoryStatus::Stable);

        // Any state may deprecate, and deprecation is terminal.
        let deprecated = MemoryItem::transition(&dbs.pool, stable.id, MemoryStatus::Deprecated)
            .await
            .unwrap();
        assert!(deprecated.deprecated_at.is_some());
        let err = MemoryItem::transition(&dbs.pool, deprecated.id, MemoryStatus::Active)
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryItemError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn duplicate_content_hash_is_rejected_per_project() {
        let dbs = crate::DBService::new_in_memory().await.unwrap();
        let project = project(&dbs).await;
        seed(&dbs.pool, project.id, "same learning").await;
        let mut conn = dbs.pool.acquire().await.unwrap();
        let err = MemoryItem::create_tx(
            &mut *conn,
            &CreateMemoryItem {
                project_id: project.id,
                item_type: MemoryType::Learning,
                content: "same learning".to_string(),
                confidence: 0.6,
                provenance: Provenance::default(),
                anchors: Vec::new(),
                ttl_policy: None,
                content_hash: "hash-same learning".to_string(),
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, MemoryItemError::DuplicateContent));
    }

    #[tokio::test]
    async fn content_length_is_capped() {
        let dbs = crate::DBService::new_in_memory().await.unwrap();
        let project = project(&dbs).await;
        let mut conn = dbs.pool.acquire().await.unwrap();
        let err = MemoryItem::create_tx(
            &mut *conn,
            &CreateMemoryItem {
                project_id: project.id,
                item_type: MemoryType::Learning,
                content: "x".repeat(2001),
                confidence: 0.6,
                provenance: Provenance::default(),
                anchors: Vec::new(),
                ttl_policy: None,
                content_hash: "long".to_string(),
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, MemoryItemError::ContentTooLong));
    }
}
