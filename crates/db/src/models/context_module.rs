use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use super::memory_item::MemoryType;

/// Named selector over a project's memory items, used by the context packer.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ContextModule {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    /// JSON array of `MemoryType` values; empty means all types.
    pub memory_types: String,
    pub min_confidence: f64,
    /// JSON array of file-glob anchors; empty means no anchor filter.
    pub anchors: String,
    /// JSON array of workflow stage names.
    pub workflow_stages: String,
    pub priority: i64,
    /// JSON array of explicitly pinned memory item ids, in order.
    pub member_ids: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateContextModule {
    pub project_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub memory_types: Vec<MemoryType>,
    #[serde(default)]
    pub min_confidence: f64,
    #[serde(default)]
    pub anchors: Vec<String>,
    #[serde(default)]
    pub workflow_stages: Vec<String>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub member_ids: Vec<Uuid>,
}

impl ContextModule {
    pub fn memory_type_list(&self) -> Vec<MemoryType> {
        serde_json::from_str(&self.memory_types).unwrap_or_default()
    }

    pub fn anchor_list(&self) -> Vec<String> {
        serde_json::from_str(&self.anchors).unwrap_or_default()
    }

    pub fn workflow_stage_list(&self) -> Vec<String> {
        serde_json::from_str(&self.workflow_stages).unwrap_or_default()
    }

    pub fn member_id_list(&self) -> Vec<Uuid> {
        serde_json::from_str(&self.member_ids).unwrap_or_default()
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, ContextModule>(
            "SELECT id, project_id, name, memory_types, min_confidence, anchors,
                    workflow_stages, priority, member_ids, created_at, updated_at
             FROM context_modules
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
        sqlx::query_as::<_, ContextModule>(
            "SELECT id, project_id, name, memory_types, min_confidence, anchors,
                    workflow_stages, priority, member_ids, created_at, updated_at
             FROM context_modules
             WHERE project_id = ?
             ORDER BY priority DESC, name ASC",
        )
        .bind(project_id)
        .fetch_all(pool)
        .await
    }

    pub async fn create(
        pool: &SqlitePool,
        data: &CreateContextModule,
        id: Uuid,
    ) -> Result<Self, sqlx::Error> {
        let now = Utc::now();
        let memory_types =
            serde_json::to_string(&data.memory_types).unwrap_or_else(|_| "[]".to_string());
        let anchors = serde_json::to_string(&data.anchors).unwrap_or_else(|_| "[]".to_string());
        let stages =
            serde_json::to_string(&data.workflow_stages).unwrap_or_else(|_| "[]".to_string());
        let member_ids =
            serde_json::to_string(&data.member_ids).unwrap_or_else(|_| "[]".to_string());
        sqlx::query_as::<_, ContextModule>(
            "INSERT INTO context_modules
                 (id, project_id, name, memory_types, min_confidence, anchors,
                  workflow_stages, priority, member_ids, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id, project_id, name, memory_types, min_confidence, anchors,
                       workflow_stages, priority, member_ids, created_at, updated_at",
        )
        .bind(id)
        .bind(data.project_id)
        .bind(&data.name)
        .bind(memory_types)
        .bind(data.min_confidence)
        .bind(anchors)
        .bind(stages)
        .bind(data.priority)
        .bind(member_ids)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
    }

    pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM context_modules WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
