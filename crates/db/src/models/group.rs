use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

/// Collection-scoped organizational container for artifacts.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Group {
    pub id: Uuid,
    pub collection_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateGroup {
    pub collection_id: Uuid,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct GroupMembership {
    pub id: Uuid,
    pub group_id: Uuid,
    pub artifact_uuid: Uuid,
    pub position: f64,
    pub created_at: DateTime<Utc>,
}

impl Group {
    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Group>(
            "SELECT id, collection_id, name, description, created_at, updated_at
             FROM groups
             WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_collection(
        pool: &SqlitePool,
        collection_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Group>(
            "SELECT id, collection_id, name, description, created_at, updated_at
             FROM groups
             WHERE collection_id = ?
             ORDER BY name ASC",
        )
        .bind(collection_id)
        .fetch_all(pool)
        .await
    }

    pub async fn create(
        pool: &SqlitePool,
        data: &CreateGroup,
        id: Uuid,
    ) -> Result<Self, sqlx::Error> {
        let now = Utc::now();
        sqlx::query_as::<_, Group>(
            "INSERT INTO groups (id, collection_id, name, description, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING id, collection_id, name, description, created_at, updated_at",
        )
        .bind(id)
        .bind(data.collection_id)
        .bind(&data.name)
        .bind(&data.description)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
    }

    pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM groups WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}

impl GroupMembership {
    /// Members of a group in position order.
    pub async fn find_by_group(pool: &SqlitePool, group_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, GroupMembership>(
            "SELECT id, group_id, artifact_uuid, position, created_at
             FROM group_memberships
             WHERE group_id = ?
             ORDER BY position ASC, created_at ASC",
        )
        .bind(group_id)
        .fetch_all(pool)
        .await
    }

    /// Idempotent add: re-adding the same artifact keeps the original row.
    pub async fn add(
        pool: &SqlitePool,
        group_id: Uuid,
        artifact_uuid: Uuid,
        position: f64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO group_memberships (id, group_id, artifact_uuid, position, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (group_id, artifact_uuid) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(group_id)
        .bind(artifact_uuid)
        .bind(position)
        .bind(Utc::now())
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn remove(
        pool: &SqlitePool,
        group_id: Uuid,
        artifact_uuid: Uuid,
    ) -> Result<u64, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM group_memberships WHERE group_id = ? AND artifact_uuid = ?")
                .bind(group_id)
                .bind(artifact_uuid)
                .execute(pool)
                .await?;
        Ok(result.rows_affected())
    }
}
