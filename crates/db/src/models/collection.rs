use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CollectionError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Collection not found")]
    NotFound,
    #[error("Collection name already in use")]
    NameTaken,
}

/// A curated local library of artifacts with a filesystem root.
/// Exactly one collection is "active" and provides CLI defaults.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Collection {
    pub id: Uuid,
    pub name: String,
    pub root_path: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateCollection {
    pub name: String,
    pub root_path: String,
}

impl Collection {
    pub async fn find_all(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Collection>(
            "SELECT id, name, root_path, is_active, created_at, updated_at
             FROM collections
             ORDER BY created_at ASC",
        )
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Collection>(
            "SELECT id, name, root_path, is_active, created_at, updated_at
             FROM collections
             WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_name(pool: &SqlitePool, name: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Collection>(
            "SELECT id, name, root_path, is_active, created_at, updated_at
             FROM collections
             WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(pool)
        .await
    }

    /// The active collection, if any. CLI defaults resolve against this.
    pub async fn find_active(pool: &SqlitePool) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Collection>(
            "SELECT id, name, root_path, is_active, created_at, updated_at
             FROM collections
             WHERE is_active = 1
             LIMIT 1",
        )
        .fetch_optional(pool)
        .await
    }

    pub async fn create(
        pool: &SqlitePool,
        data: &CreateCollection,
        id: Uuid,
    ) -> Result<Self, CollectionError> {
        let now = Utc::now();
        let result = sqlx::query_as::<_, Collection>(
            "INSERT INTO collections (id, name, root_path, is_active, created_at, updated_at)
             VALUES (?, ?, ?, 0, ?, ?)
             RETURNING id, name, root_path, is_active, created_at, updated_at",
        )
        .bind(id)
        .bind(&data.name)
        .bind(&data.root_path)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await;

        match result {
            Ok(row) => Ok(row),
            Err(err) if super::is_unique_violation(&err) => Err(CollectionError::NameTaken),
            Err(err) => Err(err.into()),
        }
    }

    /// Make this collection the active one, clearing the flag on every
    /// other collection in the same transaction.
    pub async fn set_active(pool: &SqlitePool, id: Uuid) -> Result<Self, CollectionError> {
        let mut tx = pool.begin().await?;
        sqlx::query("UPDATE collections SET is_active = 0 WHERE is_active = 1")
            .execute(&mut *tx)
            .await?;
        let updated = sqlx::query_as::<_, Collection>(
            "UPDATE collections
             SET is_active = 1, updated_at = ?
             WHERE id = ?
             RETURNING id, name, root_path, is_active, created_at, updated_at",
        )
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(CollectionError::NotFound)?;
        tx.commit().await?;
        Ok(updated)
    }

    pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM collections WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
