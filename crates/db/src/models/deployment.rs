use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool};
use uuid::Uuid;

/// Record of one artifact deployed into one project under a platform
/// profile. `is_modified` is derived at read time by the deployment engine,
/// never stored.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Deployment {
    pub id: Uuid,
    pub artifact_uuid: Uuid,
    pub project_id: Uuid,
    pub profile_id: String,
    /// Artifact content hash at deploy time; drift compares against this.
    pub source_content_hash: String,
    /// Absolute path of the deployed artifact root.
    pub deployed_path: String,
    pub deployed_at: DateTime<Utc>,
}

impl Deployment {
    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Deployment>(
            "SELECT id, artifact_uuid, project_id, profile_id, source_content_hash,
                    deployed_path, deployed_at
             FROM deployments
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
        sqlx::query_as::<_, Deployment>(
            "SELECT id, artifact_uuid, project_id, profile_id, source_content_hash,
                    deployed_path, deployed_at
             FROM deployments
             WHERE project_id = ?
             ORDER BY deployed_at DESC",
        )
        .bind(project_id)
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_artifact(
        pool: &SqlitePool,
        artifact_uuid: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Deployment>(
            "SELECT id, artifact_uuid, project_id, profile_id, source_content_hash,
                    deployed_path, deployed_at
             FROM deployments
             WHERE artifact_uuid = ?
             ORDER BY deployed_at DESC",
        )
        .bind(artifact_uuid)
        .fetch_all(pool)
        .await
    }

    pub async fn find_for_target(
        pool: &SqlitePool,
        artifact_uuid: Uuid,
        project_id: Uuid,
        profile_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Deployment>(
            "SELECT id, artifact_uuid, project_id, profile_id, source_content_hash,
                    deployed_path, deployed_at
             FROM deployments
             WHERE artifact_uuid = ? AND project_id = ? AND profile_id = ?",
        )
        .bind(artifact_uuid)
        .bind(project_id)
        .bind(profile_id)
        .fetch_optional(pool)
        .await
    }

    /// Upsert on `(artifact_uuid, project_id, profile_id)`: a re-deploy
    /// refreshes the hash, path, and timestamp on the existing row.
    pub async fn upsert_tx<'e, E>(
        executor: E,
        artifact_uuid: Uuid,
        project_id: Uuid,
        profile_id: &str,
        source_content_hash: &str,
        deployed_path: &str,
        deployed_at: DateTime<Utc>,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Deployment>(
            "INSERT INTO deployments
                 (id, artifact_uuid, project_id, profile_id, source_content_hash,
                  deployed_path, deployed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (artifact_uuid, project_id, profile_id) DO UPDATE SET
                 source_content_hash = excluded.source_content_hash,
                 deployed_path = excluded.deployed_path,
                 deployed_at = excluded.deployed_at
             RETURNING id, artifact_uuid, project_id, profile_id, source_content_hash,
                       deployed_path, deployed_at",
        )
        .bind(Uuid::new_v4())
        .bind(artifact_uuid)
        .bind(project_id)
        .bind(profile_id)
        .bind(source_content_hash)
        .bind(deployed_path)
        .bind(deployed_at)
        .fetch_one(executor)
        .await
    }

    /// Update the recorded source hash after a sync rewrote deployed files.
    pub async fn update_source_hash_tx<'e, E>(
        executor: E,
        id: Uuid,
        source_content_hash: &str,
    ) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query("UPDATE deployments SET source_content_hash = ?, deployed_at = ? WHERE id = ?")
            .bind(source_content_hash)
            .bind(Utc::now())
            .bind(id)
            .execute(executor)
            .await?;
        Ok(())
    }

    pub async fn delete_tx<'e, E>(executor: E, id: Uuid) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("DELETE FROM deployments WHERE id = ?")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}
