use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Project not found")]
    NotFound,
    #[error("A project is already registered at this path")]
    PathTaken,
}

/// A destination directory with a `.claude/` subtree where artifacts are
/// deployed. `path` is absolute and canonicalized before insert.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub path: String,
    pub last_deployment: Option<DateTime<Utc>>,
    pub deployment_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateProject {
    pub name: String,
    pub path: String,
}

impl Project {
    pub async fn find_all(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Project>(
            "SELECT id, name, path, last_deployment, deployment_count, created_at, updated_at
             FROM projects
             ORDER BY created_at DESC",
        )
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Project>(
            "SELECT id, name, path, last_deployment, deployment_count, created_at, updated_at
             FROM projects
             WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_path(pool: &SqlitePool, path: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Project>(
            "SELECT id, name, path, last_deployment, deployment_count, created_at, updated_at
             FROM projects
             WHERE path = ?",
        )
        .bind(path)
        .fetch_optional(pool)
        .await
    }

    pub async fn create(
        pool: &SqlitePool,
        data: &CreateProject,
        id: Uuid,
    ) -> Result<Self, ProjectError> {
        let now = Utc::now();
        let result = sqlx::query_as::<_, Project>(
            "INSERT INTO projects (id, name, path, deployment_count, created_at, updated_at)
             VALUES (?, ?, ?, 0, ?, ?)
             RETURNING id, name, path, last_deployment, deployment_count, created_at, updated_at",
        )
        .bind(id)
        .bind(&data.name)
        .bind(&data.path)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await;
        match result {
            Ok(row) => Ok(row),
            Err(err) if super::is_unique_violation(&err) => Err(ProjectError::PathTaken),
            Err(err) => Err(err.into()),
        }
    }

    /// Refresh the materialized deployment counters after an apply or
    /// undeploy, inside the same transaction as the Deployment writes.
    pub async fn record_deployment_tx<'e, E>(
        executor: E,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            "UPDATE projects
             SET last_deployment = ?,
                 deployment_count = (SELECT COUNT(*) FROM deployments WHERE project_id = ?),
                 updated_at = ?
             WHERE id = ?",
        )
        .bind(at)
        .bind(id)
        .bind(at)
        .bind(id)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
