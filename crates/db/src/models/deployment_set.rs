use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DeploymentSetError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Deployment set not found")]
    NotFound,
    #[error("A deployment set with this name already exists")]
    NameTaken,
}

/// User-scoped named bundle. Members are artifacts, groups, or other sets,
/// resolved to a flat deduplicated list for batch deploy.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DeploymentSet {
    pub id: Uuid,
    pub owner_id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Exactly one of the three reference columns is set per row; the schema
/// CHECK constraint mirrors `SetMemberRef`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DeploymentSetMember {
    pub id: Uuid,
    pub set_id: Uuid,
    pub artifact_uuid: Option<Uuid>,
    pub group_id: Option<Uuid>,
    pub member_set_id: Option<Uuid>,
    pub position: f64,
    pub created_at: DateTime<Utc>,
}

/// Tagged view of a member row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SetMemberRef {
    Artifact { uuid: Uuid },
    Group { id: Uuid },
    Set { id: Uuid },
}

impl DeploymentSetMember {
    pub fn member_ref(&self) -> Option<SetMemberRef> {
        match (self.artifact_uuid, self.group_id, self.member_set_id) {
            (Some(uuid), None, None) => Some(SetMemberRef::Artifact { uuid }),
            (None, Some(id), None) => Some(SetMemberRef::Group { id }),
            (None, None, Some(id)) => Some(SetMemberRef::Set { id }),
            _ => None,
        }
    }
}

impl DeploymentSet {
    /// Owner sentinel used when auth is disabled (single-user mode).
    pub const LOCAL_OWNER: &'static str = "local";

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, DeploymentSet>(
            "SELECT id, owner_id, name, description, created_at, updated_at
             FROM deployment_sets
             WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_name(
        pool: &SqlitePool,
        owner_id: &str,
        name: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, DeploymentSet>(
            "SELECT id, owner_id, name, description, created_at, updated_at
             FROM deployment_sets
             WHERE owner_id = ? AND name = ?",
        )
        .bind(owner_id)
        .bind(name)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_all(pool: &SqlitePool, owner_id: &str) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, DeploymentSet>(
            "SELECT id, owner_id, name, description, created_at, updated_at
             FROM deployment_sets
             WHERE owner_id = ?
             ORDER BY name ASC",
        )
        .bind(owner_id)
        .fetch_all(pool)
        .await
    }

    pub async fn create(
        pool: &SqlitePool,
        owner_id: &str,
        name: &str,
        description: Option<&str>,
        id: Uuid,
    ) -> Result<Self, DeploymentSetError> {
        let now = Utc::now();
        let result = sqlx::query_as::<_, DeploymentSet>(
            "INSERT INTO deployment_sets (id, owner_id, name, description, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING id, owner_id, name, description, created_at, updated_at",
        )
        .bind(id)
        .bind(owner_id)
        .bind(name)
        .bind(description)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await;
        match result {
            Ok(row) => Ok(row),
            Err(err) if super::is_unique_violation(&err) => Err(DeploymentSetError::NameTaken),
            Err(err) => Err(err.into()),
        }
    }

    /// Delete a set. Inbound member rows in parent sets cascade with it, so
    /// no parent is left holding a dangling reference.
    pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM deployment_sets WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Members of this set in position order.
    pub async fn members(
        pool: &SqlitePool,
        set_id: Uuid,
    ) -> Result<Vec<DeploymentSetMember>, sqlx::Error> {
        sqlx::query_as::<_, DeploymentSetMember>(
            "SELECT id, set_id, artifact_uuid, group_id, member_set_id, position, created_at
             FROM deployment_set_members
             WHERE set_id = ?
             ORDER BY position ASC, created_at ASC",
        )
        .bind(set_id)
        .fetch_all(pool)
        .await
    }

    /// Direct nested-set children of the given set (the DAG edges used by
    /// cycle detection).
    pub async fn nested_set_ids(pool: &SqlitePool, set_id: Uuid) -> Result<Vec<Uuid>, sqlx::Error> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT member_set_id
             FROM deployment_set_members
             WHERE set_id = ? AND member_set_id IS NOT NULL",
        )
        .bind(set_id)
        .fetch_all(pool)
        .await
    }

    pub async fn add_member_tx<'e, E>(
        executor: E,
        set_id: Uuid,
        member: SetMemberRef,
        position: f64,
    ) -> Result<DeploymentSetMember, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let (artifact_uuid, group_id, member_set_id) = match member {
            SetMemberRef::Artifact { uuid } => (Some(uuid), None, None),
            SetMemberRef::Group { id } => (None, Some(id), None),
            SetMemberRef::Set { id } => (None, None, Some(id)),
        };
        sqlx::query_as::<_, DeploymentSetMember>(
            "INSERT INTO deployment_set_members
                 (id, set_id, artifact_uuid, group_id, member_set_id, position, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING id, set_id, artifact_uuid, group_id, member_set_id, position, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(set_id)
        .bind(artifact_uuid)
        .bind(group_id)
        .bind(member_set_id)
        .bind(position)
        .bind(Utc::now())
        .fetch_one(executor)
        .await
    }

    pub async fn remove_member(pool: &SqlitePool, member_id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM deployment_set_members WHERE id = ?")
            .bind(member_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
