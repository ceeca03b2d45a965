use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

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
pub enum SnapshotScope {
    Artifact,
    Project,
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
#[serde(rename_all = "kebab-case")]
#[sqlx(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum SnapshotReason {
    Auto,
    Manual,
    PreSync,
    PostSync,
    PreDeploy,
    PostDeploy,
}

/// What a snapshot captured: either one artifact's files or a project's
/// deployed `.claude/` subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "lowercase")]
pub enum SnapshotSubject {
    Artifact { uuid: Uuid },
    Project { id: Uuid },
}

/// Content-addressed capture of a file tree. The row stores the tree
/// (relative path → blob hash); blob bytes live in the snapshot blob store.
/// Rows deliberately carry no foreign keys so they survive deletion of the
/// subject and allow restore.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: Uuid,
    pub scope: SnapshotScope,
    pub artifact_uuid: Option<Uuid>,
    pub project_id: Option<Uuid>,
    /// Merkle root over the sorted tree entries.
    pub content_hash_root: String,
    /// JSON object mapping relative path → blob hash.
    pub tree: String,
    pub reason: SnapshotReason,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn subject(&self) -> Option<SnapshotSubject> {
        match (self.scope, self.artifact_uuid, self.project_id) {
            (SnapshotScope::Artifact, Some(uuid), None) => {
                Some(SnapshotSubject::Artifact { uuid })
            }
            (SnapshotScope::Project, None, Some(id)) => Some(SnapshotSubject::Project { id }),
            _ => None,
        }
    }

    /// Decode the tree column. Paths are kept sorted for deterministic
    /// Merkle roots.
    pub fn tree_map(&self) -> BTreeMap<String, String> {
        serde_json::from_str(&self.tree).unwrap_or_default()
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Snapshot>(
            "SELECT id, scope, artifact_uuid, project_id, content_hash_root, tree,
                    reason, created_by, created_at
             FROM snapshots
             WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_all(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Snapshot>(
            "SELECT id, scope, artifact_uuid, project_id, content_hash_root, tree,
                    reason, created_by, created_at
             FROM snapshots
             ORDER BY created_at ASC",
        )
        .fetch_all(pool)
        .await
    }

    /// Snapshots for one subject, newest first.
    pub async fn find_by_subject(
        pool: &SqlitePool,
        subject: SnapshotSubject,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let (scope, artifact_uuid, project_id) = subject_columns(subject);
        sqlx::query_as::<_, Snapshot>(
            "SELECT id, scope, artifact_uuid, project_id, content_hash_root, tree,
                    reason, created_by, created_at
             FROM snapshots
             WHERE scope = ?
               AND (artifact_uuid = ? OR ? IS NULL)
               AND (project_id = ? OR ? IS NULL)
             ORDER BY created_at DESC",
        )
        .bind(scope)
        .bind(artifact_uuid)
        .bind(artifact_uuid)
        .bind(project_id)
        .bind(project_id)
        .fetch_all(pool)
        .await
    }

    pub async fn latest_for_subject(
        pool: &SqlitePool,
        subject: SnapshotSubject,
    ) -> Result<Option<Self>, sqlx::Error> {
        Ok(Self::find_by_subject(pool, subject).await?.into_iter().next())
    }

    pub async fn create(
        pool: &SqlitePool,
        id: Uuid,
        subject: SnapshotSubject,
        content_hash_root: &str,
        tree: &BTreeMap<String, String>,
        reason: SnapshotReason,
        created_by: &str,
    ) -> Result<Self, sqlx::Error> {
        let (scope, artifact_uuid, project_id) = subject_columns(subject);
        let tree_json = serde_json::to_string(tree).unwrap_or_else(|_| "{}".to_string());
        sqlx::query_as::<_, Snapshot>(
            "INSERT INTO snapshots
                 (id, scope, artifact_uuid, project_id, content_hash_root, tree,
                  reason, created_by, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id, scope, artifact_uuid, project_id, content_hash_root, tree,
                       reason, created_by, created_at",
        )
        .bind(id)
        .bind(scope)
        .bind(artifact_uuid)
        .bind(project_id)
        .bind(content_hash_root)
        .bind(tree_json)
        .bind(reason)
        .bind(created_by)
        .bind(Utc::now())
        .fetch_one(pool)
        .await
    }

    pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM snapshots WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn subject_columns(subject: SnapshotSubject) -> (SnapshotScope, Option<Uuid>, Option<Uuid>) {
    match subject {
        SnapshotSubject::Artifact { uuid } => (SnapshotScope::Artifact, Some(uuid), None),
        SnapshotSubject::Project { id } => (SnapshotScope::Project, None, Some(id)),
    }
}
