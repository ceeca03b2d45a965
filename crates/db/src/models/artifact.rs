use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool};
use thiserror::Error;
use uuid::Uuid;

use crate::serde_helpers::deserialize_optional_nullable;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Artifact not found")]
    NotFound,
    #[error("An artifact with this type and name already exists in the collection")]
    Conflict(Box<Artifact>),
}

/// Typed set of artifact kinds. Stored as TEXT; the CHECK constraint in the
/// schema mirrors this list.
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
#[serde(rename_all = "kebab-case")]
#[sqlx(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ArtifactType {
    Skill,
    Command,
    Agent,
    Hook,
    McpServer,
    Context,
    Spec,
    Rule,
}

impl ArtifactType {
    /// Directory name for this type under a collection or `.claude/` root.
    pub fn plural(&self) -> &'static str {
        match self {
            ArtifactType::Skill => "skills",
            ArtifactType::Command => "commands",
            ArtifactType::Agent => "agents",
            ArtifactType::Hook => "hooks",
            ArtifactType::McpServer => "mcps",
            ArtifactType::Context => "context",
            ArtifactType::Spec => "specs",
            ArtifactType::Rule => "rules",
        }
    }
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
pub enum ArtifactOrigin {
    Local,
    Github,
    Marketplace,
}

/// A named, typed unit of agent configuration with stable identity.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Artifact {
    pub uuid: Uuid,
    pub collection_id: Uuid,
    pub name: String,
    pub artifact_type: ArtifactType,
    pub origin: ArtifactOrigin,
    /// Opaque source identifier, e.g. `owner/repo/path@version`.
    pub upstream: Option<String>,
    pub version_spec: Option<String>,
    pub resolved_version: Option<String>,
    pub content_hash: String,
    /// Deploy target template, always under `.claude/`.
    pub path_pattern: String,
    /// JSON array of tag strings.
    pub tags: String,
    /// JSON metadata bag.
    pub metadata: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateArtifact {
    pub collection_id: Uuid,
    pub name: String,
    pub artifact_type: ArtifactType,
    pub origin: ArtifactOrigin,
    pub upstream: Option<String>,
    pub version_spec: Option<String>,
    pub resolved_version: Option<String>,
    pub content_hash: String,
    pub path_pattern: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateArtifact {
    pub name: Option<String>,
    pub version_spec: Option<String>,
    pub resolved_version: Option<String>,
    pub content_hash: Option<String>,
    pub tags: Option<Vec<String>>,
    #[serde(default, deserialize_with = "deserialize_optional_nullable")]
    pub metadata: Option<Option<serde_json::Value>>,
}

/// One page of a keyset-paginated artifact listing. The cursor is stable
/// under concurrent inserts because it orders on `(created_at, uuid)`.
#[derive(Debug, Serialize)]
pub struct ArtifactPage {
    pub items: Vec<Artifact>,
    pub next_cursor: Option<String>,
}

impl Artifact {
    pub fn tag_list(&self) -> Vec<String> {
        serde_json::from_str(&self.tags).unwrap_or_default()
    }

    pub fn metadata_value(&self) -> Option<serde_json::Value> {
        self.metadata
            .as_deref()
            .and_then(|m| serde_json::from_str(m).ok())
    }

    pub async fn find_by_id(pool: &SqlitePool, uuid: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Artifact>(
            "SELECT uuid, collection_id, name, artifact_type, origin, upstream,
                    version_spec, resolved_version, content_hash, path_pattern,
                    tags, metadata, created_at, updated_at
             FROM artifacts
             WHERE uuid = ?",
        )
        .bind(uuid)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_name(
        pool: &SqlitePool,
        collection_id: Uuid,
        artifact_type: ArtifactType,
        name: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Artifact>(
            "SELECT uuid, collection_id, name, artifact_type, origin, upstream,
                    version_spec, resolved_version, content_hash, path_pattern,
                    tags, metadata, created_at, updated_at
             FROM artifacts
             WHERE collection_id = ? AND artifact_type = ? AND name = ?",
        )
        .bind(collection_id)
        .bind(artifact_type)
        .bind(name)
        .fetch_optional(pool)
        .await
    }

    /// Content-hash dedup lookup used by import and the composite engine.
    pub async fn find_by_content_hash(
        pool: &SqlitePool,
        collection_id: Uuid,
        content_hash: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Artifact>(
            "SELECT uuid, collection_id, name, artifact_type, origin, upstream,
                    version_spec, resolved_version, content_hash, path_pattern,
                    tags, metadata, created_at, updated_at
             FROM artifacts
             WHERE collection_id = ? AND content_hash = ?
             ORDER BY created_at ASC
             LIMIT 1",
        )
        .bind(collection_id)
        .bind(content_hash)
        .fetch_optional(pool)
        .await
    }

    /// Identity lookup by the `(origin, upstream, type, name)` tuple: a
    /// matching row keeps its uuid across re-imports.
    pub async fn find_by_upstream(
        pool: &SqlitePool,
        collection_id: Uuid,
        origin: ArtifactOrigin,
        upstream: &str,
        artifact_type: ArtifactType,
        name: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Artifact>(
            "SELECT uuid, collection_id, name, artifact_type, origin, upstream,
                    version_spec, resolved_version, content_hash, path_pattern,
                    tags, metadata, created_at, updated_at
             FROM artifacts
             WHERE collection_id = ? AND origin = ? AND upstream = ?
               AND artifact_type = ? AND name = ?",
        )
        .bind(collection_id)
        .bind(origin)
        .bind(upstream)
        .bind(artifact_type)
        .bind(name)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_collection(
        pool: &SqlitePool,
        collection_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Artifact>(
            "SELECT uuid, collection_id, name, artifact_type, origin, upstream,
                    version_spec, resolved_version, content_hash, path_pattern,
                    tags, metadata, created_at, updated_at
             FROM artifacts
             WHERE collection_id = ?
             ORDER BY created_at ASC, uuid ASC",
        )
        .bind(collection_id)
        .fetch_all(pool)
        .await
    }

    /// Keyset-paginated listing. `cursor` is the opaque value returned in
    /// the previous page's `next_cursor`.
    pub async fn list_by_collection(
        pool: &SqlitePool,
        collection_id: Uuid,
        cursor: Option<&str>,
        limit: i64,
    ) -> Result<ArtifactPage, sqlx::Error> {
        let (after_at, after_uuid) = match cursor.and_then(parse_cursor) {
            Some(c) => c,
            None => (DateTime::<Utc>::MIN_UTC, Uuid::nil()),
        };
        let mut items = sqlx::query_as::<_, Artifact>(
            "SELECT uuid, collection_id, name, artifact_type, origin, upstream,
                    version_spec, resolved_version, content_hash, path_pattern,
                    tags, metadata, created_at, updated_at
             FROM artifacts
             WHERE collection_id = ?
               AND (created_at > ? OR (created_at = ? AND uuid > ?))
             ORDER BY created_at ASC, uuid ASC
             LIMIT ?",
        )
        .bind(collection_id)
        .bind(after_at)
        .bind(after_at)
        .bind(after_uuid)
        .bind(limit + 1)
        .fetch_all(pool)
        .await?;

        let next_cursor = if items.len() as i64 > limit {
            items.truncate(limit as usize);
            items.last().map(|a| encode_cursor(&a.created_at, &a.uuid))
        } else {
            None
        };
        Ok(ArtifactPage { items, next_cursor })
    }

    pub async fn count_by_collection(
        pool: &SqlitePool,
        collection_id: Uuid,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM artifacts WHERE collection_id = ?")
            .bind(collection_id)
            .fetch_one(pool)
            .await
    }

    /// Insert a new artifact row. A unique violation on
    /// `(collection_id, type, name)` returns `Conflict` carrying the
    /// existing row so import can proceed idempotently.
    pub async fn create(
        pool: &SqlitePool,
        data: &CreateArtifact,
        uuid: Uuid,
    ) -> Result<Self, ArtifactError> {
        let mut conn = pool.acquire().await?;
        let result = Self::create_tx(&mut *conn, data, uuid).await;
        drop(conn);
        match result {
            Err(ArtifactError::Database(err)) if super::is_unique_violation(&err) => {
                let existing =
                    Self::find_by_name(pool, data.collection_id, data.artifact_type, &data.name)
                        .await?
                        .ok_or(ArtifactError::NotFound)?;
                Err(ArtifactError::Conflict(Box::new(existing)))
            }
            other => other,
        }
    }

    /// Transaction-compatible insert used when import composes multiple
    /// repository writes in one transaction.
    pub async fn create_tx<'e, E>(
        executor: E,
        data: &CreateArtifact,
        uuid: Uuid,
    ) -> Result<Self, ArtifactError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now();
        let tags = serde_json::to_string(&data.tags).unwrap_or_else(|_| "[]".to_string());
        let metadata = data
            .metadata
            .as_ref()
            .and_then(|m| serde_json::to_string(m).ok());
        let row = sqlx::query_as::<_, Artifact>(
            "INSERT INTO artifacts (
                 uuid, collection_id, name, artifact_type, origin, upstream,
                 version_spec, resolved_version, content_hash, path_pattern,
                 tags, metadata, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING uuid, collection_id, name, artifact_type, origin, upstream,
                       version_spec, resolved_version, content_hash, path_pattern,
                       tags, metadata, created_at, updated_at",
        )
        .bind(uuid)
        .bind(data.collection_id)
        .bind(&data.name)
        .bind(data.artifact_type)
        .bind(data.origin)
        .bind(&data.upstream)
        .bind(&data.version_spec)
        .bind(&data.resolved_version)
        .bind(&data.content_hash)
        .bind(&data.path_pattern)
        .bind(tags)
        .bind(metadata)
        .bind(now)
        .bind(now)
        .fetch_one(executor)
        .await?;
        Ok(row)
    }

    pub async fn update(
        pool: &SqlitePool,
        uuid: Uuid,
        payload: &UpdateArtifact,
    ) -> Result<Self, ArtifactError> {
        let existing = Self::find_by_id(pool, uuid)
            .await?
            .ok_or(ArtifactError::NotFound)?;

        let name = payload.name.clone().unwrap_or(existing.name);
        let version_spec = payload.version_spec.clone().or(existing.version_spec);
        let resolved_version = payload
            .resolved_version
            .clone()
            .or(existing.resolved_version);
        let content_hash = payload.content_hash.clone().unwrap_or(existing.content_hash);
        let tags = match &payload.tags {
            Some(t) => serde_json::to_string(t).unwrap_or_else(|_| "[]".to_string()),
            None => existing.tags,
        };
        let metadata = match &payload.metadata {
            Some(Some(m)) => serde_json::to_string(m).ok(),
            Some(None) => None,
            None => existing.metadata,
        };

        let row = sqlx::query_as::<_, Artifact>(
            "UPDATE artifacts
             SET name = ?, version_spec = ?, resolved_version = ?,
                 content_hash = ?, tags = ?, metadata = ?, updated_at = ?
             WHERE uuid = ?
             RETURNING uuid, collection_id, name, artifact_type, origin, upstream,
                       version_spec, resolved_version, content_hash, path_pattern,
                       tags, metadata, created_at, updated_at",
        )
        .bind(name)
        .bind(version_spec)
        .bind(resolved_version)
        .bind(content_hash)
        .bind(tags)
        .bind(metadata)
        .bind(Utc::now())
        .bind(uuid)
        .fetch_one(pool)
        .await?;
        Ok(row)
    }

    /// Refresh `content_hash` and `updated_at`, keeping the uuid. Used by
    /// re-import when identity resolved to an existing upstream row and by
    /// sync-pull after a merge.
    pub async fn touch_content_hash<'e, E>(
        executor: E,
        uuid: Uuid,
        content_hash: &str,
        resolved_version: Option<&str>,
    ) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            "UPDATE artifacts
             SET content_hash = ?,
                 resolved_version = COALESCE(?, resolved_version),
                 updated_at = ?
             WHERE uuid = ?",
        )
        .bind(content_hash)
        .bind(resolved_version)
        .bind(Utc::now())
        .bind(uuid)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn delete(pool: &SqlitePool, uuid: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM artifacts WHERE uuid = ?")
            .bind(uuid)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn encode_cursor(created_at: &DateTime<Utc>, uuid: &Uuid) -> String {
    format!("{}/{}", created_at.to_rfc3339(), uuid.simple())
}

fn parse_cursor(cursor: &str) -> Option<(DateTime<Utc>, Uuid)> {
    let (at, id) = cursor.rsplit_once('/')?;
    let at = DateTime::parse_from_rfc3339(at).ok()?.with_timezone(&Utc);
    let id = Uuid::parse_str(id).ok()?;
    Some((at, id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::collection::{Collection, CreateCollection};

    async fn collection(dbs: &crate::DBService) -> Collection {
        Collection::create(
            &dbs.pool,
            &CreateCollection {
                name: "main".to_string(),
                root_path: "/tmp/c".to_string(),
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap()
    }

    fn create_payload(collection_id: Uuid, name: &str, hash: &str) -> CreateArtifact {
        CreateArtifact {
            collection_id,
            name: name.to_string(),
            artifact_type: ArtifactType::Command,
            origin: ArtifactOrigin::Local,
            upstream: None,
            version_spec: None,
            resolved_version: None,
            content_hash: hash.to_string(),
            path_pattern: format!(".claude/commands/{name}"),
            tags: vec!["ci".to_string()],
            metadata: None,
        }
    }

    #[tokio::test]
    async fn create_conflict_returns_existing_row() {
        let dbs = crate::DBService::new_in_memory().await.unwrap();
        let collection = collection(&dbs).await;
        let first = Artifact::create(&dbs.pool, &create_payload(collection.id, "deploy", "h1"), Uuid::new_v4())
            .await
            .unwrap();
        let err = Artifact::create(&dbs.pool, &create_payload(collection.id, "deploy", "h2"), Uuid::new_v4())
            .await
            .unwrap_err();
        match err {
            ArtifactError::Conflict(existing) => assert_eq!(existing.uuid, first.uuid),
            other => panic!("expected Conflict, got {other:?}"),
        }
        assert_eq!(
            Artifact::count_by_collection(&dbs.pool, collection.id).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn keyset_pagination_walks_every_row_once() {
        let dbs = crate::DBService::new_in_memory().await.unwrap();
        let collection = collection(&dbs).await;
        for index in 0..7 {
            Artifact::create(
                &dbs.pool,
                &create_payload(collection.id, &format!("cmd-{index}"), &format!("h{index}")),
                Uuid::new_v4(),
            )
            .await
            .unwrap();
        }

        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page =
                Artifact::list_by_collection(&dbs.pool, collection.id, cursor.as_deref(), 3)
                    .await
                    .unwrap();
            seen.extend(page.items.iter().map(|a| a.uuid));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(seen.len(), 7);
        let unique: std::collections::HashSet<_> = seen.iter().collect();
        assert_eq!(unique.len(), 7, "no duplicates across pages");
    }

    #[tokio::test]
    async fn touch_content_hash_keeps_uuid_and_moves_hash() {
        let dbs = crate::DBService::new_in_memory().await.unwrap();
        let collection = collection(&dbs).await;
        let row = Artifact::create(&dbs.pool, &create_payload(collection.id, "deploy", "h1"), Uuid::new_v4())
            .await
            .unwrap();
        let mut conn = dbs.pool.acquire().await.unwrap();
        Artifact::touch_content_hash(&mut *conn, row.uuid, "h2", Some("1.2.0"))
            .await
            .unwrap();
        drop(conn);
        let updated = Artifact::find_by_id(&dbs.pool, row.uuid).await.unwrap().unwrap();
        assert_eq!(updated.uuid, row.uuid);
        assert_eq!(updated.content_hash, "h2");
        assert_eq!(updated.resolved_version.as_deref(), Some("1.2.0"));
        assert!(updated.updated_at >= row.updated_at);
        assert_eq!(updated.tag_list(), vec!["ci".to_string()]);
    }
}
