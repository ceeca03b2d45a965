use std::path::PathBuf;

use db::models::artifact::{Artifact, ArtifactOrigin, ArtifactType};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

use super::fs::{FsError, FsService};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error("Detected artifact has no files")]
    EmptyArtifact,
    #[error("Detected artifact has an empty name")]
    EmptyName,
}

/// Output of the (external) discovery walker: a typed artifact rooted at a
/// directory on disk, before it has identity in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedArtifact {
    pub name: String,
    pub artifact_type: ArtifactType,
    pub origin: ArtifactOrigin,
    pub upstream: Option<String>,
    pub version_spec: Option<String>,
    pub resolved_version: Option<String>,
    /// Directory containing the artifact's files.
    pub root_dir: PathBuf,
    /// Optional explicit deploy template; defaulted from the type when
    /// absent.
    pub path_pattern: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub metadata: Option<serde_json::Value>,
}

/// How an identity was resolved, in dedup-priority order.
#[derive(Debug, Clone)]
pub enum IdentityMatch {
    /// Same canonical content already exists in the collection; reuse it.
    ByContentHash(Box<Artifact>),
    /// Same `(origin, upstream, type, name)` tuple; keep the uuid, content
    /// changed.
    ByUpstream(Box<Artifact>),
    /// Nothing matched; a fresh uuid was generated.
    New,
}

#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    pub uuid: Uuid,
    pub content_hash: String,
    pub canonical_name: String,
    pub path_pattern: String,
    pub matched: IdentityMatch,
}

/// Canonical view over artifacts: name/path normalization, content-hash
/// computation, identity resolution against the store.
#[derive(Clone)]
pub struct ArtifactIndexService {
    fs: FsService,
}

impl ArtifactIndexService {
    pub fn new(fs: FsService) -> Self {
        ArtifactIndexService { fs }
    }

    /// Deploy template for a type: `.claude/<plural>/<name>`.
    pub fn default_path_pattern(artifact_type: ArtifactType, name: &str) -> String {
        format!(".claude/{}/{}", artifact_type.plural(), name)
    }

    /// Content hash over all of the artifact's files: the Merkle root of
    /// the sorted `(relative_path, file_hash)` list.
    pub fn content_hash_of(&self, detected: &DetectedArtifact) -> Result<String, IndexError> {
        let entries = self.fs.ls_tree(&detected.root_dir)?;
        if entries.is_empty() {
            return Err(IndexError::EmptyArtifact);
        }
        Ok(FsService::tree_root_hash(&entries))
    }

    /// Resolve the stable identity of a detected artifact within a
    /// collection:
    /// 1. a row with the same content hash keeps its uuid (pure dedup);
    /// 2. a row with the same `(origin, upstream, type, name)` keeps its
    ///    uuid and will have its hash refreshed;
    /// 3. otherwise a new uuid is generated.
    pub async fn resolve_identity(
        &self,
        pool: &SqlitePool,
        collection_id: Uuid,
        detected: &DetectedArtifact,
    ) -> Result<ResolvedIdentity, IndexError> {
        let canonical_name = utils::text::canonical_name(&detected.name);
        if canonical_name.is_empty() {
            return Err(IndexError::EmptyName);
        }
        let content_hash = self.content_hash_of(detected)?;
        let path_pattern = detected.path_pattern.clone().unwrap_or_else(|| {
            Self::default_path_pattern(detected.artifact_type, &canonical_name)
        });

        if let Some(existing) =
            Artifact::find_by_content_hash(pool, collection_id, &content_hash).await?
        {
            return Ok(ResolvedIdentity {
                uuid: existing.uuid,
                content_hash,
                canonical_name,
                path_pattern,
                matched: IdentityMatch::ByContentHash(Box::new(existing)),
            });
        }

        if let Some(upstream) = detected.upstream.as_deref() {
            if let Some(existing) = Artifact::find_by_upstream(
                pool,
                collection_id,
                detected.origin,
                upstream,
                detected.artifact_type,
                &canonical_name,
            )
            .await?
            {
                return Ok(ResolvedIdentity {
                    uuid: existing.uuid,
                    content_hash,
                    canonical_name,
                    path_pattern,
                    matched: IdentityMatch::ByUpstream(Box::new(existing)),
                });
            }
        }

        Ok(ResolvedIdentity {
            uuid: Uuid::new_v4(),
            content_hash,
            canonical_name,
            path_pattern,
            matched: IdentityMatch::New,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detected(dir: &std::path::Path, name: &str) -> DetectedArtifact {
        DetectedArtifact {
            name: name.to_string(),
            artifact_type: ArtifactType::Command,
            origin: ArtifactOrigin::Local,
            upstream: None,
            version_spec: None,
            resolved_version: None,
            root_dir: dir.to_path_buf(),
            path_pattern: None,
            tags: Vec::new(),
            metadata: None,
        }
    }

    #[test]
    fn default_path_pattern_uses_type_plural() {
        assert_eq!(
            ArtifactIndexService::default_path_pattern(ArtifactType::McpServer, "db"),
            ".claude/mcps/db"
        );
    }

    #[tokio::test]
    async fn identity_prefers_content_hash_then_upstream() {
        let dbs = db::DBService::new_in_memory().await.unwrap();
        let fs = FsService::new();
        let index = ArtifactIndexService::new(fs.clone());

        let collection = db::models::collection::Collection::create(
            &dbs.pool,
            &db::models::collection::CreateCollection {
                name: "main".to_string(),
                root_path: "/tmp/collection".to_string(),
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        fs.write_file(&dir.path().join("command.md"), b"run the tests\n")
            .unwrap();
        let det = detected(dir.path(), "Test Runner");

        let first = index
            .resolve_identity(&dbs.pool, collection.id, &det)
            .await
            .unwrap();
        assert!(matches!(first.matched, IdentityMatch::New));
        assert_eq!(first.canonical_name, "test-runner");

        db::models::artifact::Artifact::create(
            &dbs.pool,
            &db::models::artifact::CreateArtifact {
                collection_id: collection.id,
                name: first.canonical_name.clone(),
                artifact_type: det.artifact_type,
                origin: det.origin,
                upstream: None,
                version_spec: None,
                resolved_version: None,
                content_hash: first.content_hash.clone(),
                path_pattern: first.path_pattern.clone(),
                tags: Vec::new(),
                metadata: None,
            },
            first.uuid,
        )
        .await
        .unwrap();

        // Same bytes under a different name: dedup by content hash.
        let renamed = detected(dir.path(), "other-name");
        let second = index
            .resolve_identity(&dbs.pool, collection.id, &renamed)
            .await
            .unwrap();
        assert_eq!(second.uuid, first.uuid);
        assert!(matches!(second.matched, IdentityMatch::ByContentHash(_)));

        // Changed bytes but matching upstream tuple: keep the uuid.
        let dir2 = tempfile::tempdir().unwrap();
        fs.write_file(&dir2.path().join("command.md"), b"run the tests twice\n")
            .unwrap();
        let mut upstream = detected(dir2.path(), "test-runner");
        upstream.origin = ArtifactOrigin::Local;
        let third = index
            .resolve_identity(&dbs.pool, collection.id, &upstream)
            .await
            .unwrap();
        // No upstream set on the stored row, so this is a new identity.
        assert!(matches!(third.matched, IdentityMatch::New));
        assert_ne!(third.uuid, first.uuid);
    }
}
