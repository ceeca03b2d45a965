use std::{
    collections::{BTreeMap, HashSet},
    path::{Path, PathBuf},
};

use chrono::Utc;
use db::models::snapshot::{Snapshot, SnapshotReason, SnapshotSubject};
use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;
use walkdir::WalkDir;

use super::fs::{FsError, FsService};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error("Snapshot not found")]
    NotFound,
    #[error("Blob {0} is missing from the store")]
    MissingBlob(String),
    #[error("Blob {0} failed checksum verification")]
    CorruptBlob(String),
}

/// Count/age retention for a subject's snapshot history.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetentionPolicy {
    pub max_count: Option<usize>,
    pub max_age: Option<chrono::Duration>,
}

/// Content-addressed snapshots. Blob bytes live under
/// `<blob_root>/objects/<aa>/<rest-of-hash>`; trees live in the snapshot
/// rows. The store is append-only; GC is the only deleter.
#[derive(Clone)]
pub struct SnapshotService {
    blob_root: PathBuf,
    fs: FsService,
}

impl SnapshotService {
    pub fn new(blob_root: PathBuf, fs: FsService) -> Self {
        SnapshotService { blob_root, fs }
    }

    fn blob_path(&self, hash: &str) -> PathBuf {
        let (prefix, rest) = hash.split_at(2.min(hash.len()));
        self.blob_root.join("objects").join(prefix).join(rest)
    }

    /// Store canonical bytes under their content hash. Duplicate bytes
    /// across snapshots share one object.
    pub fn store_blob(&self, bytes: &[u8]) -> Result<String, SnapshotError> {
        let canonical = FsService::canonicalize_bytes(bytes);
        let hash = FsService::compute_content_hash(&canonical);
        let path = self.blob_path(&hash);
        if !path.exists() {
            self.fs.write_file(&path, &canonical)?;
        }
        Ok(hash)
    }

    pub fn read_blob(&self, hash: &str) -> Result<Vec<u8>, SnapshotError> {
        let path = self.blob_path(hash);
        if !path.exists() {
            return Err(SnapshotError::MissingBlob(hash.to_string()));
        }
        let bytes = self.fs.read_file(&path)?;
        if FsService::compute_content_hash(&bytes) != hash {
            return Err(SnapshotError::CorruptBlob(hash.to_string()));
        }
        Ok(bytes)
    }

    pub fn has_blob(&self, hash: &str) -> bool {
        self.blob_path(hash).exists()
    }

    /// Capture `dir` for `subject`. Only blobs not already in the store
    /// are written, so cost is proportional to what changed.
    pub async fn create_snapshot(
        &self,
        pool: &SqlitePool,
        subject: SnapshotSubject,
        dir: &Path,
        reason: SnapshotReason,
        created_by: &str,
    ) -> Result<Snapshot, SnapshotError> {
        let entries = self.fs.ls_tree(dir)?;
        let mut tree = BTreeMap::new();
        for (relative, _) in &entries {
            let bytes = self.fs.read_file(&dir.join(relative))?;
            let hash = self.store_blob(&bytes)?;
            tree.insert(relative.clone(), hash);
        }
        let root = FsService::tree_root_hash(
            &tree
                .iter()
                .map(|(p, h)| (p.clone(), h.clone()))
                .collect::<Vec<_>>(),
        );
        let snapshot =
            Snapshot::create(pool, Uuid::new_v4(), subject, &root, &tree, reason, created_by)
                .await?;
        tracing::debug!(
            snapshot = %utils::text::short_uuid(&snapshot.id),
            files = tree.len(),
            %reason,
            "snapshot created"
        );
        Ok(snapshot)
    }

    /// Materialize a snapshot's tree into `target_dir` via staging + atomic
    /// swap. Files not in the tree are removed by the swap.
    pub fn restore_tree(&self, snapshot: &Snapshot, target_dir: &Path) -> Result<(), SnapshotError> {
        let staging = self.fs.create_staging_dir(target_dir)?;
        for (relative, hash) in snapshot.tree_map() {
            let bytes = self.read_blob(&hash)?;
            self.fs.write_file(&staging.path().join(&relative), &bytes)?;
        }
        let staging_path = staging.keep();
        self.fs.atomic_replace_dir(target_dir, &staging_path)?;
        Ok(())
    }

    /// Restore `snapshot_id` onto `target_dir`, creating a compensating
    /// snapshot of the current state first so the rollback itself can be
    /// rolled back.
    pub async fn rollback(
        &self,
        pool: &SqlitePool,
        snapshot_id: Uuid,
        target_dir: &Path,
        created_by: &str,
    ) -> Result<RollbackOutcome, SnapshotError> {
        let snapshot = Snapshot::find_by_id(pool, snapshot_id)
            .await?
            .ok_or(SnapshotError::NotFound)?;
        let subject = snapshot.subject().ok_or(SnapshotError::NotFound)?;
        let compensating = self
            .create_snapshot(pool, subject, target_dir, SnapshotReason::Auto, created_by)
            .await?;
        self.restore_tree(&snapshot, target_dir)?;
        Ok(RollbackOutcome {
            restored: snapshot,
            compensating,
        })
    }

    /// Drop old snapshots for one subject per policy. Returns deleted row
    /// ids; blob space is reclaimed by `gc`.
    pub async fn apply_retention(
        &self,
        pool: &SqlitePool,
        subject: SnapshotSubject,
        policy: RetentionPolicy,
    ) -> Result<Vec<Uuid>, SnapshotError> {
        let snapshots = Snapshot::find_by_subject(pool, subject).await?;
        let now = Utc::now();
        let mut deleted = Vec::new();
        for (index, snapshot) in snapshots.iter().enumerate() {
            let over_count = policy.max_count.is_some_and(|max| index >= max);
            let over_age = policy
                .max_age
                .is_some_and(|max| now - snapshot.created_at > max);
            if over_count || over_age {
                Snapshot::delete(pool, snapshot.id).await?;
                deleted.push(snapshot.id);
            }
        }
        Ok(deleted)
    }

    /// Delete every blob not referenced by any remaining snapshot tree.
    /// Runs as a background task with its own lock; the store is otherwise
    /// append-only.
    pub async fn gc(&self, pool: &SqlitePool) -> Result<usize, SnapshotError> {
        let mut referenced: HashSet<String> = HashSet::new();
        for snapshot in Snapshot::find_all(pool).await? {
            referenced.extend(snapshot.tree_map().into_values());
        }
        let objects_root = self.blob_root.join("objects");
        if !objects_root.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in WalkDir::new(&objects_root) {
            let entry = entry.map_err(|err| FsError::Io {
                path: objects_root.clone(),
                source: err.into(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let hash = blob_hash_from_path(entry.path(), &objects_root);
            let keep = hash.as_deref().is_some_and(|h| referenced.contains(h));
            if !keep {
                std::fs::remove_file(entry.path()).map_err(|source| FsError::Io {
                    path: entry.path().to_path_buf(),
                    source,
                })?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[derive(Debug)]
pub struct RollbackOutcome {
    pub restored: Snapshot,
    pub compensating: Snapshot,
}

fn blob_hash_from_path(path: &Path, objects_root: &Path) -> Option<String> {
    let relative = path.strip_prefix(objects_root).ok()?;
    let mut parts = relative.components();
    let prefix = parts.next()?.as_os_str().to_str()?.to_string();
    let rest = parts.next()?.as_os_str().to_str()?.to_string();
    Some(format!("{prefix}{rest}"))
}
