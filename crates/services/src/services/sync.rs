use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    path::Path,
};

use db::models::{
    artifact::Artifact,
    deployment::Deployment,
    snapshot::{Snapshot, SnapshotReason, SnapshotSubject},
};
use similar::{DiffTag, TextDiff};
use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

use super::{
    fs::{FsError, FsService},
    versioning::{SnapshotError, SnapshotService},
};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("Hard conflicts on {0:?}; merge strategy fails closed")]
    HardConflict(Vec<String>),
    #[error("Manual strategy is missing a resolution for {0}")]
    ManualResolutionMissing(String),
    #[error("Tree changed between plan and apply; re-plan and retry")]
    ConcurrentModification,
    #[error("Sync subject not found")]
    NotFound,
}

/// Three-way state of one artifact across source, collection, and project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    InSync,
    /// Source differs from collection; pull brings the collection up.
    SourceDrift,
    /// Project differs from collection; push up or re-deploy.
    ProjectDrift,
    /// Both legs differ; three-way merge required.
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConflictClass {
    /// Independent edits; auto-mergeable.
    None,
    /// Non-overlapping edits within 2 lines of each other; auto-merge with
    /// a warning.
    Soft,
    /// Overlapping hunks after rebase onto the common ancestor.
    Hard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Take source/collection.
    Theirs,
    /// Take project.
    Ours,
    /// Caller supplies merged bytes per conflicting path.
    Manual,
    /// Auto-merge non-conflicting paths, fail closed on hard conflicts.
    Merge,
}

#[derive(Debug, Clone)]
pub struct PathDiff {
    pub path: String,
    pub base_hash: Option<String>,
    pub collection_hash: Option<String>,
    pub project_hash: Option<String>,
    pub conflict: ConflictClass,
    /// Present when both sides changed and the hunks interleave cleanly.
    pub auto_merged: Option<Vec<u8>>,
}

#[derive(Debug)]
pub struct SyncPlan {
    pub artifact_uuid: Uuid,
    pub status: SyncStatus,
    pub paths: Vec<PathDiff>,
    pub collection_tree_hash: String,
    pub project_tree_hash: String,
}

impl SyncPlan {
    pub fn hard_conflicts(&self) -> Vec<String> {
        self.paths
            .iter()
            .filter(|p| p.conflict == ConflictClass::Hard)
            .map(|p| p.path.clone())
            .collect()
    }
}

#[derive(Debug)]
pub struct SyncReport {
    pub applied_paths: Vec<String>,
    pub soft_conflicts: Vec<String>,
    pub new_content_hash: String,
    pub pre_snapshot: Snapshot,
    pub post_snapshot: Snapshot,
}

/// Three-way change detection and merge between the source, collection,
/// and project layers of one artifact.
#[derive(Clone)]
pub struct SyncService {
    fs: FsService,
    snapshots: SnapshotService,
}

impl SyncService {
    pub fn new(fs: FsService, snapshots: SnapshotService) -> Self {
        SyncService { fs, snapshots }
    }

    /// Compute the sync plan from a consistent snapshot of both trees.
    /// Read-only. The common ancestor is the artifact's most recent
    /// snapshot; without one, divergence on both legs is a hard conflict
    /// (fail closed).
    pub async fn preview(
        &self,
        pool: &SqlitePool,
        artifact: &Artifact,
        collection_dir: &Path,
        deployed_dir: &Path,
        source_dir: Option<&Path>,
    ) -> Result<SyncPlan, SyncError> {
        let collection_tree: BTreeMap<String, String> =
            self.fs.ls_tree(collection_dir)?.into_iter().collect();
        let project_tree: BTreeMap<String, String> =
            self.fs.ls_tree(deployed_dir)?.into_iter().collect();
        let source_tree: Option<BTreeMap<String, String>> = match source_dir {
            Some(dir) => Some(self.fs.ls_tree(dir)?.into_iter().collect()),
            None => None,
        };

        let collection_root = tree_root(&collection_tree);
        let project_root = tree_root(&project_tree);
        let source_root = source_tree.as_ref().map(tree_root);

        let base_tree = Snapshot::latest_for_subject(
            pool,
            SnapshotSubject::Artifact {
                uuid: artifact.uuid,
            },
        )
        .await?
        .map(|s| s.tree_map())
        .unwrap_or_default();

        let mut paths = Vec::new();
        let mut collection_moved = false;
        let mut project_moved = false;
        let all_paths: BTreeSet<&String> =
            collection_tree.keys().chain(project_tree.keys()).collect();
        for path in all_paths {
            let collection_hash = collection_tree.get(path).cloned();
            let project_hash = project_tree.get(path).cloned();
            if collection_hash == project_hash {
                continue;
            }
            let base_hash = base_tree.get(path).cloned();
            collection_moved |= collection_hash != base_hash;
            project_moved |= project_hash != base_hash;
            let diff = self.classify_path(
                path,
                base_hash.clone(),
                collection_hash.clone(),
                project_hash.clone(),
                collection_dir,
                deployed_dir,
            )?;
            paths.push(diff);
        }

        // With a source leg the layer comparison is S-vs-C / C-vs-P; with
        // only collection and project the ancestor decides which side
        // moved, so simultaneous edits classify as a conflict rather than
        // plain drift.
        let upstream_differs = match source_root {
            Some(ref source) => source != &collection_root,
            None => collection_moved,
        };
        let downstream_differs = match source_root {
            Some(_) => project_root != collection_root,
            None => project_moved,
        };
        let status = match (upstream_differs, downstream_differs) {
            (false, false) => SyncStatus::InSync,
            (true, false) => SyncStatus::SourceDrift,
            (false, true) => SyncStatus::ProjectDrift,
            (true, true) => SyncStatus::Conflict,
        };

        Ok(SyncPlan {
            artifact_uuid: artifact.uuid,
            status,
            paths,
            collection_tree_hash: collection_root,
            project_tree_hash: project_root,
        })
    }

    fn classify_path(
        &self,
        path: &str,
        base_hash: Option<String>,
        collection_hash: Option<String>,
        project_hash: Option<String>,
        collection_dir: &Path,
        deployed_dir: &Path,
    ) -> Result<PathDiff, SyncError> {
        let collection_changed = collection_hash != base_hash;
        let project_changed = project_hash != base_hash;

        let (conflict, auto_merged) = if !collection_changed || !project_changed {
            // Only one side moved; trivially mergeable.
            (ConflictClass::None, None)
        } else {
            match (&collection_hash, &project_hash, &base_hash) {
                (Some(_), Some(_), Some(base_blob)) => {
                    let base = self.snapshots.read_blob(base_blob)?;
                    let collection = self.fs.read_file(&collection_dir.join(path))?;
                    let project = self.fs.read_file(&deployed_dir.join(path))?;
                    classify_three_way(&base, &collection, &project)
                }
                // One side deleted while the other edited, or no common
                // ancestor to rebase onto: fail closed.
                _ => (ConflictClass::Hard, None),
            }
        };

        Ok(PathDiff {
            path: path.to_string(),
            base_hash,
            collection_hash,
            project_hash,
            conflict,
            auto_merged,
        })
    }

    /// Materialize the merged tree for a strategy as `path → bytes`.
    fn final_tree(
        &self,
        plan: &SyncPlan,
        strategy: SyncStrategy,
        manual: Option<&HashMap<String, Vec<u8>>>,
        collection_dir: &Path,
        deployed_dir: &Path,
    ) -> Result<BTreeMap<String, Vec<u8>>, SyncError> {
        let mut tree: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        let winner_dir = match strategy {
            SyncStrategy::Ours => deployed_dir,
            _ => collection_dir,
        };
        for (relative, _) in self.fs.ls_tree(winner_dir)? {
            tree.insert(relative.clone(), self.fs.read_file(&winner_dir.join(&relative))?);
        }
        match strategy {
            SyncStrategy::Theirs | SyncStrategy::Ours => Ok(tree),
            SyncStrategy::Merge => {
                let hard = plan.hard_conflicts();
                if !hard.is_empty() {
                    return Err(SyncError::HardConflict(hard));
                }
                for diff in &plan.paths {
                    match (&diff.auto_merged, &diff.collection_hash, &diff.project_hash) {
                        (Some(merged), _, _) => {
                            tree.insert(diff.path.clone(), merged.clone());
                        }
                        // Only the project changed this path; carry it.
                        (None, _, Some(_)) if diff.collection_hash == diff.base_hash => {
                            tree.insert(
                                diff.path.clone(),
                                self.fs.read_file(&deployed_dir.join(&diff.path))?,
                            );
                        }
                        // Project deleted an unchanged path.
                        (None, Some(_), None) if diff.collection_hash == diff.base_hash => {
                            tree.remove(&diff.path);
                        }
                        _ => {}
                    }
                }
                Ok(tree)
            }
            SyncStrategy::Manual => {
                for diff in &plan.paths {
                    if diff.conflict == ConflictClass::None {
                        continue;
                    }
                    let resolution = manual
                        .and_then(|m| m.get(&diff.path))
                        .ok_or_else(|| SyncError::ManualResolutionMissing(diff.path.clone()))?;
                    tree.insert(diff.path.clone(), resolution.clone());
                }
                Ok(tree)
            }
        }
    }

    /// Apply a plan: converge collection and project trees on the merged
    /// result, snapshot around the mutation, and record the new content
    /// hash in the artifact and deployment rows. Fails with
    /// `ConcurrentModification` if either tree moved since `preview`.
    #[allow(clippy::too_many_arguments)]
    pub async fn apply(
        &self,
        pool: &SqlitePool,
        artifact: &Artifact,
        deployment: Option<&Deployment>,
        plan: &SyncPlan,
        strategy: SyncStrategy,
        manual: Option<&HashMap<String, Vec<u8>>>,
        collection_dir: &Path,
        deployed_dir: &Path,
    ) -> Result<SyncReport, SyncError> {
        // Late concurrent edits on either side invalidate the plan.
        if self.fs.dir_content_hash(collection_dir)? != plan.collection_tree_hash
            || self.fs.dir_content_hash(deployed_dir)? != plan.project_tree_hash
        {
            return Err(SyncError::ConcurrentModification);
        }

        let final_tree =
            self.final_tree(plan, strategy, manual, collection_dir, deployed_dir)?;

        let subject = SnapshotSubject::Artifact {
            uuid: artifact.uuid,
        };
        let pre_snapshot = self
            .snapshots
            .create_snapshot(pool, subject, collection_dir, SnapshotReason::PreSync, "sync")
            .await?;

        // Stage both destinations before any rename.
        let collection_staging = self.fs.create_staging_dir(collection_dir)?;
        let project_staging = self.fs.create_staging_dir(deployed_dir)?;
        for (relative, bytes) in &final_tree {
            self.fs
                .write_file(&collection_staging.path().join(relative), bytes)?;
            self.fs
                .write_file(&project_staging.path().join(relative), bytes)?;
        }

        let entries: Vec<(String, String)> = final_tree
            .iter()
            .map(|(path, bytes)| (path.clone(), FsService::compute_content_hash(bytes)))
            .collect();
        let new_content_hash = FsService::tree_root_hash(&entries);

        // DB commit precedes the FS renames; if a rename fails afterwards
        // the stored snapshot and hashes let the orchestrator re-apply.
        let mut tx = pool.begin().await?;
        Artifact::touch_content_hash(&mut *tx, artifact.uuid, &new_content_hash, None).await?;
        if let Some(deployment) = deployment {
            Deployment::update_source_hash_tx(&mut *tx, deployment.id, &new_content_hash).await?;
        }
        tx.commit().await?;

        let collection_staging = collection_staging.keep();
        let project_staging = project_staging.keep();
        self.fs.atomic_replace_dir(collection_dir, &collection_staging)?;
        self.fs.atomic_replace_dir(deployed_dir, &project_staging)?;

        let post_snapshot = self
            .snapshots
            .create_snapshot(pool, subject, collection_dir, SnapshotReason::PostSync, "sync")
            .await?;

        let soft_conflicts = plan
            .paths
            .iter()
            .filter(|p| p.conflict == ConflictClass::Soft)
            .map(|p| p.path.clone())
            .collect();
        tracing::info!(
            artifact = %artifact.name,
            paths = final_tree.len(),
            ?strategy,
            "sync applied"
        );
        Ok(SyncReport {
            applied_paths: final_tree.keys().cloned().collect(),
            soft_conflicts,
            new_content_hash,
            pre_snapshot,
            post_snapshot,
        })
    }
}

fn tree_root(tree: &BTreeMap<String, String>) -> String {
    let entries: Vec<(String, String)> = tree
        .iter()
        .map(|(p, h)| (p.clone(), h.clone()))
        .collect();
    FsService::tree_root_hash(&entries)
}

/// A contiguous rewrite of base lines `[base_start, base_end)` with the
/// side's replacement lines.
#[derive(Debug, Clone)]
struct Replacement {
    base_start: usize,
    base_end: usize,
    lines: Vec<String>,
    from_project: bool,
}

fn replacements(base: &str, side: &str, from_project: bool) -> Vec<Replacement> {
    let side_lines: Vec<&str> = side.split_inclusive('\n').collect();
    let diff = TextDiff::from_lines(base, side);
    let mut out = Vec::new();
    for op in diff.ops() {
        if op.tag() == DiffTag::Equal {
            continue;
        }
        let old = op.old_range();
        let new = op.new_range();
        out.push(Replacement {
            base_start: old.start,
            base_end: old.end,
            lines: side_lines[new.start..new.end.min(side_lines.len())]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            from_project,
        });
    }
    out
}

/// Per-file three-way classification over unified-diff hunks rebased onto
/// the common ancestor. Overlapping hunks are a hard conflict;
/// non-overlapping hunks within 2 lines are soft (auto-merge with a
/// warning); anything else merges cleanly.
fn classify_three_way(
    base_bytes: &[u8],
    collection_bytes: &[u8],
    project_bytes: &[u8],
) -> (ConflictClass, Option<Vec<u8>>) {
    let base = String::from_utf8_lossy(&FsService::canonicalize_bytes(base_bytes)).into_owned();
    let collection =
        String::from_utf8_lossy(&FsService::canonicalize_bytes(collection_bytes)).into_owned();
    let project =
        String::from_utf8_lossy(&FsService::canonicalize_bytes(project_bytes)).into_owned();

    let mut all = replacements(&base, &collection, false);
    all.extend(replacements(&base, &project, true));
    all.sort_by_key(|r| (r.base_start, r.base_end));

    let mut class = ConflictClass::None;
    for pair in all.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if a.from_project == b.from_project {
            continue;
        }
        let overlaps = a.base_end > b.base_start
            || (a.base_start == b.base_start && a.base_start == a.base_end
                && b.base_start == b.base_end);
        if overlaps {
            return (ConflictClass::Hard, None);
        }
        if b.base_start.saturating_sub(a.base_end) <= 2 {
            class = class.max(ConflictClass::Soft);
        }
    }

    // Hunks interleave cleanly; rebuild the merged text from the base.
    let base_lines: Vec<&str> = base.split_inclusive('\n').collect();
    let mut merged = String::new();
    let mut cursor = 0usize;
    for replacement in &all {
        if replacement.base_start > cursor {
            merged.extend(base_lines[cursor..replacement.base_start].iter().copied());
        }
        for line in &replacement.lines {
            merged.push_str(line);
        }
        cursor = cursor.max(replacement.base_end);
    }
    if cursor < base_lines.len() {
        merged.extend(base_lines[cursor..].iter().copied());
    }
    (class, Some(merged.into_bytes()))
}
