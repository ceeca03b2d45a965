use std::path::{Path, PathBuf};

use chrono::Utc;
use db::models::{
    artifact::Artifact,
    deployment::Deployment,
    project::Project,
    snapshot::{Snapshot, SnapshotReason, SnapshotSubject},
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{
    fs::{CLAUDE_DIR, DeployJournal, FsError, FsService, JournalEntry},
    versioning::{SnapshotError, SnapshotService},
};

#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("Artifact {0} has no files in the collection store")]
    MissingSource(Uuid),
    #[error("Deployment not found")]
    NotFound,
    #[error(
        "Target {path} was modified outside skillmeat; re-run with overwrite to replace it"
    )]
    LocalModificationPresent { path: PathBuf },
    #[error("Deploy cancelled; project tree restored from pre-deploy snapshot")]
    Cancelled,
    #[error("Member {name} failed mid-apply; project tree restored from pre-deploy snapshot: {source}")]
    MemberFailedRolledBack {
        name: String,
        #[source]
        source: FsError,
    },
}

/// Platform profile: where artifact types land inside a project. The
/// default profile keeps everything under `.claude/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformProfile {
    pub id: String,
    pub root_dir: String,
}

impl Default for PlatformProfile {
    fn default() -> Self {
        PlatformProfile {
            id: "claude-code".to_string(),
            root_dir: CLAUDE_DIR.to_string(),
        }
    }
}

impl PlatformProfile {
    /// Map an artifact's `path_pattern` into this profile's root.
    pub fn target_relative(&self, artifact: &Artifact) -> PathBuf {
        let pattern = Path::new(&artifact.path_pattern);
        match pattern.strip_prefix(CLAUDE_DIR) {
            Ok(rest) => Path::new(&self.root_dir).join(rest),
            Err(_) => Path::new(&self.root_dir)
                .join(artifact.artifact_type.plural())
                .join(&artifact.name),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    pub overwrite: bool,
    pub cancel: CancellationToken,
}

#[derive(Debug)]
pub struct DeployPlanEntry {
    pub artifact: Artifact,
    pub relative_dir: PathBuf,
    pub absolute_dir: PathBuf,
    pub files: Vec<(String, Vec<u8>)>,
    pub content_hash: String,
    /// Disk already matches; apply refreshes `deployed_at` only.
    pub up_to_date: bool,
}

#[derive(Debug)]
pub struct DeployPlan {
    pub project: Project,
    pub profile: PlatformProfile,
    pub entries: Vec<DeployPlanEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppliedDeployment {
    pub artifact_uuid: Uuid,
    pub name: String,
    pub deployed_path: PathBuf,
    pub content_hash: String,
    pub skipped_write: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedDeployment {
    pub artifact_uuid: Uuid,
    pub name: String,
    pub error: String,
}

/// Outcome of a coordinated apply. `partial` is set when a member failed
/// after earlier members had already been renamed into place; the applied
/// and failed sets are part of the contract and never truncated.
#[derive(Debug)]
pub struct DeployReport {
    pub applied: Vec<AppliedDeployment>,
    pub failed: Vec<FailedDeployment>,
    pub pre_snapshot: Option<Snapshot>,
    pub post_snapshot: Option<Snapshot>,
    pub partial: bool,
}

/// Project-local deployment ledger (`.skillmeat-deployed.toml`): the
/// offline projection of the Deployment table. The database wins when the
/// two disagree; every apply/undeploy rewrites the ledger from rows.
pub const LEDGER_FILE: &str = ".skillmeat-deployed.toml";

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DeploymentLedger {
    #[serde(default)]
    pub artifact: Vec<LedgerEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub uuid: Uuid,
    #[serde(rename = "type")]
    pub artifact_type: String,
    pub name: String,
    pub source_content_hash: String,
    pub deployed_at: String,
    pub profile_id: String,
    pub path: String,
}

/// Plans and applies atomic per-artifact deployment to a project and
/// tracks drift afterwards.
#[derive(Clone)]
pub struct DeploymentService {
    fs: FsService,
    snapshots: SnapshotService,
}

impl DeploymentService {
    pub fn new(fs: FsService, snapshots: SnapshotService) -> Self {
        DeploymentService { fs, snapshots }
    }

    /// Collection-side storage directory for an artifact
    /// (`<collection_root>/artifacts/<type_plural>/<name>`).
    pub fn artifact_source_dir(collection_root: &Path, artifact: &Artifact) -> PathBuf {
        collection_root
            .join("artifacts")
            .join(artifact.artifact_type.plural())
            .join(&artifact.name)
    }

    /// Compute target paths, bytes, and expected hashes. Read-only; no
    /// state change.
    pub async fn plan(
        &self,
        collection_root: &Path,
        artifacts: Vec<Artifact>,
        project: &Project,
        profile: &PlatformProfile,
    ) -> Result<DeployPlan, DeployError> {
        let project_root = PathBuf::from(&project.path);
        let mut entries = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            let source_dir = Self::artifact_source_dir(collection_root, &artifact);
            let tree = self.fs.ls_tree(&source_dir)?;
            if tree.is_empty() {
                return Err(DeployError::MissingSource(artifact.uuid));
            }
            let mut files = Vec::with_capacity(tree.len());
            for (relative, _) in &tree {
                files.push((relative.clone(), self.fs.read_file(&source_dir.join(relative))?));
            }
            let content_hash = FsService::tree_root_hash(&tree);
            let relative_dir = profile.target_relative(&artifact);
            let absolute_dir =
                self.fs
                    .resolve_path(&project_root, &relative_dir, Some(&profile.root_dir))?;
            let up_to_date = absolute_dir.exists()
                && self.fs.dir_content_hash(&absolute_dir)? == content_hash;
            entries.push(DeployPlanEntry {
                artifact,
                relative_dir,
                absolute_dir,
                files,
                content_hash,
                up_to_date,
            });
        }
        Ok(DeployPlan {
            project: project.clone(),
            profile: profile.clone(),
            entries,
        })
    }

    /// Deploy-time conflict policy: a target directory whose current
    /// content is unknown to the Deployment table is a foreign
    /// modification and fails unless `overwrite` is set.
    async fn check_conflicts(
        &self,
        pool: &SqlitePool,
        plan: &DeployPlan,
        options: &DeployOptions,
    ) -> Result<(), DeployError> {
        if options.overwrite {
            return Ok(());
        }
        for entry in &plan.entries {
            if entry.up_to_date || !entry.absolute_dir.exists() {
                continue;
            }
            let current = self.fs.dir_content_hash(&entry.absolute_dir)?;
            let recorded = Deployment::find_for_target(
                pool,
                entry.artifact.uuid,
                plan.project.id,
                &plan.profile.id,
            )
            .await?;
            let known = recorded.is_some_and(|d| d.source_content_hash == current);
            if !known {
                return Err(DeployError::LocalModificationPresent {
                    path: entry.absolute_dir.clone(),
                });
            }
        }
        Ok(())
    }

    /// Coordinated apply. Stages every member first, then renames them into
    /// place in membership order with a journal, then records Deployment
    /// rows and rewrites the ledger. A failure or cancellation before any
    /// rename is a clean abort; after a rename it restores the pre-deploy
    /// snapshot when possible and otherwise reports a partial outcome.
    pub async fn apply(
        &self,
        pool: &SqlitePool,
        plan: DeployPlan,
        options: &DeployOptions,
    ) -> Result<DeployReport, DeployError> {
        self.check_conflicts(pool, &plan, options).await?;

        let project_root = PathBuf::from(&plan.project.path);
        let claude_root = project_root.join(&plan.profile.root_dir);
        let subject = SnapshotSubject::Project { id: plan.project.id };

        let pre_snapshot = self
            .snapshots
            .create_snapshot(pool, subject, &claude_root, SnapshotReason::PreDeploy, "deploy")
            .await?;

        // Stage everything before touching the destination.
        let mut staged = Vec::with_capacity(plan.entries.len());
        for entry in &plan.entries {
            if entry.up_to_date {
                staged.push(None);
                continue;
            }
            let staging = self.fs.create_staging_dir(&entry.absolute_dir)?;
            for (relative, bytes) in &entry.files {
                self.fs.write_file(&staging.path().join(relative), bytes)?;
            }
            staged.push(Some(staging));
        }

        let journal = DeployJournal {
            operation: "deploy".to_string(),
            entries: plan
                .entries
                .iter()
                .map(|e| JournalEntry {
                    relative_path: e.relative_dir.to_string_lossy().into_owned(),
                    applied: false,
                })
                .collect(),
        };
        self.fs.write_journal(&claude_root, &journal)?;

        let mut applied = Vec::new();
        let mut failed = Vec::new();
        let mut journal = journal;
        for (index, (entry, staging)) in plan.entries.iter().zip(staged.into_iter()).enumerate() {
            // Safe cancellation point: between per-artifact renames.
            if options.cancel.is_cancelled() {
                self.fs.clear_journal(&claude_root)?;
                self.snapshots.restore_tree(&pre_snapshot, &claude_root)?;
                return Err(DeployError::Cancelled);
            }
            let result = match staging {
                Some(staging) => {
                    let staging_path = staging.keep();
                    self.fs.atomic_replace_dir(&entry.absolute_dir, &staging_path)
                }
                None => Ok(()),
            };
            match result {
                Ok(()) => {
                    journal.entries[index].applied = true;
                    self.fs.write_journal(&claude_root, &journal)?;
                    applied.push(AppliedDeployment {
                        artifact_uuid: entry.artifact.uuid,
                        name: entry.artifact.name.clone(),
                        deployed_path: entry.absolute_dir.clone(),
                        content_hash: entry.content_hash.clone(),
                        skipped_write: entry.up_to_date,
                    });
                }
                Err(err) if applied.iter().all(|a| a.skipped_write) => {
                    // Nothing has been written yet; undo is exact, so this
                    // is a terminal failure with the DB untouched.
                    self.fs.clear_journal(&claude_root)?;
                    self.snapshots.restore_tree(&pre_snapshot, &claude_root)?;
                    return Err(DeployError::MemberFailedRolledBack {
                        name: entry.artifact.name.clone(),
                        source: err,
                    });
                }
                Err(err) => {
                    // A member failed after earlier renames landed. Try the
                    // pre-deploy snapshot; if that works the tree is back to
                    // pre-deploy and the failure is terminal, otherwise
                    // report the partial outcome with exact applied/failed
                    // sets.
                    match self.snapshots.restore_tree(&pre_snapshot, &claude_root) {
                        Ok(()) => {
                            self.fs.clear_journal(&claude_root)?;
                            return Err(DeployError::MemberFailedRolledBack {
                                name: entry.artifact.name.clone(),
                                source: err,
                            });
                        }
                        Err(restore_err) => {
                            tracing::error!(
                                error = %restore_err,
                                "pre-deploy snapshot restore failed; reporting partial deploy"
                            );
                            failed.push(FailedDeployment {
                                artifact_uuid: entry.artifact.uuid,
                                name: entry.artifact.name.clone(),
                                error: err.to_string(),
                            });
                            for remaining in &plan.entries[index + 1..] {
                                failed.push(FailedDeployment {
                                    artifact_uuid: remaining.artifact.uuid,
                                    name: remaining.artifact.name.clone(),
                                    error: "skipped after earlier member failure".to_string(),
                                });
                            }
                            break;
                        }
                    }
                }
            }
        }

        // Record what actually landed.
        let now = Utc::now();
        let mut tx = pool.begin().await?;
        for done in &applied {
            Deployment::upsert_tx(
                &mut *tx,
                done.artifact_uuid,
                plan.project.id,
                &plan.profile.id,
                &done.content_hash,
                &done.deployed_path.to_string_lossy(),
                now,
            )
            .await?;
        }
        if !applied.is_empty() {
            Project::record_deployment_tx(&mut *tx, plan.project.id, now).await?;
        }
        tx.commit().await?;

        if failed.is_empty() {
            self.fs.clear_journal(&claude_root)?;
        }
        self.write_ledger(pool, &plan.project).await?;

        let post_snapshot = if failed.is_empty() {
            Some(
                self.snapshots
                    .create_snapshot(
                        pool,
                        subject,
                        &claude_root,
                        SnapshotReason::PostDeploy,
                        "deploy",
                    )
                    .await?,
            )
        } else {
            None
        };

        tracing::info!(
            project = %plan.project.name,
            applied = applied.len(),
            failed = failed.len(),
            "deploy apply finished"
        );
        Ok(DeployReport {
            partial: !failed.is_empty(),
            applied,
            failed,
            pre_snapshot: Some(pre_snapshot),
            post_snapshot,
        })
    }

    /// Drift check: does the deployed tree still match the hash recorded
    /// at deploy time?
    pub fn is_modified(&self, deployment: &Deployment) -> bool {
        self.fs.detect_changes(
            &deployment.source_content_hash,
            Path::new(&deployment.deployed_path),
        )
    }

    /// Remove a deployment: delete the deployed tree, drop the row, and
    /// refresh the project counters and ledger.
    pub async fn undeploy(
        &self,
        pool: &SqlitePool,
        deployment_id: Uuid,
    ) -> Result<(), DeployError> {
        let deployment = Deployment::find_by_id(pool, deployment_id)
            .await?
            .ok_or(DeployError::NotFound)?;
        let project = Project::find_by_id(pool, deployment.project_id)
            .await?
            .ok_or(DeployError::NotFound)?;

        let deployed_path = PathBuf::from(&deployment.deployed_path);
        if deployed_path.exists() {
            std::fs::remove_dir_all(&deployed_path).map_err(|source| FsError::Io {
                path: deployed_path.clone(),
                source,
            })?;
        }

        let mut tx = pool.begin().await?;
        Deployment::delete_tx(&mut *tx, deployment.id).await?;
        Project::record_deployment_tx(&mut *tx, project.id, Utc::now()).await?;
        tx.commit().await?;

        self.write_ledger(pool, &project).await?;
        Ok(())
    }

    /// Rewrite the project-local ledger from Deployment rows (DB wins).
    pub async fn write_ledger(&self, pool: &SqlitePool, project: &Project) -> Result<(), DeployError> {
        let deployments = Deployment::find_by_project(pool, project.id).await?;
        let mut entries = Vec::with_capacity(deployments.len());
        for deployment in deployments {
            let Some(artifact) = Artifact::find_by_id(pool, deployment.artifact_uuid).await? else {
                continue;
            };
            entries.push(LedgerEntry {
                uuid: deployment.artifact_uuid,
                artifact_type: artifact.artifact_type.to_string(),
                name: artifact.name,
                source_content_hash: deployment.source_content_hash,
                deployed_at: deployment.deployed_at.to_rfc3339(),
                profile_id: deployment.profile_id,
                path: deployment.deployed_path,
            });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        let ledger = DeploymentLedger { artifact: entries };
        let rendered = toml::to_string_pretty(&ledger).unwrap_or_default();
        let path = Path::new(&project.path).join(LEDGER_FILE);
        self.fs.write_file(&path, rendered.as_bytes())?;
        Ok(())
    }

    /// Offline read of the project-local ledger.
    pub fn read_ledger(&self, project_path: &Path) -> Result<DeploymentLedger, DeployError> {
        let path = project_path.join(LEDGER_FILE);
        if !path.exists() {
            return Ok(DeploymentLedger::default());
        }
        let bytes = self.fs.read_file(&path)?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(toml::from_str(&text).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use db::models::{
        artifact::{ArtifactOrigin, ArtifactType, CreateArtifact},
        collection::{Collection, CreateCollection},
        project::CreateProject,
    };

    use super::*;

    struct Fixture {
        dbs: db::DBService,
        fs: FsService,
        service: DeploymentService,
        collection: Collection,
        collection_root: PathBuf,
        project: Project,
        _dirs: Vec<tempfile::TempDir>,
    }

    async fn fixture() -> Fixture {
        let dbs = db::DBService::new_in_memory().await.unwrap();
        let fs = FsService::new();
        let blob_dir = tempfile::tempdir().unwrap();
        let snapshots = SnapshotService::new(blob_dir.path().to_path_buf(), fs.clone());
        let service = DeploymentService::new(fs.clone(), snapshots);

        let collection_dir = tempfile::tempdir().unwrap();
        let collection = Collection::create(
            &dbs.pool,
            &CreateCollection {
                name: "main".to_string(),
                root_path: collection_dir.path().to_string_lossy().into_owned(),
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();

        let project_dir = tempfile::tempdir().unwrap();
        let project = Project::create(
            &dbs.pool,
            &CreateProject {
                name: "demo".to_string(),
                path: project_dir.path().to_string_lossy().into_owned(),
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();

        let collection_root = collection_dir.path().to_path_buf();
        Fixture {
            dbs,
            fs,
            service,
            collection,
            collection_root,
            project,
            _dirs: vec![blob_dir, collection_dir, project_dir],
        }
    }

    async fn seed_artifact(fx: &Fixture, name: &str, body: &[u8]) -> Artifact {
        let uuid = Uuid::new_v4();
        let source_dir = fx
            .collection_root
            .join("artifacts")
            .join("skills")
            .join(name);
        fx.fs.write_file(&source_dir.join("SKILL.md"), body).unwrap();
        let hash = fx.fs.dir_content_hash(&source_dir).unwrap();
        Artifact::create(
            &fx.dbs.pool,
            &CreateArtifact {
                collection_id: fx.collection.id,
                name: name.to_string(),
                artifact_type: ArtifactType::Skill,
                origin: ArtifactOrigin::Local,
                upstream: None,
                version_spec: None,
                resolved_version: None,
                content_hash: hash,
                path_pattern: format!(".claude/skills/{name}"),
                tags: Vec::new(),
                metadata: None,
            },
            uuid,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn deploy_roundtrip_has_no_drift_and_writes_ledger() {
        let fx = fixture().await;
        let artifact = seed_artifact(&fx, "release", b"release steps\n").await;
        let plan = fx
            .service
            .plan(
                &fx.collection_root,
                vec![artifact.clone()],
                &fx.project,
                &PlatformProfile::default(),
            )
            .await
            .unwrap();
        let report = fx
            .service
            .apply(&fx.dbs.pool, plan, &DeployOptions::default())
            .await
            .unwrap();
        assert!(!report.partial);
        assert_eq!(report.applied.len(), 1);
        assert!(report.pre_snapshot.is_some());
        assert!(report.post_snapshot.is_some());

        let deployment = Deployment::find_for_target(
            &fx.dbs.pool,
            artifact.uuid,
            fx.project.id,
            "claude-code",
        )
        .await
        .unwrap()
        .unwrap();
        assert!(!fx.service.is_modified(&deployment));

        let deployed_file = Path::new(&fx.project.path).join(".claude/skills/release/SKILL.md");
        assert_eq!(fx.fs.read_file(&deployed_file).unwrap(), b"release steps\n");

        let ledger = fx.service.read_ledger(Path::new(&fx.project.path)).unwrap();
        assert_eq!(ledger.artifact.len(), 1);
        assert_eq!(ledger.artifact[0].uuid, artifact.uuid);

        // Drift after a local edit.
        fx.fs.write_file(&deployed_file, b"edited locally\n").unwrap();
        assert!(fx.service.is_modified(&deployment));
    }

    #[tokio::test]
    async fn redeploy_is_idempotent_but_refreshes_timestamp() {
        let fx = fixture().await;
        let artifact = seed_artifact(&fx, "release", b"release steps\n").await;
        let profile = PlatformProfile::default();
        for _ in 0..2 {
            let plan = fx
                .service
                .plan(
                    &fx.collection_root,
                    vec![artifact.clone()],
                    &fx.project,
                    &profile,
                )
                .await
                .unwrap();
            fx.service
                .apply(&fx.dbs.pool, plan, &DeployOptions::default())
                .await
                .unwrap();
        }
        let second_plan = fx
            .service
            .plan(
                &fx.collection_root,
                vec![artifact.clone()],
                &fx.project,
                &profile,
            )
            .await
            .unwrap();
        assert!(second_plan.entries[0].up_to_date);

        let deployments = Deployment::find_by_project(&fx.dbs.pool, fx.project.id)
            .await
            .unwrap();
        assert_eq!(deployments.len(), 1);
    }

    #[tokio::test]
    async fn foreign_modification_blocks_without_overwrite() {
        let fx = fixture().await;
        let artifact = seed_artifact(&fx, "release", b"v1\n").await;
        let profile = PlatformProfile::default();

        // Someone else wrote into the target first.
        let target = Path::new(&fx.project.path).join(".claude/skills/release/SKILL.md");
        fx.fs.write_file(&target, b"foreign content\n").unwrap();

        let plan = fx
            .service
            .plan(
                &fx.collection_root,
                vec![artifact.clone()],
                &fx.project,
                &profile,
            )
            .await
            .unwrap();
        let err = fx
            .service
            .apply(&fx.dbs.pool, plan, &DeployOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::LocalModificationPresent { .. }));
        assert_eq!(fx.fs.read_file(&target).unwrap(), b"foreign content\n");

        let plan = fx
            .service
            .plan(
                &fx.collection_root,
                vec![artifact],
                &fx.project,
                &profile,
            )
            .await
            .unwrap();
        let report = fx
            .service
            .apply(
                &fx.dbs.pool,
                plan,
                &DeployOptions {
                    overwrite: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(report.applied.len(), 1);
        assert_eq!(fx.fs.read_file(&target).unwrap(), b"v1\n");
    }

    #[tokio::test]
    async fn cancellation_before_renames_restores_pre_deploy_tree() {
        let fx = fixture().await;
        let artifact = seed_artifact(&fx, "release", b"v1\n").await;
        let claude_root = Path::new(&fx.project.path).join(".claude");
        fx.fs
            .write_file(&claude_root.join("context/existing.md"), b"keep me\n")
            .unwrap();
        let before = fx.fs.dir_content_hash(&claude_root).unwrap();

        let plan = fx
            .service
            .plan(
                &fx.collection_root,
                vec![artifact],
                &fx.project,
                &PlatformProfile::default(),
            )
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = fx
            .service
            .apply(
                &fx.dbs.pool,
                plan,
                &DeployOptions {
                    overwrite: false,
                    cancel,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Cancelled));
        assert_eq!(fx.fs.dir_content_hash(&claude_root).unwrap(), before);
        assert!(
            Deployment::find_by_project(&fx.dbs.pool, fx.project.id)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn undeploy_removes_tree_row_and_ledger_entry() {
        let fx = fixture().await;
        let artifact = seed_artifact(&fx, "release", b"v1\n").await;
        let plan = fx
            .service
            .plan(
                &fx.collection_root,
                vec![artifact.clone()],
                &fx.project,
                &PlatformProfile::default(),
            )
            .await
            .unwrap();
        fx.service
            .apply(&fx.dbs.pool, plan, &DeployOptions::default())
            .await
            .unwrap();
        let deployment = Deployment::find_for_target(
            &fx.dbs.pool,
            artifact.uuid,
            fx.project.id,
            "claude-code",
        )
        .await
        .unwrap()
        .unwrap();

        fx.service.undeploy(&fx.dbs.pool, deployment.id).await.unwrap();
        assert!(!Path::new(&deployment.deployed_path).exists());
        assert!(
            Deployment::find_by_project(&fx.dbs.pool, fx.project.id)
                .await
                .unwrap()
                .is_empty()
        );
        let ledger = fx.service.read_ledger(Path::new(&fx.project.path)).unwrap();
        assert!(ledger.artifact.is_empty());
    }
}
