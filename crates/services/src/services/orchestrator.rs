use std::{collections::HashMap, path::PathBuf};

use db::{
    DBService,
    models::{
        artifact::{Artifact, ArtifactError, CreateArtifact, UpdateArtifact},
        collection::Collection,
        composite::CompositeArtifact,
        deployment::Deployment,
        deployment_set::DeploymentSet,
        memory_item::{MemoryItem, MemoryItemError, MemoryStatus},
        project::Project,
        snapshot::{Snapshot, SnapshotReason, SnapshotSubject},
    },
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{
    artifact_index::{ArtifactIndexService, DetectedArtifact, IdentityMatch, IndexError},
    composite::{CompositeError, CompositeService, ImportedComposite},
    config::CoreConfig,
    context::{ContextError, ContextPack, ContextPackerService, ContextSelector},
    deploy::{DeployError, DeployOptions, DeployReport, DeploymentService, PlatformProfile},
    events::{ChangeKind, EntityKind, EventService},
    fs::{FsError, FsService},
    locks::{AggregateKind, AggregateLocks},
    memory::{AppliedExtraction, ExtractionOutcome, MemoryError, MemoryExtractionService},
    sync::{SyncError, SyncPlan, SyncReport, SyncService, SyncStrategy},
    versioning::{RollbackOutcome, SnapshotError, SnapshotService},
};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    Project(#[from] db::models::project::ProjectError),
    #[error(transparent)]
    Composite(#[from] CompositeError),
    #[error(transparent)]
    Deploy(#[from] DeployError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    MemoryItem(#[from] MemoryItemError),
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error("Unknown entity: {0}")]
    UnknownEntity(Uuid),
    #[error("Sync kept hitting concurrent modifications after {0} attempts")]
    RetriesExhausted(u32),
}

/// What a deploy call targets; composites and sets expand to a coordinated
/// multi-artifact deploy.
#[derive(Debug, Clone, Copy)]
pub enum DeployTarget {
    Artifact(Uuid),
    Composite(Uuid),
    Set(Uuid),
}

/// Capability-oriented facade over the engines. Every public operation is
/// a transaction boundary: aggregate lock, precondition checks,
/// snapshot-on-mutation, DB+FS write-through, then event emission.
#[derive(Clone)]
pub struct Orchestrator {
    pub db: DBService,
    pub config: CoreConfig,
    fs: FsService,
    index: ArtifactIndexService,
    composites: CompositeService,
    deployments: DeploymentService,
    sync: SyncService,
    snapshots: SnapshotService,
    memory: MemoryExtractionService,
    packer: ContextPackerService,
    events: EventService,
    locks: AggregateLocks,
    cancel: CancellationToken,
}

const SYNC_RETRY_LIMIT: u32 = 3;

impl Orchestrator {
    pub fn new(db: DBService, config: CoreConfig) -> Self {
        let fs = FsService::new();
        let snapshots = SnapshotService::new(config.snapshots_root.clone(), fs.clone());
        let index = ArtifactIndexService::new(fs.clone());
        Orchestrator {
            composites: CompositeService::new(index.clone()),
            deployments: DeploymentService::new(fs.clone(), snapshots.clone()),
            sync: SyncService::new(fs.clone(), snapshots.clone()),
            memory: MemoryExtractionService::default(),
            packer: ContextPackerService::new(),
            events: EventService::new(),
            locks: AggregateLocks::new(),
            cancel: CancellationToken::new(),
            index,
            snapshots,
            fs,
            db,
            config,
        }
    }

    pub fn events(&self) -> &EventService {
        &self.events
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn collection_artifact_dir(&self, artifact: &Artifact) -> PathBuf {
        DeploymentService::artifact_source_dir(&self.config.collection_root, artifact)
    }

    /// Import one detected artifact into a collection: resolve identity,
    /// record the row, then materialize its files under the collection
    /// root with a staged atomic swap. A swap failure is reconciled from
    /// the committed row on the next import (idempotent by construction).
    pub async fn import_artifact(
        &self,
        collection_id: Uuid,
        detected: &DetectedArtifact,
    ) -> Result<Artifact, OrchestratorError> {
        let _guard = self.locks.lock(AggregateKind::Collection, collection_id).await;
        Collection::find_by_id(&self.db.pool, collection_id)
            .await?
            .ok_or(OrchestratorError::UnknownEntity(collection_id))?;

        let identity = self
            .index
            .resolve_identity(&self.db.pool, collection_id, detected)
            .await?;

        // Stage the artifact's files next to their final home.
        let artifact_row = match &identity.matched {
            IdentityMatch::ByContentHash(existing) => (**existing).clone(),
            IdentityMatch::ByUpstream(existing) => {
                let mut conn = self.db.pool.acquire().await?;
                Artifact::touch_content_hash(
                    &mut *conn,
                    existing.uuid,
                    &identity.content_hash,
                    detected.resolved_version.as_deref(),
                )
                .await?;
                drop(conn);
                Artifact::find_by_id(&self.db.pool, existing.uuid)
                    .await?
                    .ok_or(OrchestratorError::UnknownEntity(existing.uuid))?
            }
            IdentityMatch::New => {
                let create = CreateArtifact {
                    collection_id,
                    name: identity.canonical_name.clone(),
                    artifact_type: detected.artifact_type,
                    origin: detected.origin,
                    upstream: detected.upstream.clone(),
                    version_spec: detected.version_spec.clone(),
                    resolved_version: detected.resolved_version.clone(),
                    content_hash: identity.content_hash.clone(),
                    path_pattern: identity.path_pattern.clone(),
                    tags: detected.tags.clone(),
                    metadata: detected.metadata.clone(),
                };
                match Artifact::create(&self.db.pool, &create, identity.uuid).await {
                    Ok(row) => row,
                    // Same (type, name) already present: this is a
                    // re-import, so the existing uuid survives and only the
                    // content hash moves.
                    Err(ArtifactError::Conflict(existing)) => {
                        let mut conn = self.db.pool.acquire().await?;
                        Artifact::touch_content_hash(
                            &mut *conn,
                            existing.uuid,
                            &identity.content_hash,
                            detected.resolved_version.as_deref(),
                        )
                        .await?;
                        drop(conn);
                        Artifact::find_by_id(&self.db.pool, existing.uuid)
                            .await?
                            .ok_or(OrchestratorError::UnknownEntity(existing.uuid))?
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        };

        let target_dir = self.collection_artifact_dir(&artifact_row);
        let staging = self.fs.create_staging_dir(&target_dir)?;
        self.fs.copy_tree(&detected.root_dir, staging.path())?;
        let staging_path = staging.keep();
        self.fs.atomic_replace_dir(&target_dir, &staging_path)?;

        self.events
            .emit(EntityKind::Artifact, artifact_row.uuid, ChangeKind::Created);
        Ok(artifact_row)
    }

    /// Import a skill with embedded children as one atomic composite.
    pub async fn import_composite(
        &self,
        collection_id: Uuid,
        skill: &DetectedArtifact,
        embedded: &[DetectedArtifact],
    ) -> Result<ImportedComposite, OrchestratorError> {
        let _guard = self.locks.lock(AggregateKind::Collection, collection_id).await;
        let imported = self
            .composites
            .import_skill_with_embedded(&self.db.pool, collection_id, skill, embedded)
            .await?;

        // Materialize parent and children under the collection root.
        if let Some(parent) = &imported.parent {
            let target = self.collection_artifact_dir(parent);
            let staging = self.fs.create_staging_dir(&target)?;
            self.fs.copy_tree(&skill.root_dir, staging.path())?;
            let staging_path = staging.keep();
            self.fs.atomic_replace_dir(&target, &staging_path)?;
        }
        for (child, detected) in imported.children.iter().zip(embedded) {
            let target = self.collection_artifact_dir(child);
            let staging = self.fs.create_staging_dir(&target)?;
            self.fs.copy_tree(&detected.root_dir, staging.path())?;
            let staging_path = staging.keep();
            self.fs.atomic_replace_dir(&target, &staging_path)?;
        }

        self.events
            .emit(EntityKind::Composite, imported.composite.id, ChangeKind::Created);
        Ok(imported)
    }

    pub async fn update_artifact(
        &self,
        artifact_uuid: Uuid,
        payload: &UpdateArtifact,
    ) -> Result<Artifact, OrchestratorError> {
        let updated = Artifact::update(&self.db.pool, artifact_uuid, payload).await?;
        self.events
            .emit(EntityKind::Artifact, updated.uuid, ChangeKind::Updated);
        Ok(updated)
    }

    /// Delete an artifact row and its collection files. Snapshots survive
    /// to allow restore.
    pub async fn delete_artifact(&self, artifact_uuid: Uuid) -> Result<(), OrchestratorError> {
        let artifact = Artifact::find_by_id(&self.db.pool, artifact_uuid)
            .await?
            .ok_or(OrchestratorError::UnknownEntity(artifact_uuid))?;
        let _guard = self
            .locks
            .lock(AggregateKind::Collection, artifact.collection_id)
            .await;
        Artifact::delete(&self.db.pool, artifact_uuid).await?;
        let dir = self.collection_artifact_dir(&artifact);
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(|source| FsError::Io { path: dir, source })?;
        }
        self.events
            .emit(EntityKind::Artifact, artifact_uuid, ChangeKind::Deleted);
        Ok(())
    }

    /// Register a project at an existing directory. The stored path is
    /// absolute and canonicalized so identity comparisons are stable.
    pub async fn register_project(
        &self,
        name: &str,
        path: &std::path::Path,
    ) -> Result<Project, OrchestratorError> {
        let canonical = self.fs.canonical_project_path(path)?;
        let project = Project::create(
            &self.db.pool,
            &db::models::project::CreateProject {
                name: name.to_string(),
                path: canonical.to_string_lossy().into_owned(),
            },
            Uuid::new_v4(),
        )
        .await?;
        self.events
            .emit(EntityKind::Project, project.id, ChangeKind::Created);
        Ok(project)
    }

    /// Expand a deploy target into its ordered, deduplicated artifact
    /// list. A skill with a companion composite deploys parent first, then
    /// members in membership order.
    async fn expand_target(&self, target: DeployTarget) -> Result<Vec<Artifact>, OrchestratorError> {
        match target {
            DeployTarget::Artifact(uuid) => {
                let artifact = Artifact::find_by_id(&self.db.pool, uuid)
                    .await?
                    .ok_or(OrchestratorError::UnknownEntity(uuid))?;
                let mut list = vec![artifact];
                if let Some(composite) =
                    CompositeArtifact::find_by_artifact_uuid(&self.db.pool, uuid).await?
                {
                    for child in self
                        .composites
                        .resolve_composite_children(&self.db.pool, composite.id)
                        .await?
                    {
                        if list.iter().all(|a| a.uuid != child.uuid) {
                            list.push(child);
                        }
                    }
                }
                Ok(list)
            }
            DeployTarget::Composite(id) => {
                let children = self
                    .composites
                    .resolve_composite_children(&self.db.pool, id)
                    .await?;
                let composite = CompositeArtifact::find_by_id(&self.db.pool, id)
                    .await?
                    .ok_or(OrchestratorError::UnknownEntity(id))?;
                // A skill composite also carries its parent artifact.
                match composite.artifact_uuid() {
                    Some(parent_uuid) => {
                        let mut list = Vec::with_capacity(children.len() + 1);
                        if let Some(parent) =
                            Artifact::find_by_id(&self.db.pool, parent_uuid).await?
                        {
                            list.push(parent);
                        }
                        for child in children {
                            if list.iter().all(|a| a.uuid != child.uuid) {
                                list.push(child);
                            }
                        }
                        Ok(list)
                    }
                    None => Ok(children),
                }
            }
            DeployTarget::Set(id) => {
                DeploymentSet::find_by_id(&self.db.pool, id)
                    .await?
                    .ok_or(OrchestratorError::UnknownEntity(id))?;
                Ok(self.composites.resolve_set(&self.db.pool, id).await?)
            }
        }
    }

    /// Coordinated deploy of a target into a project.
    pub async fn deploy(
        &self,
        target: DeployTarget,
        project_id: Uuid,
        profile: &PlatformProfile,
        options: &DeployOptions,
    ) -> Result<DeployReport, OrchestratorError> {
        let artifacts = self.expand_target(target).await?;
        let project = Project::find_by_id(&self.db.pool, project_id)
            .await?
            .ok_or(OrchestratorError::UnknownEntity(project_id))?;

        let _guard = self.locks.lock(AggregateKind::Project, project_id).await;
        let plan = self
            .deployments
            .plan(&self.config.collection_root, artifacts, &project, profile)
            .await?;
        let report = self.deployments.apply(&self.db.pool, plan, options).await?;

        for applied in &report.applied {
            self.events
                .emit(EntityKind::Deployment, applied.artifact_uuid, ChangeKind::Created);
        }
        self.events
            .emit(EntityKind::Project, project_id, ChangeKind::Updated);
        Ok(report)
    }

    pub async fn undeploy(&self, deployment_id: Uuid) -> Result<(), OrchestratorError> {
        let deployment = Deployment::find_by_id(&self.db.pool, deployment_id)
            .await?
            .ok_or(OrchestratorError::UnknownEntity(deployment_id))?;
        let _guard = self
            .locks
            .lock(AggregateKind::Project, deployment.project_id)
            .await;
        self.deployments.undeploy(&self.db.pool, deployment_id).await?;
        self.events
            .emit(EntityKind::Deployment, deployment_id, ChangeKind::Deleted);
        Ok(())
    }

    /// Gather the directories for one artifact's sync legs.
    async fn sync_dirs(
        &self,
        artifact: &Artifact,
        project_id: Uuid,
    ) -> Result<(PathBuf, PathBuf, Option<Deployment>), OrchestratorError> {
        let collection_dir = self.collection_artifact_dir(artifact);
        let deployment = Deployment::find_by_project(&self.db.pool, project_id)
            .await?
            .into_iter()
            .find(|d| d.artifact_uuid == artifact.uuid);
        let deployed_dir = match &deployment {
            Some(d) => PathBuf::from(&d.deployed_path),
            None => {
                let project = Project::find_by_id(&self.db.pool, project_id)
                    .await?
                    .ok_or(OrchestratorError::UnknownEntity(project_id))?;
                PathBuf::from(&project.path).join(&artifact.path_pattern)
            }
        };
        Ok((collection_dir, deployed_dir, deployment))
    }

    /// Read-only three-way preview for one artifact in one project.
    pub async fn sync_preview(
        &self,
        artifact_uuid: Uuid,
        project_id: Uuid,
    ) -> Result<SyncPlan, OrchestratorError> {
        let artifact = Artifact::find_by_id(&self.db.pool, artifact_uuid)
            .await?
            .ok_or(OrchestratorError::UnknownEntity(artifact_uuid))?;
        let (collection_dir, deployed_dir, _) = self.sync_dirs(&artifact, project_id).await?;
        Ok(self
            .sync
            .preview(&self.db.pool, &artifact, &collection_dir, &deployed_dir, None)
            .await?)
    }

    /// Pull with a strategy. Concurrent modifications between plan and
    /// apply are retried with a fresh plan up to the retry limit.
    pub async fn sync_pull(
        &self,
        artifact_uuid: Uuid,
        project_id: Uuid,
        strategy: SyncStrategy,
        manual: Option<&HashMap<String, Vec<u8>>>,
    ) -> Result<SyncReport, OrchestratorError> {
        let artifact = Artifact::find_by_id(&self.db.pool, artifact_uuid)
            .await?
            .ok_or(OrchestratorError::UnknownEntity(artifact_uuid))?;
        let _guard = self.locks.lock(AggregateKind::Project, project_id).await;
        let (collection_dir, deployed_dir, deployment) =
            self.sync_dirs(&artifact, project_id).await?;

        for _attempt in 0..SYNC_RETRY_LIMIT {
            let plan = self
                .sync
                .preview(&self.db.pool, &artifact, &collection_dir, &deployed_dir, None)
                .await?;
            match self
                .sync
                .apply(
                    &self.db.pool,
                    &artifact,
                    deployment.as_ref(),
                    &plan,
                    strategy,
                    manual,
                    &collection_dir,
                    &deployed_dir,
                )
                .await
            {
                Ok(report) => {
                    self.events
                        .emit(EntityKind::Artifact, artifact.uuid, ChangeKind::Updated);
                    return Ok(report);
                }
                Err(SyncError::ConcurrentModification) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(OrchestratorError::RetriesExhausted(SYNC_RETRY_LIMIT))
    }

    /// Push project edits up to the collection (`ours` semantics).
    pub async fn sync_push(
        &self,
        artifact_uuid: Uuid,
        project_id: Uuid,
    ) -> Result<SyncReport, OrchestratorError> {
        self.sync_pull(artifact_uuid, project_id, SyncStrategy::Ours, None)
            .await
    }

    /// Manual snapshot of an artifact's collection tree or a project's
    /// deployed tree.
    pub async fn snapshot(
        &self,
        subject: SnapshotSubject,
        created_by: &str,
    ) -> Result<Snapshot, OrchestratorError> {
        let dir = self.subject_dir(subject).await?;
        let snapshot = self
            .snapshots
            .create_snapshot(&self.db.pool, subject, &dir, SnapshotReason::Manual, created_by)
            .await?;
        self.events
            .emit(EntityKind::Snapshot, snapshot.id, ChangeKind::Created);
        Ok(snapshot)
    }

    async fn subject_dir(&self, subject: SnapshotSubject) -> Result<PathBuf, OrchestratorError> {
        match subject {
            SnapshotSubject::Artifact { uuid } => {
                let artifact = Artifact::find_by_id(&self.db.pool, uuid)
                    .await?
                    .ok_or(OrchestratorError::UnknownEntity(uuid))?;
                Ok(self.collection_artifact_dir(&artifact))
            }
            SnapshotSubject::Project { id } => {
                let project = Project::find_by_id(&self.db.pool, id)
                    .await?
                    .ok_or(OrchestratorError::UnknownEntity(id))?;
                Ok(PathBuf::from(&project.path).join(super::fs::CLAUDE_DIR))
            }
        }
    }

    /// Roll a subject back to a snapshot. Project rollbacks also revert
    /// the recorded deployment hashes to match the restored trees.
    pub async fn rollback(&self, snapshot_id: Uuid) -> Result<RollbackOutcome, OrchestratorError> {
        let snapshot = Snapshot::find_by_id(&self.db.pool, snapshot_id)
            .await?
            .ok_or(OrchestratorError::UnknownEntity(snapshot_id))?;
        let subject = snapshot
            .subject()
            .ok_or(OrchestratorError::UnknownEntity(snapshot_id))?;
        let dir = self.subject_dir(subject).await?;

        let (kind, aggregate_id) = match subject {
            SnapshotSubject::Artifact { uuid } => (AggregateKind::Collection, uuid),
            SnapshotSubject::Project { id } => (AggregateKind::Project, id),
        };
        let _guard = self.locks.lock(kind, aggregate_id).await;

        let outcome = self
            .snapshots
            .rollback(&self.db.pool, snapshot_id, &dir, "rollback")
            .await?;

        if let SnapshotSubject::Project { id } = subject {
            // Reconcile deployment rows with what is now on disk.
            let deployments = Deployment::find_by_project(&self.db.pool, id).await?;
            for deployment in deployments {
                let deployed = PathBuf::from(&deployment.deployed_path);
                if !deployed.exists() {
                    continue;
                }
                let hash = self.fs.dir_content_hash(&deployed)?;
                if hash != deployment.source_content_hash {
                    let mut conn = self.db.pool.acquire().await?;
                    Deployment::update_source_hash_tx(&mut *conn, deployment.id, &hash).await?;
                }
            }
            if let Some(project) = Project::find_by_id(&self.db.pool, id).await? {
                self.deployments.write_ledger(&self.db.pool, &project).await?;
            }
        }

        self.events
            .emit(EntityKind::Snapshot, outcome.compensating.id, ChangeKind::Created);
        Ok(outcome)
    }

    /// Heuristic memory extraction. Preview never touches the store.
    pub fn extract_memory_preview(
        &self,
        transcript: &str,
    ) -> Result<ExtractionOutcome, OrchestratorError> {
        Ok(self.memory.extract(transcript)?)
    }

    pub async fn extract_memory_apply(
        &self,
        project_id: Uuid,
        transcript: &str,
    ) -> Result<AppliedExtraction, OrchestratorError> {
        Project::find_by_id(&self.db.pool, project_id)
            .await?
            .ok_or(OrchestratorError::UnknownEntity(project_id))?;
        let outcome = self.memory.extract(transcript)?;
        let applied = self.memory.apply(&self.db.pool, project_id, &outcome).await?;
        for item in &applied.inserted {
            self.events
                .emit(EntityKind::MemoryItem, item.id, ChangeKind::Created);
        }
        Ok(applied)
    }

    pub async fn promote_memory(
        &self,
        item_id: Uuid,
        to: MemoryStatus,
    ) -> Result<MemoryItem, OrchestratorError> {
        let item = MemoryItem::transition(&self.db.pool, item_id, to).await?;
        self.events
            .emit(EntityKind::MemoryItem, item.id, ChangeKind::Updated);
        Ok(item)
    }

    pub async fn deprecate_memory(&self, item_id: Uuid) -> Result<MemoryItem, OrchestratorError> {
        self.promote_memory(item_id, MemoryStatus::Deprecated).await
    }

    /// Merge duplicate memory items: the winner absorbs the highest
    /// confidence and the union of anchors, the losers are deprecated.
    pub async fn merge_memory(
        &self,
        winner_id: Uuid,
        loser_ids: &[Uuid],
    ) -> Result<MemoryItem, OrchestratorError> {
        let winner = MemoryItem::find_by_id(&self.db.pool, winner_id)
            .await?
            .ok_or(OrchestratorError::UnknownEntity(winner_id))?;
        let mut confidence = winner.confidence;
        let mut anchors = winner.anchor_list();
        let mut losers = Vec::with_capacity(loser_ids.len());
        for loser_id in loser_ids {
            let loser = MemoryItem::find_by_id(&self.db.pool, *loser_id)
                .await?
                .ok_or(OrchestratorError::UnknownEntity(*loser_id))?;
            confidence = confidence.max(loser.confidence);
            for anchor in loser.anchor_list() {
                if !anchors.contains(&anchor) {
                    anchors.push(anchor);
                }
            }
            losers.push(loser);
        }

        let mut conn = self.db.pool.acquire().await?;
        MemoryItem::absorb_tx(&mut *conn, winner_id, confidence, &anchors).await?;
        drop(conn);
        for loser in losers {
            if loser.status != MemoryStatus::Deprecated {
                MemoryItem::transition(&self.db.pool, loser.id, MemoryStatus::Deprecated).await?;
            }
            self.events
                .emit(EntityKind::MemoryItem, loser.id, ChangeKind::Updated);
        }
        let merged = MemoryItem::find_by_id(&self.db.pool, winner_id)
            .await?
            .ok_or(OrchestratorError::UnknownEntity(winner_id))?;
        self.events
            .emit(EntityKind::MemoryItem, winner_id, ChangeKind::Updated);
        Ok(merged)
    }

    pub async fn pack_context(
        &self,
        project_id: Uuid,
        selector: &ContextSelector,
        budget_tokens: usize,
    ) -> Result<ContextPack, OrchestratorError> {
        Ok(self
            .packer
            .pack(&self.db.pool, project_id, selector, budget_tokens)
            .await?)
    }

    pub async fn pack_context_module(
        &self,
        module_id: Uuid,
        budget_tokens: usize,
    ) -> Result<ContextPack, OrchestratorError> {
        Ok(self.packer.pack_module(&self.db.pool, module_id, budget_tokens).await?)
    }

    /// Apply retention to one subject's snapshot history and reclaim blob
    /// space. GC runs outside the aggregate locks; the blob store is
    /// append-only for everyone else.
    pub async fn prune_snapshots(
        &self,
        subject: SnapshotSubject,
        policy: super::versioning::RetentionPolicy,
    ) -> Result<usize, OrchestratorError> {
        let deleted = self
            .snapshots
            .apply_retention(&self.db.pool, subject, policy)
            .await?;
        for id in &deleted {
            self.events.emit(EntityKind::Snapshot, *id, ChangeKind::Deleted);
        }
        let removed_blobs = self.snapshots.gc(&self.db.pool).await?;
        tracing::debug!(
            snapshots = deleted.len(),
            blobs = removed_blobs,
            "snapshot retention pass finished"
        );
        Ok(deleted.len())
    }
}
