use std::collections::HashSet;

use db::models::{
    artifact::{Artifact, ArtifactError, CreateArtifact},
    composite::{CompositeArtifact, CompositeMembership, CompositeType},
    deployment_set::{DeploymentSet, DeploymentSetMember, SetMemberRef},
    group::{Group, GroupMembership},
};
use serde_json::json;
use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

use super::artifact_index::{
    ArtifactIndexService, DetectedArtifact, IdentityMatch, IndexError, ResolvedIdentity,
};

/// Read-phase output for one artifact write inside an import transaction.
struct ArtifactWritePlan {
    detected: DetectedArtifact,
    identity: ResolvedIdentity,
}

#[derive(Debug, Error)]
pub enum CompositeError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error("Adding this member would create a cycle")]
    CyclicComposite,
    #[error("Set nesting exceeds the depth limit of {limit}", limit = MAX_RESOLUTION_DEPTH)]
    DepthExceeded,
    #[error("Member references a missing entity: {0}")]
    DanglingMember(Uuid),
    #[error("Composite not found")]
    NotFound,
}

/// Safety net applied at resolution time on top of the write-time DAG
/// guard.
pub const MAX_RESOLUTION_DEPTH: usize = 20;

#[derive(Debug)]
pub struct ImportedComposite {
    pub parent: Option<Artifact>,
    pub composite: CompositeArtifact,
    pub children: Vec<Artifact>,
    /// Child rows that already existed and were reused by content hash.
    pub deduplicated: usize,
}

/// Builds composites (plugins, skills-with-embedded, deployment sets),
/// resolves their DAGs, and deduplicates membership.
#[derive(Clone)]
pub struct CompositeService {
    index: ArtifactIndexService,
}

impl CompositeService {
    pub fn new(index: ArtifactIndexService) -> Self {
        CompositeService { index }
    }

    /// Resolve a detected artifact into a write plan. Pure reads; the
    /// matching write happens later inside the import transaction so the
    /// pool connection is never needed while the transaction is open.
    async fn plan_artifact(
        &self,
        pool: &SqlitePool,
        collection_id: Uuid,
        detected: &DetectedArtifact,
    ) -> Result<ArtifactWritePlan, CompositeError> {
        let identity = self
            .index
            .resolve_identity(pool, collection_id, detected)
            .await?;
        Ok(ArtifactWritePlan {
            detected: detected.clone(),
            identity,
        })
    }

    /// Apply one planned artifact write inside the import transaction.
    /// Returns the row and whether an existing row was reused.
    async fn apply_artifact_plan(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        collection_id: Uuid,
        plan: &ArtifactWritePlan,
    ) -> Result<(Artifact, bool), CompositeError> {
        match &plan.identity.matched {
            IdentityMatch::ByContentHash(existing) => Ok(((**existing).clone(), true)),
            IdentityMatch::ByUpstream(existing) => {
                Artifact::touch_content_hash(
                    &mut **tx,
                    existing.uuid,
                    &plan.identity.content_hash,
                    plan.detected.resolved_version.as_deref(),
                )
                .await?;
                let mut refreshed = (**existing).clone();
                refreshed.content_hash = plan.identity.content_hash.clone();
                Ok((refreshed, true))
            }
            IdentityMatch::New => {
                let created = Artifact::create_tx(
                    &mut **tx,
                    &CreateArtifact {
                        collection_id,
                        name: plan.identity.canonical_name.clone(),
                        artifact_type: plan.detected.artifact_type,
                        origin: plan.detected.origin,
                        upstream: plan.detected.upstream.clone(),
                        version_spec: plan.detected.version_spec.clone(),
                        resolved_version: plan.detected.resolved_version.clone(),
                        content_hash: plan.identity.content_hash.clone(),
                        path_pattern: plan.identity.path_pattern.clone(),
                        tags: plan.detected.tags.clone(),
                        metadata: plan.detected.metadata.clone(),
                    },
                    plan.identity.uuid,
                )
                .await?;
                Ok((created, false))
            }
        }
    }

    /// Import a skill directory that carries embedded sub-artifacts
    /// (`commands/`, `agents/`, `hooks/`, `mcps/`): one Artifact row for
    /// the skill, one companion CompositeArtifact row back-referencing it,
    /// and one membership per child. Children already present in the
    /// collection are reused by content hash. Atomic: any error rolls the
    /// whole import back.
    pub async fn import_skill_with_embedded(
        &self,
        pool: &SqlitePool,
        collection_id: Uuid,
        skill: &DetectedArtifact,
        embedded: &[DetectedArtifact],
    ) -> Result<ImportedComposite, CompositeError> {
        let parent_plan = self.plan_artifact(pool, collection_id, skill).await?;
        let mut child_plans = Vec::with_capacity(embedded.len());
        for detected in embedded {
            child_plans.push(self.plan_artifact(pool, collection_id, detected).await?);
        }
        let existing_composite =
            CompositeArtifact::find_by_artifact_uuid(pool, parent_plan.identity.uuid).await?;

        let mut tx = pool.begin().await?;
        let (parent, _) = Self::apply_artifact_plan(&mut tx, collection_id, &parent_plan).await?;
        let composite = match existing_composite {
            Some(existing) => existing,
            None => {
                CompositeArtifact::create_tx(
                    &mut *tx,
                    Uuid::new_v4(),
                    collection_id,
                    &parent.name,
                    CompositeType::Skill,
                    Some(&json!({"artifact_uuid": parent.uuid.to_string()})),
                )
                .await?
            }
        };

        let mut children = Vec::with_capacity(child_plans.len());
        let mut deduplicated = 0;
        for (position, plan) in child_plans.iter().enumerate() {
            let (child, reused) = Self::apply_artifact_plan(&mut tx, collection_id, plan).await?;
            if reused {
                deduplicated += 1;
            }
            CompositeMembership::add_tx(&mut *tx, composite.id, child.uuid, position as f64)
                .await?;
            children.push(child);
        }

        tx.commit().await?;
        tracing::info!(
            skill = %parent.name,
            children = children.len(),
            deduplicated,
            "imported skill with embedded artifacts"
        );
        Ok(ImportedComposite {
            parent: Some(parent),
            composite,
            children,
            deduplicated,
        })
    }

    /// Import a manifest-driven composite (plugin, suite, stack): the
    /// composite row is the parent, children are regular artifacts.
    pub async fn import_manifest_composite(
        &self,
        pool: &SqlitePool,
        collection_id: Uuid,
        name: &str,
        composite_type: CompositeType,
        members: &[DetectedArtifact],
    ) -> Result<ImportedComposite, CompositeError> {
        let mut plans = Vec::with_capacity(members.len());
        for detected in members {
            plans.push(self.plan_artifact(pool, collection_id, detected).await?);
        }

        let mut tx = pool.begin().await?;
        let composite = CompositeArtifact::create_tx(
            &mut *tx,
            Uuid::new_v4(),
            collection_id,
            name,
            composite_type,
            None,
        )
        .await?;
        let mut children = Vec::with_capacity(plans.len());
        let mut deduplicated = 0;
        for (position, plan) in plans.iter().enumerate() {
            let (child, reused) = Self::apply_artifact_plan(&mut tx, collection_id, plan).await?;
            if reused {
                deduplicated += 1;
            }
            CompositeMembership::add_tx(&mut *tx, composite.id, child.uuid, position as f64)
                .await?;
            children.push(child);
        }
        tx.commit().await?;
        Ok(ImportedComposite {
            parent: None,
            composite,
            children,
            deduplicated,
        })
    }

    /// Children of a composite in membership order.
    pub async fn resolve_composite_children(
        &self,
        pool: &SqlitePool,
        composite_id: Uuid,
    ) -> Result<Vec<Artifact>, CompositeError> {
        let memberships = CompositeMembership::find_by_composite(pool, composite_id).await?;
        let mut children = Vec::with_capacity(memberships.len());
        for membership in memberships {
            let artifact = Artifact::find_by_id(pool, membership.child_artifact_uuid)
                .await?
                .ok_or(CompositeError::DanglingMember(
                    membership.child_artifact_uuid,
                ))?;
            children.push(artifact);
        }
        Ok(children)
    }

    /// Every set reachable from `set_id` through nested-set edges.
    pub async fn set_descendants(
        &self,
        pool: &SqlitePool,
        set_id: Uuid,
    ) -> Result<HashSet<Uuid>, CompositeError> {
        let mut seen = HashSet::new();
        let mut frontier = vec![set_id];
        while let Some(current) = frontier.pop() {
            for child in DeploymentSet::nested_set_ids(pool, current).await? {
                if seen.insert(child) {
                    frontier.push(child);
                }
            }
        }
        Ok(seen)
    }

    /// Add a member to a deployment set. Nested-set edges are checked for
    /// cycles by descendant reachability before anything is written; a
    /// failed check writes no rows.
    pub async fn add_set_member(
        &self,
        pool: &SqlitePool,
        set_id: Uuid,
        member: SetMemberRef,
        position: f64,
    ) -> Result<DeploymentSetMember, CompositeError> {
        match member {
            SetMemberRef::Artifact { uuid } => {
                Artifact::find_by_id(pool, uuid)
                    .await?
                    .ok_or(CompositeError::DanglingMember(uuid))?;
            }
            SetMemberRef::Group { id } => {
                Group::find_by_id(pool, id)
                    .await?
                    .ok_or(CompositeError::DanglingMember(id))?;
            }
            SetMemberRef::Set { id } => {
                DeploymentSet::find_by_id(pool, id)
                    .await?
                    .ok_or(CompositeError::DanglingMember(id))?;
                if id == set_id {
                    return Err(CompositeError::CyclicComposite);
                }
                let descendants = self.set_descendants(pool, id).await?;
                if descendants.contains(&set_id) {
                    return Err(CompositeError::CyclicComposite);
                }
            }
        }
        let mut tx = pool.begin().await?;
        let row = DeploymentSet::add_member_tx(&mut *tx, set_id, member, position).await?;
        tx.commit().await?;
        Ok(row)
    }

    /// Flatten a deployment set into a deduplicated, deterministically
    /// ordered artifact list: depth-first in member position order,
    /// first-seen wins. Read-only.
    pub async fn resolve_set(
        &self,
        pool: &SqlitePool,
        set_id: Uuid,
    ) -> Result<Vec<Artifact>, CompositeError> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        self.resolve_set_into(pool, set_id, 0, &mut seen, &mut out)
            .await?;
        Ok(out)
    }

    async fn resolve_set_into(
        &self,
        pool: &SqlitePool,
        set_id: Uuid,
        depth: usize,
        seen: &mut HashSet<Uuid>,
        out: &mut Vec<Artifact>,
    ) -> Result<(), CompositeError> {
        if depth >= MAX_RESOLUTION_DEPTH {
            return Err(CompositeError::DepthExceeded);
        }
        for member in DeploymentSet::members(pool, set_id).await? {
            match member.member_ref() {
                Some(SetMemberRef::Artifact { uuid }) => {
                    self.push_artifact(pool, uuid, seen, out).await?;
                }
                Some(SetMemberRef::Group { id }) => {
                    for membership in GroupMembership::find_by_group(pool, id).await? {
                        self.push_artifact(pool, membership.artifact_uuid, seen, out)
                            .await?;
                    }
                }
                Some(SetMemberRef::Set { id }) => {
                    Box::pin(self.resolve_set_into(pool, id, depth + 1, seen, out)).await?;
                }
                None => return Err(CompositeError::DanglingMember(member.id)),
            }
        }
        Ok(())
    }

    async fn push_artifact(
        &self,
        pool: &SqlitePool,
        uuid: Uuid,
        seen: &mut HashSet<Uuid>,
        out: &mut Vec<Artifact>,
    ) -> Result<(), CompositeError> {
        if !seen.insert(uuid) {
            return Ok(());
        }
        let artifact = Artifact::find_by_id(pool, uuid)
            .await?
            .ok_or(CompositeError::DanglingMember(uuid))?;
        out.push(artifact);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use db::models::{
        artifact::{ArtifactOrigin, ArtifactType},
        collection::{Collection, CreateCollection},
    };

    use super::*;
    use crate::services::fs::FsService;

    struct Fixture {
        dbs: db::DBService,
        service: CompositeService,
        fs: FsService,
        collection: Collection,
        _dirs: Vec<tempfile::TempDir>,
    }

    async fn fixture() -> Fixture {
        let dbs = db::DBService::new_in_memory().await.unwrap();
        let fs = FsService::new();
        let service = CompositeService::new(ArtifactIndexService::new(fs.clone()));
        let collection = Collection::create(
            &dbs.pool,
            &CreateCollection {
                name: "main".to_string(),
                root_path: "/tmp/c".to_string(),
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();
        Fixture {
            dbs,
            service,
            fs,
            collection,
            _dirs: Vec::new(),
        }
    }

    fn detected_in(
        fixture: &mut Fixture,
        name: &str,
        artifact_type: ArtifactType,
        content: &[u8],
    ) -> DetectedArtifact {
        let dir = tempfile::tempdir().unwrap();
        fixture.fs.write_file(&dir.path().join("body.md"), content).unwrap();
        let detected = DetectedArtifact {
            name: name.to_string(),
            artifact_type,
            origin: ArtifactOrigin::Local,
            upstream: None,
            version_spec: None,
            resolved_version: None,
            root_dir: dir.path().to_path_buf(),
            path_pattern: None,
            tags: Vec::new(),
            metadata: None,
        };
        fixture._dirs.push(dir);
        detected
    }

    #[tokio::test]
    async fn skill_import_reuses_existing_child_by_content_hash() {
        let mut fx = fixture().await;
        // Pre-existing command with the same bytes as the embedded child.
        let existing_cmd = detected_in(&mut fx, "deploy", ArtifactType::Command, b"deploy now\n");
        let imported = fx
            .service
            .import_manifest_composite(
                &fx.dbs.pool,
                fx.collection.id,
                "bootstrap",
                CompositeType::Plugin,
                std::slice::from_ref(&existing_cmd),
            )
            .await
            .unwrap();
        let existing_uuid = imported.children[0].uuid;

        let skill = detected_in(&mut fx, "release", ArtifactType::Skill, b"release skill\n");
        let embedded_cmd = detected_in(&mut fx, "deploy", ArtifactType::Command, b"deploy now\n");

        let before = Artifact::count_by_collection(&fx.dbs.pool, fx.collection.id)
            .await
            .unwrap();
        let result = fx
            .service
            .import_skill_with_embedded(&fx.dbs.pool, fx.collection.id, &skill, &[embedded_cmd])
            .await
            .unwrap();
        let after = Artifact::count_by_collection(&fx.dbs.pool, fx.collection.id)
            .await
            .unwrap();

        // Only the skill row is new; the command was deduplicated.
        assert_eq!(after, before + 1);
        assert_eq!(result.deduplicated, 1);
        assert_eq!(result.children[0].uuid, existing_uuid);

        let composite = result.composite;
        assert_eq!(composite.composite_type, CompositeType::Skill);
        assert_eq!(
            composite.artifact_uuid(),
            Some(result.parent.as_ref().unwrap().uuid)
        );
        let memberships = CompositeMembership::find_by_composite(&fx.dbs.pool, composite.id)
            .await
            .unwrap();
        assert_eq!(memberships.len(), 1);
        assert_eq!(memberships[0].child_artifact_uuid, existing_uuid);
    }

    #[tokio::test]
    async fn reimport_is_idempotent() {
        let mut fx = fixture().await;
        let skill = detected_in(&mut fx, "release", ArtifactType::Skill, b"release skill\n");
        let child = detected_in(&mut fx, "check", ArtifactType::Command, b"check\n");

        fx.service
            .import_skill_with_embedded(&fx.dbs.pool, fx.collection.id, &skill, std::slice::from_ref(&child))
            .await
            .unwrap();
        let count_after_first = Artifact::count_by_collection(&fx.dbs.pool, fx.collection.id)
            .await
            .unwrap();
        let second = fx
            .service
            .import_skill_with_embedded(&fx.dbs.pool, fx.collection.id, &skill, &[child])
            .await
            .unwrap();
        let count_after_second = Artifact::count_by_collection(&fx.dbs.pool, fx.collection.id)
            .await
            .unwrap();
        assert_eq!(count_after_first, count_after_second);
        let memberships =
            CompositeMembership::find_by_composite(&fx.dbs.pool, second.composite.id)
                .await
                .unwrap();
        assert_eq!(memberships.len(), 1);
    }

    #[tokio::test]
    async fn nested_cycle_is_rejected_without_writes() {
        let fx = fixture().await;
        let a = DeploymentSet::create(&fx.dbs.pool, "local", "a", None, Uuid::new_v4())
            .await
            .unwrap();
        let b = DeploymentSet::create(&fx.dbs.pool, "local", "b", None, Uuid::new_v4())
            .await
            .unwrap();
        fx.service
            .add_set_member(&fx.dbs.pool, a.id, SetMemberRef::Set { id: b.id }, 0.0)
            .await
            .unwrap();

        let err = fx
            .service
            .add_set_member(&fx.dbs.pool, b.id, SetMemberRef::Set { id: a.id }, 0.0)
            .await
            .unwrap_err();
        assert!(matches!(err, CompositeError::CyclicComposite));
        assert!(DeploymentSet::members(&fx.dbs.pool, b.id).await.unwrap().is_empty());

        let self_err = fx
            .service
            .add_set_member(&fx.dbs.pool, a.id, SetMemberRef::Set { id: a.id }, 1.0)
            .await
            .unwrap_err();
        assert!(matches!(self_err, CompositeError::CyclicComposite));
    }

    #[tokio::test]
    async fn resolution_dedupes_and_preserves_first_seen_order() {
        let mut fx = fixture().await;
        let one = detected_in(&mut fx, "one", ArtifactType::Command, b"one\n");
        let two = detected_in(&mut fx, "two", ArtifactType::Command, b"two\n");
        let three = detected_in(&mut fx, "three", ArtifactType::Agent, b"three\n");
        let imported = fx
            .service
            .import_manifest_composite(
                &fx.dbs.pool,
                fx.collection.id,
                "all",
                CompositeType::Suite,
                &[one, two, three],
            )
            .await
            .unwrap();
        let uuids: Vec<Uuid> = imported.children.iter().map(|a| a.uuid).collect();

        let group = Group::create(
            &fx.dbs.pool,
            &db::models::group::CreateGroup {
                collection_id: fx.collection.id,
                name: "pair".to_string(),
                description: None,
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();
        GroupMembership::add(&fx.dbs.pool, group.id, uuids[1], 0.0)
            .await
            .unwrap();
        GroupMembership::add(&fx.dbs.pool, group.id, uuids[2], 1.0)
            .await
            .unwrap();

        let inner = DeploymentSet::create(&fx.dbs.pool, "local", "inner", None, Uuid::new_v4())
            .await
            .unwrap();
        fx.service
            .add_set_member(
                &fx.dbs.pool,
                inner.id,
                SetMemberRef::Artifact { uuid: uuids[0] },
                0.0,
            )
            .await
            .unwrap();

        let outer = DeploymentSet::create(&fx.dbs.pool, "local", "outer", None, Uuid::new_v4())
            .await
            .unwrap();
        // Artifact 0 directly, then the group (1, 2), then a nested set
        // that repeats artifact 0.
        fx.service
            .add_set_member(
                &fx.dbs.pool,
                outer.id,
                SetMemberRef::Artifact { uuid: uuids[0] },
                0.0,
            )
            .await
            .unwrap();
        fx.service
            .add_set_member(&fx.dbs.pool, outer.id, SetMemberRef::Group { id: group.id }, 1.0)
            .await
            .unwrap();
        fx.service
            .add_set_member(&fx.dbs.pool, outer.id, SetMemberRef::Set { id: inner.id }, 2.0)
            .await
            .unwrap();

        let resolved = fx.service.resolve_set(&fx.dbs.pool, outer.id).await.unwrap();
        let resolved_uuids: Vec<Uuid> = resolved.iter().map(|a| a.uuid).collect();
        assert_eq!(resolved_uuids, uuids);

        // Deterministic across runs.
        let again = fx.service.resolve_set(&fx.dbs.pool, outer.id).await.unwrap();
        let again_uuids: Vec<Uuid> = again.iter().map(|a| a.uuid).collect();
        assert_eq!(resolved_uuids, again_uuids);
    }
}
