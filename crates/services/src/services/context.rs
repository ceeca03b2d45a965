use db::models::{
    context_module::ContextModule,
    memory_item::{MemoryItem, MemoryStatus, MemoryType},
};
use globset::{Glob, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Context module not found")]
    ModuleNotFound,
}

/// Ad-hoc selection criteria; a `ContextModule` row is the stored form of
/// the same thing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextSelector {
    /// Empty means all types.
    #[serde(default)]
    pub memory_types: Vec<MemoryType>,
    #[serde(default)]
    pub min_confidence: f64,
    /// Files the caller is about to work on; matched against item anchor
    /// globs. Empty disables anchor filtering.
    #[serde(default)]
    pub file_paths: Vec<String>,
    #[serde(default)]
    pub workflow_stages: Vec<String>,
    /// Explicitly pinned item ids, included first in this order.
    #[serde(default)]
    pub pinned: Vec<Uuid>,
}

impl ContextSelector {
    pub fn from_module(module: &ContextModule) -> Self {
        ContextSelector {
            memory_types: module.memory_type_list(),
            min_confidence: module.min_confidence,
            file_paths: Vec::new(),
            workflow_stages: module.workflow_stage_list(),
            pinned: module.member_id_list(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PackedItem {
    pub id: Uuid,
    pub item_type: MemoryType,
    pub content: String,
    pub confidence: f64,
    pub tokens: usize,
}

/// A token-budgeted selection of memory items with a deterministic
/// rendering. `total_tokens` never exceeds the budget, and the items are a
/// prefix of the ranked candidate list.
#[derive(Debug, Serialize)]
pub struct ContextPack {
    pub items: Vec<PackedItem>,
    pub total_tokens: usize,
    pub budget_tokens: usize,
    pub rendered: String,
}

/// Budget-constrained selection of memory items into an injection pack.
#[derive(Debug, Clone, Default)]
pub struct ContextPackerService;

impl ContextPackerService {
    pub fn new() -> Self {
        ContextPackerService
    }

    pub async fn pack_module(
        &self,
        pool: &SqlitePool,
        module_id: Uuid,
        budget_tokens: usize,
    ) -> Result<ContextPack, ContextError> {
        let module = ContextModule::find_by_id(pool, module_id)
            .await?
            .ok_or(ContextError::ModuleNotFound)?;
        let selector = ContextSelector::from_module(&module);
        self.pack(pool, module.project_id, &selector, budget_tokens)
            .await
    }

    pub async fn pack(
        &self,
        pool: &SqlitePool,
        project_id: Uuid,
        selector: &ContextSelector,
        budget_tokens: usize,
    ) -> Result<ContextPack, ContextError> {
        let mut candidates = Vec::new();
        for status in [MemoryStatus::Stable, MemoryStatus::Active] {
            candidates.extend(MemoryItem::find_by_status(pool, project_id, status).await?);
        }

        candidates.retain(|item| self.selected(item, selector));

        // Rank: pinned order first, then confidence desc, recency desc,
        // id as the stable final key.
        let pin_rank = |item: &MemoryItem| {
            selector
                .pinned
                .iter()
                .position(|id| *id == item.id)
                .unwrap_or(usize::MAX)
        };
        candidates.sort_by(|a, b| {
            pin_rank(a)
                .cmp(&pin_rank(b))
                .then_with(|| {
                    b.confidence
                        .partial_cmp(&a.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| b.updated_at.cmp(&a.updated_at))
                .then_with(|| a.id.cmp(&b.id))
        });

        // Greedy prefix under the budget: stop at the first item that
        // would overflow.
        let mut items = Vec::new();
        let mut total_tokens = 0usize;
        for item in candidates {
            let tokens = utils::tokens::estimate_tokens(&item.content);
            if total_tokens + tokens > budget_tokens {
                break;
            }
            total_tokens += tokens;
            items.push(PackedItem {
                id: item.id,
                item_type: item.item_type,
                content: item.content,
                confidence: item.confidence,
                tokens,
            });
        }

        let mut rendered = String::new();
        for item in &items {
            rendered.push_str(&format!("- [{}] {}\n", item.item_type, item.content));
        }

        Ok(ContextPack {
            items,
            total_tokens,
            budget_tokens,
            rendered,
        })
    }

    fn selected(&self, item: &MemoryItem, selector: &ContextSelector) -> bool {
        if !selector.memory_types.is_empty()
            && !selector.memory_types.contains(&item.item_type)
        {
            return false;
        }
        if item.confidence < selector.min_confidence {
            return false;
        }
        let anchors = item.anchor_list();
        if !selector.file_paths.is_empty() && !anchors.is_empty() {
            let mut builder = GlobSetBuilder::new();
            for anchor in &anchors {
                if let Ok(glob) = Glob::new(anchor) {
                    builder.add(glob);
                }
            }
            let Ok(set) = builder.build() else {
                return false;
            };
            let anchored = selector
                .file_paths
                .iter()
                .any(|path| set.is_match(path));
            // Anchors may also name workflow stages; check those before
            // rejecting.
            let staged = !selector.workflow_stages.is_empty()
                && anchors
                    .iter()
                    .any(|a| selector.workflow_stages.contains(a));
            if !anchored && !staged {
                return false;
            }
        } else if !selector.workflow_stages.is_empty() && !anchors.is_empty() {
            if !anchors.iter().any(|a| selector.workflow_stages.contains(a)) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use db::models::{
        memory_item::{CreateMemoryItem, Provenance},
        project::{CreateProject, Project},
    };

    use super::*;
    use crate::services::fs::FsService;

    async fn seed_item(
        pool: &SqlitePool,
        project_id: Uuid,
        item_type: MemoryType,
        content: &str,
        confidence: f64,
        anchors: Vec<String>,
    ) -> MemoryItem {
        let mut conn = pool.acquire().await.unwrap();
        let item = MemoryItem::create_tx(
            &mut *conn,
            &CreateMemoryItem {
                project_id,
                item_type,
                content: content.to_string(),
                confidence,
                provenance: Provenance::default(),
                anchors,
                ttl_policy: None,
                content_hash: FsService::compute_content_hash(content.as_bytes()),
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();
        drop(conn);
        MemoryItem::transition(pool, item.id, MemoryStatus::Active)
            .await
            .unwrap()
    }

    async fn fixture() -> (db::DBService, Project) {
        let dbs = db::DBService::new_in_memory().await.unwrap();
        let project = Project::create(
            &dbs.pool,
            &CreateProject {
                name: "demo".to_string(),
                path: "/tmp/demo".to_string(),
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();
        (dbs, project)
    }

    #[tokio::test]
    async fn pack_respects_budget_and_is_a_ranked_prefix() {
        let (dbs, project) = fixture().await;
        let packer = ContextPackerService::new();
        for (content, confidence) in [
            ("high confidence constraint about the sqlite store layer", 0.9),
            ("medium confidence note about snapshot retention policies", 0.7),
            ("low confidence observation about logging format details", 0.6),
        ] {
            seed_item(
                &dbs.pool,
                project.id,
                MemoryType::Constraint,
                content,
                confidence,
                Vec::new(),
            )
            .await;
        }

        let all = packer
            .pack(&dbs.pool, project.id, &ContextSelector::default(), 10_000)
            .await
            .unwrap();
        assert_eq!(all.items.len(), 3);
        assert!(all.items[0].confidence >= all.items[1].confidence);
        assert!(all.total_tokens <= all.budget_tokens);

        // A budget that only fits the first two makes the pack a strict
        // prefix of the full ranking.
        let budget = all.items[0].tokens + all.items[1].tokens;
        let limited = packer
            .pack(&dbs.pool, project.id, &ContextSelector::default(), budget)
            .await
            .unwrap();
        assert_eq!(limited.items.len(), 2);
        assert_eq!(limited.items[0].id, all.items[0].id);
        assert_eq!(limited.items[1].id, all.items[1].id);
        assert!(limited.total_tokens <= budget);
    }

    #[tokio::test]
    async fn pack_is_deterministic() {
        let (dbs, project) = fixture().await;
        let packer = ContextPackerService::new();
        for index in 0..5 {
            seed_item(
                &dbs.pool,
                project.id,
                MemoryType::Learning,
                &format!("learning number {index} about the deployment engine internals"),
                0.7,
                Vec::new(),
            )
            .await;
        }
        let first = packer
            .pack(&dbs.pool, project.id, &ContextSelector::default(), 200)
            .await
            .unwrap();
        let second = packer
            .pack(&dbs.pool, project.id, &ContextSelector::default(), 200)
            .await
            .unwrap();
        assert_eq!(first.rendered, second.rendered);
    }

    #[tokio::test]
    async fn selector_filters_types_confidence_and_anchors() {
        let (dbs, project) = fixture().await;
        let packer = ContextPackerService::new();
        seed_item(
            &dbs.pool,
            project.id,
            MemoryType::Decision,
            "anchored decision about the sync engine merge classifier",
            0.8,
            vec!["crates/services/src/services/sync.rs".to_string()],
        )
        .await;
        seed_item(
            &dbs.pool,
            project.id,
            MemoryType::Gotcha,
            "unanchored gotcha about pool sizing under test harnesses",
            0.6,
            Vec::new(),
        )
        .await;

        let by_type = packer
            .pack(
                &dbs.pool,
                project.id,
                &ContextSelector {
                    memory_types: vec![MemoryType::Decision],
                    ..Default::default()
                },
                10_000,
            )
            .await
            .unwrap();
        assert_eq!(by_type.items.len(), 1);
        assert_eq!(by_type.items[0].item_type, MemoryType::Decision);

        let by_confidence = packer
            .pack(
                &dbs.pool,
                project.id,
                &ContextSelector {
                    min_confidence: 0.7,
                    ..Default::default()
                },
                10_000,
            )
            .await
            .unwrap();
        assert_eq!(by_confidence.items.len(), 1);

        // Anchored item only matches when a selected path hits its glob;
        // unanchored items always qualify.
        let by_anchor = packer
            .pack(
                &dbs.pool,
                project.id,
                &ContextSelector {
                    file_paths: vec!["crates/db/src/lib.rs".to_string()],
                    ..Default::default()
                },
                10_000,
            )
            .await
            .unwrap();
        assert_eq!(by_anchor.items.len(), 1);
        assert_eq!(by_anchor.items[0].item_type, MemoryType::Gotcha);
    }
}
