use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Aggregates whose multi-row mutations are serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateKind {
    Collection,
    Project,
    Composite,
}

/// Per-aggregate async mutex registry. Collection-wide mutations take the
/// collection lock, deploy/sync take the project lock, membership edits
/// take the composite lock. Guards are not held across DB commits; the
/// transaction is the authoritative barrier.
#[derive(Clone, Default)]
pub struct AggregateLocks {
    locks: Arc<DashMap<(AggregateKind, Uuid), Arc<Mutex<()>>>>,
}

impl AggregateLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, kind: AggregateKind, id: Uuid) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry((kind, id))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_aggregate_serializes() {
        let locks = AggregateLocks::new();
        let id = Uuid::new_v4();
        let guard = locks.lock(AggregateKind::Project, id).await;
        let second = locks.lock(AggregateKind::Project, id);
        tokio::pin!(second);
        assert!(
            futures::poll!(second.as_mut()).is_pending(),
            "second lock on the same project should wait"
        );
        drop(guard);
        second.await;
    }

    #[tokio::test]
    async fn different_aggregates_do_not_block() {
        let locks = AggregateLocks::new();
        let _a = locks.lock(AggregateKind::Project, Uuid::new_v4()).await;
        let _b = locks.lock(AggregateKind::Project, Uuid::new_v4()).await;
    }
}
