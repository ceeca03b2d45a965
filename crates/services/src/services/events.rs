use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Collection,
    Artifact,
    Group,
    Composite,
    DeploymentSet,
    Project,
    Deployment,
    MemoryItem,
    ContextModule,
    Snapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// Cache-invalidation event emitted after every successful mutation.
/// Delivery is at-least-once per subscribed receiver; consumers must be
/// idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityEvent {
    pub entity: EntityKind,
    pub id: Uuid,
    pub kind: ChangeKind,
}

#[derive(Clone)]
pub struct EventService {
    sender: broadcast::Sender<EntityEvent>,
}

impl Default for EventService {
    fn default() -> Self {
        Self::new()
    }
}

impl EventService {
    const CHANNEL_CAPACITY: usize = 1024;

    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(Self::CHANNEL_CAPACITY);
        EventService { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EntityEvent> {
        self.sender.subscribe()
    }

    /// Fire-and-forget: an event with no live subscribers is dropped.
    pub fn emit(&self, entity: EntityKind, id: Uuid, kind: ChangeKind) {
        let event = EntityEvent { entity, id, kind };
        if self.sender.send(event).is_err() {
            tracing::debug!(?event, "no event subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_subscribers() {
        let events = EventService::new();
        let mut rx = events.subscribe();
        let id = Uuid::new_v4();
        events.emit(EntityKind::Artifact, id, ChangeKind::Created);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.entity, EntityKind::Artifact);
        assert_eq!(event.id, id);
        assert_eq!(event.kind, ChangeKind::Created);
    }
}
