//! Room state tracker.
//!
//! Keeps a name→position snapshot of the entities physically present in the
//! room. The snapshot is rebuilt wholesale from the transport's live entity
//! list on a fixed cadence and whenever room membership changes; movement
//! between refreshes is only seen through entity update events.

use crate::identity::IdentityRegistry;
use crate::notify::Notifier;
use crate::protocol::RoomEntity;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Enumerates the entities the transport currently sees in the room.
#[async_trait]
pub trait RoomEntities: Send + Sync {
    /// Current entities. Empty between rooms.
    async fn entities(&self) -> Vec<RoomEntity>;
}

/// Tile position of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

/// In-memory live entity list, keyed by index.
///
/// Transport adapters feed it from room-manager events; it then serves as
/// the tracker's enumerator.
#[derive(Debug, Default)]
pub struct EntityList {
    entities: RwLock<HashMap<i32, RoomEntity>>,
}

impl EntityList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace entities by index.
    pub async fn upsert(&self, entities: impl IntoIterator<Item = RoomEntity>) {
        let mut map = self.entities.write().await;
        for entity in entities {
            map.insert(entity.index, entity);
        }
    }

    pub async fn remove(&self, index: i32) -> Option<RoomEntity> {
        self.entities.write().await.remove(&index)
    }

    pub async fn clear(&self) {
        self.entities.write().await.clear();
    }
}

#[async_trait]
impl RoomEntities for EntityList {
    async fn entities(&self) -> Vec<RoomEntity> {
        let mut entities: Vec<RoomEntity> = self.entities.read().await.values().cloned().collect();
        entities.sort_by_key(|e| e.index);
        entities
    }
}

pub struct RoomTracker {
    source: Arc<dyn RoomEntities>,
    snapshot: RwLock<HashMap<String, Position>>,
}

impl RoomTracker {
    pub fn new(source: Arc<dyn RoomEntities>) -> Self {
        Self {
            source,
            snapshot: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuild the snapshot from the enumerator. Returns the entity count.
    pub async fn refresh(&self) -> usize {
        let snapshot: HashMap<String, Position> = self
            .source
            .entities()
            .await
            .into_iter()
            .map(|e| {
                (
                    e.name,
                    Position {
                        x: e.tile.x,
                        y: e.tile.y,
                    },
                )
            })
            .collect();

        let count = snapshot.len();
        *self.snapshot.write().await = snapshot;
        count
    }

    pub async fn position_of(&self, name: &str) -> Option<Position> {
        self.snapshot.read().await.get(name).copied()
    }

    pub async fn snapshot(&self) -> HashMap<String, Position> {
        self.snapshot.read().await.clone()
    }

    /// Poll loop: refresh and publish the user list every `period` until
    /// `shutdown` fires.
    pub async fn run(
        self: Arc<Self>,
        registry: Arc<IdentityRegistry>,
        notifier: Notifier,
        period: Duration,
        shutdown: CancellationToken,
    ) {
        loop {
            let present = self.refresh().await;
            debug!(present, "room snapshot refreshed");
            notifier.users(registry.names().await);

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(period) => {}
            }
        }
        debug!("room poller stopped");
    }
}
