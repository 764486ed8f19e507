//! Testing utilities for the session engine.
//!
//! This module provides tools for integration testing:
//! - `RecordingTransport` captures every packet the engine sends
//! - `MemoryOutfitStore` keeps the preset file in memory
//! - `TestHarness` wires a session to both and scripts room traffic
//! - Assertion helpers for verifying what was sent

use crate::notify::Notification;
use crate::outfit::{OutfitConfig, OutfitError, OutfitStore};
use crate::protocol::{
    EntityKind, Incoming, Intercept, OutboundPacket, Outgoing, Packet, PacketSender, RoomEntity,
    RoomUser, Tile, TransportError, TransportEvent, Verdict,
};
use crate::room::EntityList;
use crate::session::{Session, SessionConfig};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// A transport that records outbound packets instead of sending them.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<OutboundPacket>>,
    closed: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every further send fail as if the connection dropped.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    /// Packets sent so far.
    pub fn sent(&self) -> Vec<OutboundPacket> {
        self.lock().clone()
    }

    /// Remove and return the packets sent so far.
    pub fn take(&self) -> Vec<OutboundPacket> {
        std::mem::take(&mut *self.lock())
    }

    pub fn last(&self) -> Option<OutboundPacket> {
        self.lock().last().cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<OutboundPacket>> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PacketSender for RecordingTransport {
    fn send(&self, packet: OutboundPacket) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(TransportError::Closed);
        }
        self.lock().push(packet);
        Ok(())
    }
}

/// An outfit store holding the raw preset document in memory.
///
/// `None` behaves like a missing file.
#[derive(Debug, Default)]
pub struct MemoryOutfitStore {
    contents: tokio::sync::Mutex<Option<String>>,
}

impl MemoryOutfitStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from raw document text, which need not be valid JSON.
    pub fn with_contents(raw: impl Into<String>) -> Self {
        Self {
            contents: tokio::sync::Mutex::new(Some(raw.into())),
        }
    }

    pub async fn contents(&self) -> Option<String> {
        self.contents.lock().await.clone()
    }
}

#[async_trait]
impl OutfitStore for MemoryOutfitStore {
    async fn load(&self) -> Result<OutfitConfig, OutfitError> {
        match self.contents.lock().await.as_deref() {
            Some(raw) => Ok(serde_json::from_str(raw)?),
            None => Ok(OutfitConfig::default()),
        }
    }

    async fn save(&self, config: &OutfitConfig) -> Result<(), OutfitError> {
        let raw = serde_json::to_string_pretty(config)?;
        *self.contents.lock().await = Some(raw);
        Ok(())
    }
}

/// Build a player record for a "users" packet.
pub fn player(index: i32, name: &str, figure: &str, gender: &str) -> RoomUser {
    RoomUser {
        index,
        name: name.to_string(),
        figure: figure.to_string(),
        gender: gender.to_string(),
        custom: String::new(),
        x: 0,
        y: 0,
        z: 0.0,
        pool_figure: String::new(),
        badge_code: String::new(),
        kind: EntityKind::Player,
    }
}

/// The room manager's view of a user record.
pub fn entity(user: &RoomUser) -> RoomEntity {
    RoomEntity {
        index: user.index,
        name: user.name.clone(),
        figure: user.figure.clone(),
        gender: user.gender.clone(),
        kind: user.kind,
        tile: Tile {
            x: user.x,
            y: user.y,
            z: user.z,
        },
    }
}

/// Encode a count-prefixed "users" packet.
pub fn users_packet(users: &[RoomUser]) -> Packet {
    users.iter().fold(
        Packet::incoming(Incoming::Users).int(users.len() as i32),
        |packet, user| user.write(packet),
    )
}

/// An inbound speech packet.
pub fn speech_packet(header: Incoming, index: i32, message: &str) -> Packet {
    Packet::incoming(header).int(index).string(message)
}

/// Harness for scripted session scenarios.
pub struct TestHarness {
    pub session: Session,
    pub transport: Arc<RecordingTransport>,
    pub store: Arc<MemoryOutfitStore>,
    pub room: Arc<EntityList>,
    notifications: mpsc::UnboundedReceiver<Notification>,
}

impl TestHarness {
    /// Harness with default configuration and an empty preset store.
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        Self::with_store(config, MemoryOutfitStore::new())
    }

    pub fn with_store(config: SessionConfig, store: MemoryOutfitStore) -> Self {
        let transport = Arc::new(RecordingTransport::new());
        let store = Arc::new(store);
        let room = Arc::new(EntityList::new());
        let (session, notifications) = Session::new(
            config,
            Arc::clone(&transport) as Arc<dyn PacketSender>,
            Arc::clone(&room) as Arc<dyn crate::room::RoomEntities>,
            Arc::clone(&store) as Arc<dyn OutfitStore>,
        );

        Self {
            session,
            transport,
            store,
            room,
            notifications,
        }
    }

    /// Deliver an intercepted packet and return its verdict.
    pub async fn intercept(&self, packet: Packet) -> Verdict {
        self.session
            .handle(TransportEvent::Intercept(Intercept::new(packet)))
            .await
            .unwrap_or(Verdict::Forward)
    }

    /// Enter a room holding `users`.
    pub async fn enter_room(&self, users: &[RoomUser]) {
        self.room.clear().await;
        self.intercept(Packet::incoming(Incoming::RoomReady)).await;
        self.room.upsert(users.iter().map(entity)).await;
        self.intercept(users_packet(users)).await;
    }

    /// Have the user at `index` say something in the room.
    pub async fn say(&self, index: i32, message: &str) -> Verdict {
        self.intercept(speech_packet(Incoming::Chat, index, message))
            .await
    }

    /// Type a line into the operator's own chat box.
    pub async fn type_chat(&self, text: &str) -> Verdict {
        self.intercept(Packet::outgoing(Outgoing::Chat).string(text))
            .await
    }

    pub fn sent(&self) -> Vec<OutboundPacket> {
        self.transport.sent()
    }

    /// Notifications published since the last call.
    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(notification) = self.notifications.try_recv() {
            out.push(notification);
        }
        out
    }

    pub async fn log_lines(&self) -> Vec<String> {
        self.session.notifier().lines().await
    }

    /// Whether any log line contains `text`.
    pub async fn logged(&self, text: &str) -> bool {
        self.log_lines().await.iter().any(|line| line.contains(text))
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert that `packet` was sent.
pub fn assert_sent(harness: &TestHarness, packet: &OutboundPacket) {
    let sent = harness.sent();
    assert!(
        sent.contains(packet),
        "Expected {packet:?} to be sent, got {sent:?}"
    );
}

/// Assert that nothing was sent.
pub fn assert_nothing_sent(harness: &TestHarness) {
    let sent = harness.sent();
    assert!(sent.is_empty(), "Expected nothing sent, got {sent:?}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_transport() {
        let transport = RecordingTransport::new();
        transport.send(OutboundPacket::chat("a")).unwrap();
        transport.send(OutboundPacket::chat("b")).unwrap();
        assert_eq!(transport.last(), Some(OutboundPacket::chat("b")));
        assert_eq!(transport.take().len(), 2);
        assert!(transport.sent().is_empty());

        transport.close();
        assert_eq!(
            transport.send(OutboundPacket::chat("c")),
            Err(TransportError::Closed)
        );
    }

    #[tokio::test]
    async fn test_memory_store_behaves_like_file() {
        let store = MemoryOutfitStore::new();
        assert_eq!(store.load().await.unwrap(), OutfitConfig::default());

        let mut config = OutfitConfig::default();
        config.insert("casual", "fig");
        store.save(&config).await.unwrap();
        assert_eq!(store.load().await.unwrap(), config);
        assert!(store.contents().await.unwrap().contains("\"casual\""));

        let corrupt = MemoryOutfitStore::with_contents("{ nope");
        assert!(matches!(corrupt.load().await, Err(OutfitError::Json(_))));
    }

    #[test]
    fn test_users_packet_round_trips_records() {
        let users = vec![player(1, "alice", "fa", "F"), player(2, "bob", "fb", "M")];
        let mut packet = users_packet(&users);
        assert_eq!(packet.read_int(), Ok(2));
        assert_eq!(RoomUser::read(&mut packet).unwrap(), users[0]);
        assert_eq!(RoomUser::read(&mut packet).unwrap(), users[1]);
    }

    #[tokio::test]
    async fn test_harness_enter_room() {
        let mut harness = TestHarness::new();
        harness
            .enter_room(&[player(1, "alice", "fa", "F")])
            .await;

        assert_eq!(harness.session.load_users().await, vec!["alice"]);
        assert!(harness.logged("[Join] - [alice] Entered the room").await);
        assert!(!harness.drain_notifications().is_empty());
        assert_nothing_sent(&harness);
    }
}
