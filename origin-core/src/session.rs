//! Session - the behavior engine and the operator-facing API.
//!
//! A `Session` owns every piece of shared state for one intercepted client:
//! the identity registry, the room tracker, the mute monitor, the follow /
//! mimic target and its toggles. Packet handlers run one at a time on the
//! task driving [`Session::run`]; the room poller, mute countdowns and
//! delayed mimic replies run beside it on their own tasks.

use crate::command::{Command, CommandError};
use crate::identity::{Gender, IdentityRegistry};
use crate::mimic::{format_message, sample_delay, PendingReplies};
use crate::mute::{MuteMonitor, MuteState};
use crate::notify::{ChatEvent, ChatKind, Notification, Notifier};
use crate::outfit::{OutfitConfig, OutfitDetails, OutfitError, OutfitStore};
use crate::protocol::{
    Header, Incoming, Intercept, OutboundPacket, Outgoing, Packet, PacketSender, Profile,
    ProtocolError, RoomEntity, RoomUser, TransportEvent, Verdict,
};
use crate::room::{RoomEntities, RoomTracker};
use futures::{Stream, StreamExt};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Name reported for chat from an index the registry does not know.
pub const UNKNOWN_USER: &str = "Unknown";

/// Errors from session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Outfit store error: {0}")]
    Outfit(#[from] OutfitError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How often the room poller refreshes and publishes the user list.
    pub poll_interval: Duration,

    /// Range the mimic reply delay is drawn from.
    pub mimic_delay: Range<Duration>,

    /// Prefix that turns outbound chat into a command.
    pub command_prefix: char,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            mimic_delay: Duration::from_millis(500)..Duration::from_millis(1500),
            command_prefix: ':',
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the room poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the mimic reply delay range.
    pub fn with_mimic_delay(mut self, delay: Range<Duration>) -> Self {
        self.mimic_delay = delay;
        self
    }

    /// Set the command prefix.
    pub fn with_command_prefix(mut self, prefix: char) -> Self {
        self.command_prefix = prefix;
        self
    }
}

/// Snapshot of the session's toggles and trackers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// Current follow/mimic target, if any.
    pub target: Option<String>,
    pub mimic_enabled: bool,
    pub follow_enabled: bool,
    pub mute: MuteState,
    /// Last room id seen in a flat info request, rendered lossily.
    pub room_id: Option<String>,
    /// The operator's own name, once the profile is known.
    pub own_name: Option<String>,
    /// Number of users in the room.
    pub users: usize,
}

struct Shared {
    config: SessionConfig,
    sender: Arc<dyn PacketSender>,
    store: Arc<dyn OutfitStore>,
    notifier: Notifier,
    identities: Arc<IdentityRegistry>,
    room: Arc<RoomTracker>,
    mute: Arc<MuteMonitor>,
    pending: PendingReplies,
    target: RwLock<String>,
    mimic_enabled: AtomicBool,
    follow_enabled: AtomicBool,
    room_id: RwLock<Option<Vec<u8>>>,
    own_name: RwLock<Option<String>>,
}

/// An intercepted client session.
///
/// Cloning is cheap; every clone drives the same state.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    /// Create a session. The returned receiver is the notification sink.
    pub fn new(
        config: SessionConfig,
        sender: Arc<dyn PacketSender>,
        entities: Arc<dyn RoomEntities>,
        store: Arc<dyn OutfitStore>,
    ) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (notifier, notifications) = Notifier::channel();
        let shared = Shared {
            config,
            sender,
            store,
            notifier,
            identities: Arc::new(IdentityRegistry::new()),
            room: Arc::new(RoomTracker::new(entities)),
            mute: Arc::new(MuteMonitor::new()),
            pending: PendingReplies::new(),
            target: RwLock::new(String::new()),
            mimic_enabled: AtomicBool::new(true),
            follow_enabled: AtomicBool::new(true),
            room_id: RwLock::new(None),
            own_name: RwLock::new(None),
        };

        (
            Self {
                shared: Arc::new(shared),
            },
            notifications,
        )
    }

    /// Drive the session until the transport's event stream ends.
    ///
    /// Events are handled strictly in order. The room poller runs for the
    /// lifetime of this call.
    pub async fn run<S>(&self, mut events: S)
    where
        S: Stream<Item = TransportEvent> + Unpin,
    {
        let shutdown = CancellationToken::new();
        let poller = tokio::spawn(Arc::clone(&self.shared.room).run(
            Arc::clone(&self.shared.identities),
            self.shared.notifier.clone(),
            self.shared.config.poll_interval,
            shutdown.clone(),
        ));

        while let Some(event) = events.next().await {
            self.handle(event).await;
        }

        info!("transport stream ended");
        shutdown.cancel();
        self.shared.pending.cancel_all().await;
        if let Err(e) = poller.await {
            warn!(error = %e, "room poller failed");
        }
    }

    /// Handle one transport event. Intercepts report their verdict.
    pub async fn handle(&self, event: TransportEvent) -> Option<Verdict> {
        match event {
            TransportEvent::Initialized { connected } => {
                info!(connected, "initialized");
                None
            }
            TransportEvent::Activated => {
                info!("activated");
                None
            }
            TransportEvent::Connected { host, port, client } => {
                info!(%host, port, client = %client.identifier, version = %client.version, "connected");
                None
            }
            TransportEvent::Disconnected => {
                info!("connection lost");
                None
            }
            TransportEvent::Intercept(mut intercept) => {
                self.intercept(&mut intercept).await;
                Some(intercept.finish())
            }
            TransportEvent::EntitiesAdded(entities) => {
                self.shared.identities.record_appearances(&entities).await;
                None
            }
            TransportEvent::EntityUpdated(entity) => {
                self.on_entity_updated(&entity).await;
                None
            }
            TransportEvent::ProfileUpdated(profile) => {
                self.on_profile_updated(profile).await;
                None
            }
        }
    }

    async fn intercept(&self, intercept: &mut Intercept) {
        let header = intercept.packet.header;
        let result = match header {
            Header::In(Incoming::Chat) => self.on_chat(&mut intercept.packet, ChatKind::Chat).await,
            Header::In(Incoming::Whisper) => {
                self.on_chat(&mut intercept.packet, ChatKind::Whisper).await
            }
            Header::In(Incoming::Shout) => {
                self.on_chat(&mut intercept.packet, ChatKind::Shout).await
            }
            Header::In(Incoming::RoomReady) => {
                self.on_room_enter().await;
                Ok(())
            }
            Header::In(Incoming::Users) => self.on_users(&mut intercept.packet).await,
            Header::In(Incoming::UserLeft) => self.on_user_left(&mut intercept.packet).await,
            Header::In(Incoming::Muted) => self.on_muted(&mut intercept.packet).await,
            Header::In(Incoming::StillMuted) => intercept
                .packet
                .read_int()
                .map(|remaining| self.shared.mute.on_still_muted(remaining)),
            Header::Out(Outgoing::Chat | Outgoing::Shout | Outgoing::Whisper) => {
                self.on_outbound_chat(intercept).await
            }
            Header::Out(Outgoing::GetFlatInfo) => self.on_flat_info(&mut intercept.packet).await,
            _ => Ok(()),
        };

        if let Err(e) = result {
            debug!(?header, error = %e, "dropping malformed packet");
        }
    }

    // ------------------------------------------------------------------
    // Packet handlers
    // ------------------------------------------------------------------

    async fn on_room_enter(&self) {
        self.shared.identities.reset_all().await;
        self.shared.room.refresh().await;
        self.publish_users().await;
    }

    async fn on_users(&self, packet: &mut Packet) -> Result<(), ProtocolError> {
        let count = packet.read_int()?;
        let mut users = Vec::with_capacity(count.clamp(0, 256) as usize);
        for _ in 0..count.max(0) {
            users.push(RoomUser::read(packet)?);
        }

        let added = self
            .shared
            .identities
            .upsert_from_room_entity_list(&users)
            .await;
        for identity in added {
            self.react(ChatEvent::new(identity.index, identity.name, "", ChatKind::Join))
                .await;
        }

        self.shared.room.refresh().await;
        self.publish_users().await;
        Ok(())
    }

    async fn on_user_left(&self, packet: &mut Packet) -> Result<(), ProtocolError> {
        let text = packet.read_string()?;
        let index: i32 = text
            .trim()
            .parse()
            .map_err(|_| ProtocolError::InvalidIndex(text.clone()))?;

        if let Some(identity) = self.shared.identities.remove_by_index(index).await {
            self.react(ChatEvent::new(index, identity.name, "", ChatKind::Left))
                .await;
        }

        self.shared.room.refresh().await;
        self.publish_users().await;
        Ok(())
    }

    async fn on_chat(&self, packet: &mut Packet, kind: ChatKind) -> Result<(), ProtocolError> {
        let index = packet.read_int()?;
        let message = packet.read_string()?;
        let username = self
            .shared
            .identities
            .lookup_by_index(index)
            .await
            .unwrap_or_else(|| UNKNOWN_USER.to_string());

        self.react(ChatEvent::new(index, username, message, kind))
            .await;
        Ok(())
    }

    async fn on_muted(&self, packet: &mut Packet) -> Result<(), ProtocolError> {
        let seconds = packet.read_int()?;
        self.shared.mute.on_muted(seconds).await;
        Ok(())
    }

    async fn on_outbound_chat(&self, intercept: &mut Intercept) -> Result<(), ProtocolError> {
        let text = intercept.packet.read_string()?;
        let Some(parsed) = Command::from_chat(&text, self.shared.config.command_prefix) else {
            return Ok(());
        };

        intercept.block();
        match parsed {
            Ok(command) => self.execute(command).await,
            Err(CommandError::Unknown(verb)) => debug!(%verb, "ignoring unknown command"),
            Err(CommandError::Empty) => debug!("ignoring empty command"),
            Err(e) => warn!(error = %e, "command rejected"),
        }
        Ok(())
    }

    async fn on_flat_info(&self, packet: &mut Packet) -> Result<(), ProtocolError> {
        let room_id = packet.read_bytes()?;
        info!(room_id = %String::from_utf8_lossy(&room_id), "room id change detected");
        *self.shared.room_id.write().await = Some(room_id);
        Ok(())
    }

    async fn on_entity_updated(&self, entity: &RoomEntity) {
        if !self.shared.follow_enabled.load(Ordering::Relaxed) {
            return;
        }
        if !self.is_target(&entity.name).await {
            return;
        }

        match (i16::try_from(entity.tile.x), i16::try_from(entity.tile.y)) {
            (Ok(x), Ok(y)) => {
                debug!(name = %entity.name, x, y, "following");
                self.send(OutboundPacket::move_to(x, y));
            }
            _ => warn!(x = entity.tile.x, y = entity.tile.y, "tile out of range, not following"),
        }
    }

    async fn on_profile_updated(&self, profile: Profile) {
        info!(name = %profile.name, figure = %profile.figure, "profile updated");
        *self.shared.own_name.write().await = Some(profile.name);

        let room_id = self.shared.room_id.read().await.clone();
        if let Some(room_id) = room_id.filter(|id| !id.is_empty()) {
            info!(room_id = %String::from_utf8_lossy(&room_id), "reloading room");
            self.send(OutboundPacket::go_to_flat(room_id));
        }
    }

    // ------------------------------------------------------------------
    // Reactions
    // ------------------------------------------------------------------

    async fn react(&self, event: ChatEvent) {
        match event.kind {
            ChatKind::Join => {
                self.shared
                    .notifier
                    .log(format!("[Join] - [{}] Entered the room", event.username))
                    .await
            }
            ChatKind::Left => {
                self.shared
                    .notifier
                    .log(format!("[Leave] - [{}] Left the room", event.username))
                    .await
            }
            kind => info!(user = %event.username, ?kind, message = %event.message, "chat"),
        }

        self.shared.notifier.chat(event.clone());
        if event.kind.is_speech() {
            self.schedule_mimic(event).await;
        }
    }

    async fn schedule_mimic(&self, event: ChatEvent) {
        if !self.should_mimic(&event.username).await {
            return;
        }

        let delay = {
            let mut rng = rand::thread_rng();
            sample_delay(&self.shared.config.mimic_delay, &mut rng)
        };
        let token = self.shared.pending.token(&event.username, event.kind).await;
        let session = self.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(user = %event.username, "mimic reply cancelled");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            // Toggles may have changed while waiting.
            if !session.should_mimic(&event.username).await {
                debug!(user = %event.username, "mimic reply dropped");
                return;
            }

            let text = format_message(&event.message);
            let packet = match event.kind {
                ChatKind::Chat => OutboundPacket::chat(&text),
                ChatKind::Shout => OutboundPacket::shout(&text),
                ChatKind::Whisper => OutboundPacket::whisper(&event.username, &text),
                ChatKind::Join | ChatKind::Left => return,
            };
            info!(user = %event.username, %text, "mimic");
            session.send(packet);
        });
    }

    async fn should_mimic(&self, username: &str) -> bool {
        self.shared.mimic_enabled.load(Ordering::Relaxed) && self.is_target(username).await
    }

    async fn is_target(&self, username: &str) -> bool {
        let target = self.shared.target.read().await;
        !target.is_empty() && *target == username
    }

    async fn execute(&self, command: Command) {
        match command {
            Command::Copy { username } => {
                self.copy_outfit(&username).await;
            }
            Command::Follow { username } => self.follow_user(&username).await,
            Command::FollowOn => self.follow_on(),
            Command::FollowOff => self.follow_off(),
            Command::MimicOn => self.mimic_on(),
            Command::MimicOff => self.mimic_off().await,
        }
    }

    fn send(&self, packet: OutboundPacket) -> bool {
        match self.shared.sender.send(packet) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "send failed");
                false
            }
        }
    }

    async fn publish_users(&self) {
        self.shared
            .notifier
            .users(self.shared.identities.names().await);
    }

    // ------------------------------------------------------------------
    // Operator API
    // ------------------------------------------------------------------

    /// Build the outfit code for a user in the room.
    pub async fn capture_outfit(&self, username: &str) -> Option<String> {
        let appearance = self.shared.identities.lookup_by_name(username).await?;
        if appearance.gender == Gender::Unknown {
            warn!(%username, "unknown gender, using raw figure");
        }
        Some(appearance.outfit_code())
    }

    /// Wear another user's outfit. Returns false if the user is unknown.
    pub async fn copy_outfit(&self, username: &str) -> bool {
        let Some(code) = self.capture_outfit(username).await else {
            self.shared
                .notifier
                .log(format!("User {username} not found in the room"))
                .await;
            return false;
        };

        if !self.send(OutboundPacket::update_figure(&code)) {
            return false;
        }
        info!(figure = %code, "updated figure");
        self.shared
            .notifier
            .log(format!("Copied outfit from {username}"))
            .await;
        true
    }

    /// Set the follow/mimic target.
    pub async fn follow_user(&self, username: &str) {
        *self.shared.target.write().await = username.to_string();
        self.shared.pending.cancel_except(username).await;
        self.shared
            .notifier
            .log(format!("Following {username}"))
            .await;
    }

    /// Clear the follow/mimic target.
    pub async fn stop_following(&self) {
        let previous = std::mem::take(&mut *self.shared.target.write().await);
        self.shared.pending.cancel_all().await;
        if !previous.is_empty() {
            self.shared
                .notifier
                .log(format!("Stopped following {previous}"))
                .await;
        }
    }

    pub async fn target(&self) -> Option<String> {
        let target = self.shared.target.read().await;
        (!target.is_empty()).then(|| target.clone())
    }

    pub fn mimic_on(&self) {
        self.shared.mimic_enabled.store(true, Ordering::Relaxed);
    }

    /// Disable mimicking and cancel replies still waiting out their delay.
    pub async fn mimic_off(&self) {
        self.shared.mimic_enabled.store(false, Ordering::Relaxed);
        self.shared.pending.cancel_all().await;
    }

    pub fn follow_on(&self) {
        self.shared.follow_enabled.store(true, Ordering::Relaxed);
    }

    pub fn follow_off(&self) {
        self.shared.follow_enabled.store(false, Ordering::Relaxed);
    }

    /// Usernames currently in the room.
    pub async fn load_users(&self) -> Vec<String> {
        self.shared.identities.names().await
    }

    pub async fn status(&self) -> Status {
        Status {
            target: self.target().await,
            mimic_enabled: self.shared.mimic_enabled.load(Ordering::Relaxed),
            follow_enabled: self.shared.follow_enabled.load(Ordering::Relaxed),
            mute: self.shared.mute.state().await,
            room_id: self
                .shared
                .room_id
                .read()
                .await
                .as_deref()
                .map(|id| String::from_utf8_lossy(id).into_owned()),
            own_name: self.shared.own_name.read().await.clone(),
            users: self.shared.identities.len().await,
        }
    }

    /// All stored presets. Store errors are logged and read as empty.
    pub async fn outfits(&self) -> OutfitConfig {
        match self.shared.store.load().await {
            Ok(config) => config,
            Err(e) => {
                self.shared
                    .notifier
                    .log(format!("Error decoding outfit save-file: {e}"))
                    .await;
                OutfitConfig::default()
            }
        }
    }

    pub async fn outfit_names(&self) -> Vec<String> {
        self.outfits().await.names()
    }

    async fn store_outfits(&self, config: &OutfitConfig) -> bool {
        match self.shared.store.save(config).await {
            Ok(()) => {
                self.shared
                    .notifier
                    .log("outfit save-file updated successfully")
                    .await;
                true
            }
            Err(e) => {
                self.shared
                    .notifier
                    .log(format!("Error writing outfit save-file: {e}"))
                    .await;
                false
            }
        }
    }

    /// Save a figure under a preset name.
    pub async fn save_outfit(&self, name: &str, figure: &str) -> bool {
        let mut config = self.outfits().await;
        config.insert(name, figure);
        if !self.store_outfits(&config).await {
            return false;
        }
        self.shared
            .notifier
            .log(format!("Outfit saved successfully: {name}"))
            .await;
        true
    }

    /// Capture a user's outfit and save it as a preset.
    pub async fn save_outfit_from_username(&self, username: &str, outfit_name: &str) -> bool {
        let Some(code) = self.capture_outfit(username).await else {
            self.shared
                .notifier
                .log(format!("User {username} not found"))
                .await;
            return false;
        };
        info!(%username, %outfit_name, "saving outfit from user");
        self.save_outfit(outfit_name, &code).await
    }

    /// Look up a preset by name.
    pub async fn load_outfit(&self, name: &str) -> Option<OutfitDetails> {
        let outfit = self.outfits().await.get(name).cloned();
        if outfit.is_none() {
            self.shared
                .notifier
                .log(format!("Outfit not found: {name}"))
                .await;
        }
        outfit
    }

    /// Wear a stored preset. The stored figure is sent as-is.
    pub async fn apply_outfit(&self, name: &str) -> bool {
        let Some(outfit) = self.load_outfit(name).await else {
            return false;
        };
        if !self.send(OutboundPacket::update_figure(&outfit.figure)) {
            return false;
        }
        info!(figure = %outfit.figure, "updated figure");
        self.shared
            .notifier
            .log(format!("Outfit applied: {name}"))
            .await;
        true
    }

    /// Get the identity registry.
    pub fn identities(&self) -> &IdentityRegistry {
        &self.shared.identities
    }

    /// Get the room tracker.
    pub fn room(&self) -> &RoomTracker {
        &self.shared.room
    }

    /// Get the mute monitor.
    pub fn mute(&self) -> &MuteMonitor {
        &self.shared.mute
    }

    /// Get the notifier.
    pub fn notifier(&self) -> &Notifier {
        &self.shared.notifier
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config() {
        let config = SessionConfig::new()
            .with_poll_interval(Duration::from_millis(250))
            .with_mimic_delay(Duration::ZERO..Duration::from_millis(10))
            .with_command_prefix('!');

        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.mimic_delay.end, Duration::from_millis(10));
        assert_eq!(config.command_prefix, '!');
    }

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.mimic_delay.start, Duration::from_millis(500));
        assert_eq!(config.mimic_delay.end, Duration::from_millis(1500));
        assert_eq!(config.command_prefix, ':');
    }
}
