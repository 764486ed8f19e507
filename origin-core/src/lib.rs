//! Behavior engine for an intercepted virtual-world chat client.
//!
//! This crate provides:
//! - Identity tracking for users in the current room
//! - Outfit capture, copy and named presets
//! - Follow and mimic of a chosen target
//! - Server mute countdown tracking
//! - In-chat `:` commands that never reach the server
//!
//! The packet transport itself lives outside the crate. It feeds a stream of
//! [`TransportEvent`]s into [`Session::run`] and receives [`OutboundPacket`]s
//! through a [`PacketSender`].
//!
//! # Quick Start
//!
//! ```ignore
//! use origin_core::{EntityList, JsonOutfitStore, Session, SessionConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (session, mut notifications) = Session::new(
//!         SessionConfig::new(),
//!         Arc::new(my_transport_sender()),
//!         Arc::new(EntityList::new()),
//!         Arc::new(JsonOutfitStore::at_default_location()?),
//!     );
//!
//!     tokio::spawn(async move {
//!         while let Some(n) = notifications.recv().await {
//!             println!("{n:?}");
//!         }
//!     });
//!
//!     session.run(my_transport_events()).await;
//!     Ok(())
//! }
//! ```

pub mod command;
pub mod identity;
pub mod mimic;
pub mod mute;
pub mod notify;
pub mod outfit;
pub mod protocol;
pub mod room;
pub mod session;
pub mod testing;

// Primary public API
pub use command::{Command, CommandError};
pub use identity::{Appearance, Gender, IdentityRegistry, UserIdentity};
pub use mimic::format_message;
pub use mute::{MuteMonitor, MuteState};
pub use notify::{ChatEvent, ChatKind, Notification, Notifier};
pub use outfit::{JsonOutfitStore, OutfitConfig, OutfitDetails, OutfitError, OutfitStore};
pub use protocol::{
    Incoming, Intercept, OutboundPacket, Outgoing, Packet, PacketSender, Profile, RoomEntity,
    RoomUser, TransportError, TransportEvent, Verdict,
};
pub use room::{EntityList, RoomEntities, RoomTracker};
pub use session::{Session, SessionConfig, SessionError, Status};
pub use testing::{MemoryOutfitStore, RecordingTransport, TestHarness};

/// Static description of the extension, shown by the transport host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionInfo {
    pub title: &'static str,
    pub description: &'static str,
    pub version: &'static str,
}

pub const EXTENSION_INFO: ExtensionInfo = ExtensionInfo {
    title: "G-Origin-Tools",
    description: "Features: Save Outfits, Copy Outfit, Follow User, Mimic User.",
    version: env!("CARGO_PKG_VERSION"),
};
